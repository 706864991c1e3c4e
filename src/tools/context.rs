//! Execution context handed to tool handlers, plus argument helpers.

use std::sync::Arc;

use rmcp::model::JsonObject;
use serde_json::Value;
use tracing::{Span, debug};

use crate::cache::ResponseCache;
use crate::config::GatewayConfig;
use crate::downstream::DownstreamClient;
use crate::error::GatewayError;
use crate::tools::RegistryMetadata;

/// Everything a handler may touch for one call.
#[derive(Clone)]
pub struct ToolContext {
    /// Client scoped to this call's credentials.
    pub client: DownstreamClient,
    pub cache: Arc<ResponseCache>,
    pub config: Arc<GatewayConfig>,
    /// Metadata of the registry snapshot the tool was resolved from.
    pub metadata: Arc<RegistryMetadata>,
    /// `tool_call` span; handlers log inside it.
    pub span: Span,
    /// Identity scope prefixed to every cache key.
    pub cache_scope: String,
}

impl ToolContext {
    pub fn cache_key(&self, parts: &[&str]) -> String {
        format!("{}:{}:{}", self.client.service(), self.cache_scope, parts.join(":"))
    }

    /// GET through the shared cache.
    pub async fn cached_get_json(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Value, GatewayError> {
        let query_parts: Vec<String> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let mut parts = segments.to_vec();
        parts.extend(query_parts.iter().map(String::as_str));
        let key = self.cache_key(&parts);
        if let Some(hit) = self.cache.get(&key).await {
            debug!(parent: &self.span, cache_key = %key, "Cache hit");
            return Ok(hit);
        }
        let value = self.client.get_json(segments, query).await?;
        self.cache.insert(key, value.clone()).await;
        Ok(value)
    }
}

/// Required, non-empty string argument.
pub fn required_str<'a>(args: &'a JsonObject, field: &str) -> Result<&'a str, GatewayError> {
    match args.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.as_str()),
        Some(Value::String(_)) => Err(GatewayError::Validation(format!(
            "`{}` must not be empty",
            field
        ))),
        Some(_) => Err(GatewayError::Validation(format!(
            "`{}` must be a string",
            field
        ))),
        None => Err(GatewayError::Validation(format!(
            "missing required argument `{}`",
            field
        ))),
    }
}

pub fn optional_str<'a>(args: &'a JsonObject, field: &str) -> Result<Option<&'a str>, GatewayError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(GatewayError::Validation(format!(
            "`{}` must be a string",
            field
        ))),
    }
}

/// Optional integer argument constrained to `min..=max`.
pub fn optional_u64(
    args: &JsonObject,
    field: &str,
    min: u64,
    max: u64,
) -> Result<Option<u64>, GatewayError> {
    match args.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match v.as_u64() {
            Some(n) if (min..=max).contains(&n) => Ok(Some(n)),
            _ => Err(GatewayError::Validation(format!(
                "`{}` must be an integer between {} and {}",
                field, min, max
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> JsonObject {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_required_str() {
        let a = args(json!({"key": "ABC-1", "blank": " ", "num": 3}));
        assert_eq!(required_str(&a, "key").unwrap(), "ABC-1");
        assert!(matches!(
            required_str(&a, "blank"),
            Err(GatewayError::Validation(_))
        ));
        assert!(matches!(
            required_str(&a, "num"),
            Err(GatewayError::Validation(_))
        ));
        assert!(matches!(
            required_str(&a, "missing"),
            Err(GatewayError::Validation(_))
        ));
    }

    #[test]
    fn test_optional_str() {
        let a = args(json!({"s": "x", "n": null, "bad": true}));
        assert_eq!(optional_str(&a, "s").unwrap(), Some("x"));
        assert_eq!(optional_str(&a, "n").unwrap(), None);
        assert_eq!(optional_str(&a, "absent").unwrap(), None);
        assert!(optional_str(&a, "bad").is_err());
    }

    #[test]
    fn test_optional_u64_bounds() {
        let a = args(json!({"ok": 10, "big": 1000, "neg": -1}));
        assert_eq!(optional_u64(&a, "ok", 1, 100).unwrap(), Some(10));
        assert!(optional_u64(&a, "big", 1, 100).is_err());
        assert!(optional_u64(&a, "neg", 1, 100).is_err());
        assert_eq!(optional_u64(&a, "absent", 1, 100).unwrap(), None);
    }
}
