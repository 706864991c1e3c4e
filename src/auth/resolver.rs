//! Credential resolution for inbound protocol traffic.

use http::HeaderMap;
use tracing::debug;

use crate::auth::context::{AuthContext, HeaderBag};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::types::ServiceKind;

/// Only headers starting with this prefix are ever copied into a context.
pub const RESERVED_HEADER_PREFIX: &str = "x-";

/// Header carrying the trusted-client server token.
pub const SERVER_TOKEN_HEADER: &str = "x-server-token";

/// Decides, per connection or request, which credentials apply.
///
/// Pure function of its inputs plus the static configuration captured at
/// construction.
#[derive(Debug, Clone)]
pub struct CredentialResolver {
    server_token: Option<String>,
    system_headers: HeaderBag,
}

impl CredentialResolver {
    pub fn new(server_token: Option<String>, system_headers: HeaderBag) -> Self {
        Self {
            server_token: server_token.filter(|t| !t.is_empty()),
            system_headers,
        }
    }

    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(
            config.server_token.clone(),
            system_credential_headers(config),
        )
    }

    /// Whether SYSTEM mode is reachable over the network at all.
    pub fn has_server_token(&self) -> bool {
        self.server_token.is_some()
    }

    /// Resolve an auth context from a provided token and raw request headers.
    ///
    /// A matching server token selects SYSTEM mode with the configured
    /// credentials, even when none are configured; downstream calls then fail
    /// individually. Anything else selects HEADERS mode with only the reserved
    /// `x-` headers, and fails when there are none.
    pub fn resolve<'a, I>(
        &self,
        provided_token: Option<&str>,
        raw_headers: I,
    ) -> Result<AuthContext, GatewayError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if let (Some(expected), Some(provided)) = (&self.server_token, provided_token)
            && constant_time_eq(expected.as_bytes(), provided.as_bytes())
        {
            let ctx = AuthContext::system(self.system_headers.clone());
            debug!(mode = %ctx.mode(), headers = ?ctx.header_names(), "Resolved auth context");
            return Ok(ctx);
        }

        let headers = extract_prefixed_headers(raw_headers);
        if headers.is_empty() {
            return Err(GatewayError::Authentication(
                "no credential headers supplied".to_string(),
            ));
        }
        let ctx = AuthContext::from_headers(headers);
        debug!(mode = %ctx.mode(), headers = ?ctx.header_names(), "Resolved auth context");
        Ok(ctx)
    }

    /// Resolve from an HTTP header map, reading the token from `x-server-token`.
    pub fn resolve_http(&self, headers: &HeaderMap) -> Result<AuthContext, GatewayError> {
        let provided = headers
            .get(SERVER_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok());
        self.resolve(provided, http_header_pairs(headers))
    }

    /// SYSTEM context built from configuration alone.
    ///
    /// Used directly by the stdio transport, whose single local client is
    /// trusted without a token.
    pub fn system_context(&self) -> Result<AuthContext, GatewayError> {
        if self.system_headers.is_empty() {
            return Err(GatewayError::Authentication(
                "no system credentials are configured".to_string(),
            ));
        }
        let ctx = AuthContext::system(self.system_headers.clone());
        debug!(mode = %ctx.mode(), headers = ?ctx.header_names(), "Resolved auth context");
        Ok(ctx)
    }
}

/// Credential headers assembled from the configured system credentials of
/// every downstream service.
pub fn system_credential_headers(config: &GatewayConfig) -> HeaderBag {
    let mut headers = HeaderBag::new();
    for service in ServiceKind::ALL {
        if let Some(creds) = config
            .service(service)
            .and_then(|cfg| cfg.system_credentials())
        {
            headers.extend(creds.to_headers(service));
        }
    }
    headers
}

/// Copy only headers carrying the reserved prefix, excluding the server token.
///
/// Names are lower-cased. Applying this to its own output is a no-op.
pub fn extract_prefixed_headers<'a, I>(raw_headers: I) -> HeaderBag
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    raw_headers
        .into_iter()
        .filter_map(|(name, value)| {
            let name = name.to_ascii_lowercase();
            if name.starts_with(RESERVED_HEADER_PREFIX) && name != SERVER_TOKEN_HEADER {
                Some((name, value.to_string()))
            } else {
                None
            }
        })
        .collect()
}

/// Borrow an HTTP header map as name/value pairs, skipping non-UTF-8 values.
pub fn http_header_pairs(headers: &HeaderMap) -> Vec<(&str, &str)> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|v| (name.as_str(), v)))
        .collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMode;
    use crate::config::ServiceConfig;

    fn config_with_jira_pat(token: Option<&str>) -> GatewayConfig {
        GatewayConfig {
            server_token: token.map(|t| t.to_string()),
            jira: Some(ServiceConfig {
                url: "https://jira.example.com".to_string(),
                personal_access_token: Some("system-pat".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_matching_token_selects_system_mode() {
        let resolver = CredentialResolver::from_config(&config_with_jira_pat(Some("abc")));
        let ctx = resolver
            .resolve(Some("abc"), vec![("x-server-token", "abc")])
            .unwrap();
        assert_eq!(ctx.mode(), AuthMode::System);
        assert_eq!(ctx.headers().get("x-jira-token").unwrap(), "system-pat");
    }

    #[test]
    fn test_wrong_token_selects_headers_mode() {
        let resolver = CredentialResolver::from_config(&config_with_jira_pat(Some("abc")));
        let ctx = resolver
            .resolve(
                Some("abd"),
                vec![("x-server-token", "abd"), ("X-Jira-Token", "caller-pat")],
            )
            .unwrap();
        assert_eq!(ctx.mode(), AuthMode::Headers);
        assert_eq!(ctx.headers().get("x-jira-token").unwrap(), "caller-pat");
        assert!(!ctx.headers().contains_key("x-server-token"));
    }

    #[test]
    fn test_no_token_configured_always_headers_mode() {
        let resolver = CredentialResolver::from_config(&config_with_jira_pat(None));
        let ctx = resolver
            .resolve(
                Some("anything"),
                vec![
                    ("x-acting-user", "alice"),
                    ("authorization", "Bearer foo"),
                    ("content-type", "application/json"),
                ],
            )
            .unwrap();
        assert_eq!(ctx.mode(), AuthMode::Headers);
        assert_eq!(ctx.headers().len(), 1);
        assert_eq!(ctx.headers().get("x-acting-user").unwrap(), "alice");
    }

    #[test]
    fn test_headers_mode_never_leaks_system_credentials() {
        let resolver = CredentialResolver::from_config(&config_with_jira_pat(Some("abc")));
        let ctx = resolver
            .resolve(None, vec![("x-acting-user", "bob")])
            .unwrap();
        assert!(
            ctx.headers()
                .values()
                .all(|v| v != "system-pat")
        );
    }

    #[test]
    fn test_empty_headers_is_authentication_error() {
        let resolver = CredentialResolver::from_config(&config_with_jira_pat(None));
        let err = resolver
            .resolve(None, vec![("accept", "application/json")])
            .unwrap_err();
        assert!(matches!(err, GatewayError::Authentication(_)));
    }

    #[test]
    fn test_token_accepted_without_system_credentials() {
        let resolver = CredentialResolver::new(Some("abc".to_string()), HeaderBag::new());
        let ctx = resolver.resolve(Some("abc"), Vec::<(&str, &str)>::new()).unwrap();
        assert!(ctx.is_system());
        assert!(ctx.headers().is_empty());
        assert!(resolver.system_context().is_err());
    }

    #[test]
    fn test_empty_configured_token_is_disabled() {
        let resolver = CredentialResolver::new(Some(String::new()), HeaderBag::new());
        assert!(!resolver.has_server_token());
        assert!(resolver.resolve(Some(""), Vec::<(&str, &str)>::new()).is_err());
    }

    #[test]
    fn test_extract_prefixed_headers_is_idempotent() {
        let raw = vec![
            ("X-Jira-Token", "t"),
            ("x-acting-user", "alice"),
            ("x-server-token", "secret"),
            ("Host", "example.com"),
        ];
        let once = extract_prefixed_headers(raw);
        let twice = extract_prefixed_headers(once.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        assert_eq!(once, twice);
        assert_eq!(once.len(), 2);
    }

    #[test]
    fn test_resolve_http_reads_token_header() {
        let resolver = CredentialResolver::from_config(&config_with_jira_pat(Some("abc")));
        let mut headers = HeaderMap::new();
        headers.insert(SERVER_TOKEN_HEADER, "abc".parse().unwrap());
        let ctx = resolver.resolve_http(&headers).unwrap();
        assert!(ctx.is_system());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
    }
}
