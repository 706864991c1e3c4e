//! JSON-RPC 2.0 envelopes shared by every transport.

use rmcp::ErrorData as McpError;
use rmcp::model::ErrorCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::GatewayError;

/// Largest accepted message, in bytes.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Inbound JSON-RPC message. A missing or null `id` marks a notification.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    /// The id to echo back; `null` for notifications.
    pub fn id_value(&self) -> Value {
        self.id.clone().unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<McpError> for JsonRpcErrorObject {
    fn from(err: McpError) -> Self {
        Self {
            code: err.code.0,
            message: err.message.into_owned(),
            data: err.data,
        }
    }
}

/// Outbound JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, error: impl Into<JsonRpcErrorObject>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn from_gateway_error(id: Value, error: GatewayError) -> Self {
        Self::error(id, error.into_mcp_error())
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::error(
            Value::Null,
            JsonRpcErrorObject {
                code: ErrorCode::PARSE_ERROR.0,
                message: format!("Parse error: {}", detail.into()),
                data: None,
            },
        )
    }

    pub fn invalid_request(id: Value, detail: impl Into<String>) -> Self {
        Self::error(
            id,
            JsonRpcErrorObject {
                code: ErrorCode::INVALID_REQUEST.0,
                message: format!("Invalid request: {}", detail.into()),
                data: None,
            },
        )
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Serialize, falling back to a fixed internal-error envelope.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"serialization failed"}}"#
                .to_string()
        })
    }
}

/// Decode one inbound message, or produce the error response to send instead.
pub fn decode_request(bytes: &[u8]) -> Result<JsonRpcRequest, JsonRpcResponse> {
    if bytes.len() > MAX_BODY_BYTES {
        return Err(JsonRpcResponse::invalid_request(
            Value::Null,
            format!("message exceeds {} bytes", MAX_BODY_BYTES),
        ));
    }

    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| JsonRpcResponse::parse_error(e.to_string()))?;
    if !value.is_object() {
        return Err(JsonRpcResponse::invalid_request(
            Value::Null,
            "expected a single JSON object",
        ));
    }

    let request: JsonRpcRequest = serde_json::from_value(value)
        .map_err(|e| JsonRpcResponse::invalid_request(Value::Null, e.to_string()))?;

    if let Some(id) = &request.id
        && !(id.is_string() || id.is_number())
    {
        return Err(JsonRpcResponse::invalid_request(
            Value::Null,
            "id must be a string, a number, or null",
        ));
    }
    if request.jsonrpc != "2.0" {
        return Err(JsonRpcResponse::invalid_request(
            request.id_value(),
            "jsonrpc must be \"2.0\"",
        ));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_request() {
        let req =
            decode_request(br#"{"jsonrpc":"2.0","id":7,"method":"ping","params":{}}"#).unwrap();
        assert_eq!(req.method, "ping");
        assert_eq!(req.id_value(), json!(7));
        assert!(!req.is_notification());
    }

    #[test]
    fn test_null_or_missing_id_is_notification() {
        let a = decode_request(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .unwrap();
        let b = decode_request(br#"{"jsonrpc":"2.0","id":null,"method":"x"}"#).unwrap();
        assert!(a.is_notification());
        assert!(b.is_notification());
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let resp = decode_request(b"{not json").unwrap_err();
        assert_eq!(resp.error.unwrap().code, -32700);
        assert_eq!(resp.id, Value::Null);
    }

    #[test]
    fn test_structural_problems_are_invalid_request() {
        for body in [
            br#"[1, 2]"#.as_slice(),
            br#"{"jsonrpc":"2.0","id":1}"#.as_slice(),
            br#"{"jsonrpc":"2.0","id":{"a":1},"method":"ping"}"#.as_slice(),
        ] {
            let resp = decode_request(body).unwrap_err();
            assert_eq!(resp.error.unwrap().code, -32600);
        }
    }

    #[test]
    fn test_wrong_version_keeps_id() {
        let resp = decode_request(br#"{"jsonrpc":"1.0","id":"abc","method":"ping"}"#).unwrap_err();
        assert_eq!(resp.id, json!("abc"));
    }

    #[test]
    fn test_oversized_body_is_rejected() {
        let big = vec![b' '; MAX_BODY_BYTES + 1];
        let resp = decode_request(&big).unwrap_err();
        assert_eq!(resp.error.unwrap().code, -32600);
    }

    #[test]
    fn test_error_envelope_shape() {
        let resp = JsonRpcResponse::from_gateway_error(
            json!(3),
            GatewayError::RateLimit {
                retry_after_secs: 2,
            },
        );
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["id"], 3);
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], -32029);
        assert_eq!(value["error"]["data"]["retryAfter"], 2);
    }
}
