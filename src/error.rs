//! Gateway error taxonomy and its translation into JSON-RPC error objects.

use std::fmt;

use rmcp::ErrorData as McpError;
use rmcp::model::ErrorCode;
use serde_json::{Map, Value, json};

/// JSON-RPC code for a missing or rejected credential.
pub const AUTHENTICATION_REQUIRED_CODE: i32 = -32001;
/// JSON-RPC code for an authenticated caller that lacks permission.
pub const FORBIDDEN_CODE: i32 = -32003;
/// JSON-RPC code for a downstream object that does not exist.
pub const NOT_FOUND_CODE: i32 = -32004;
/// JSON-RPC code for an unreachable or timed-out downstream.
pub const NETWORK_ERROR_CODE: i32 = -32005;
/// JSON-RPC code for an exhausted request budget.
pub const RATE_LIMITED_CODE: i32 = -32029;

/// Errors surfaced by the gateway core and by tool handlers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// No usable credential for this call.
    Authentication(String),
    /// Credential accepted but not allowed to do this.
    Authorization(String),
    /// Arguments or request shape rejected.
    Validation(String),
    /// Downstream object does not exist.
    NotFound(String),
    /// Request budget exhausted for the caller's key.
    RateLimit { retry_after_secs: u64 },
    /// Downstream unreachable, timed out, or temporarily unavailable.
    Network(String),
    /// Tool could not be executed (unknown name, bad call shape).
    ToolExecution { tool: String, reason: String },
    /// Catch-all.
    Server(String),
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authentication(msg) => write!(f, "Authentication failed: {}", msg),
            Self::Authorization(msg) => write!(f, "Not authorized: {}", msg),
            Self::Validation(msg) => write!(f, "Validation failed: {}", msg),
            Self::NotFound(msg) => write!(f, "Not found: {}", msg),
            Self::RateLimit { retry_after_secs } => write!(
                f,
                "Rate limit exceeded, retry after {} seconds",
                retry_after_secs
            ),
            Self::Network(msg) => write!(f, "Network error: {}", msg),
            Self::ToolExecution { tool, reason } => {
                write!(f, "Tool '{}' failed: {}", tool, reason)
            }
            Self::Server(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for GatewayError {}

impl GatewayError {
    /// HTTP-ish status associated with this kind.
    pub fn status(&self) -> u16 {
        match self {
            Self::Authentication(_) => 401,
            Self::Authorization(_) => 403,
            Self::Validation(_) => 400,
            Self::NotFound(_) => 404,
            Self::RateLimit { .. } => 429,
            Self::Network(_) => 503,
            Self::ToolExecution { .. } => 400,
            Self::Server(_) => 500,
        }
    }

    /// Stable name of the kind, reported in the error `data`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "AuthenticationError",
            Self::Authorization(_) => "AuthorizationError",
            Self::Validation(_) => "ValidationError",
            Self::NotFound(_) => "NotFoundError",
            Self::RateLimit { .. } => "RateLimitError",
            Self::Network(_) => "NetworkError",
            Self::ToolExecution { .. } => "ToolExecutionError",
            Self::Server(_) => "ServerError",
        }
    }

    /// JSON-RPC error code for this kind.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Authentication(_) => ErrorCode(AUTHENTICATION_REQUIRED_CODE),
            Self::Authorization(_) => ErrorCode(FORBIDDEN_CODE),
            Self::Validation(_) => ErrorCode::INVALID_PARAMS,
            Self::NotFound(_) => ErrorCode(NOT_FOUND_CODE),
            Self::RateLimit { .. } => ErrorCode(RATE_LIMITED_CODE),
            Self::Network(_) => ErrorCode(NETWORK_ERROR_CODE),
            Self::ToolExecution { .. } => ErrorCode::INVALID_PARAMS,
            Self::Server(_) => ErrorCode::INTERNAL_ERROR,
        }
    }

    /// Classify a non-success downstream HTTP status.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        let detail = if body.trim().is_empty() {
            format!("downstream returned HTTP {}", status)
        } else {
            format!("downstream returned HTTP {}: {}", status, truncate(&body, 512))
        };
        match status {
            400 => Self::Validation(detail),
            401 => Self::Authentication(detail),
            403 => Self::Authorization(detail),
            404 => Self::NotFound(detail),
            429 => Self::RateLimit {
                retry_after_secs: 1,
            },
            502..=504 => Self::Network(detail),
            _ => Self::Server(detail),
        }
    }

    /// Translate into a protocol error object.
    pub fn into_mcp_error(self) -> McpError {
        let mut data = Map::new();
        data.insert("kind".to_string(), json!(self.kind()));
        data.insert("status".to_string(), json!(self.status()));
        match &self {
            Self::RateLimit { retry_after_secs } => {
                data.insert("retryAfter".to_string(), json!(retry_after_secs));
            }
            Self::ToolExecution { tool, .. } => {
                data.insert("toolName".to_string(), json!(tool));
            }
            _ => {}
        }
        let message = match &self {
            // Clients match on this exact text.
            Self::Authentication(_) => "Authentication required".to_string(),
            other => other.to_string(),
        };
        if let Self::Authentication(reason) = &self {
            data.insert("reason".to_string(), json!(reason));
        }
        McpError::new(self.code(), message, Some(Value::Object(data)))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Network(format!("downstream request timed out: {}", err));
        }
        if err.is_connect() {
            return Self::Network(format!("could not reach downstream: {}", err));
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), String::new());
        }
        if err.is_decode() {
            return Self::Server(format!("could not decode downstream response: {}", err));
        }
        Self::Server(err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
