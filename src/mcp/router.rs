//! Method routing for decoded JSON-RPC messages.

use std::fmt;
use std::sync::Arc;

use rmcp::model::{
    Implementation, InitializeResult, JsonObject, ListToolsResult, ProtocolVersion,
    ServerCapabilities,
};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::auth::AuthContext;
use crate::error::GatewayError;
use crate::mcp::wire::{JsonRpcRequest, JsonRpcResponse, decode_request};
use crate::rate_limit::{RateLimitDecision, RateLimiter};
use crate::resources;
use crate::tools::ToolDispatcher;
use crate::types::RateLimitKey;

const INSTRUCTIONS: &str = "Gateway to Jira and Confluence. Use the jira_* tools for issues \
     and the confluence_* tools for pages. Credentials come from the x-* headers of the \
     connection, or from the gateway itself when the server token is presented.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stdio,
    Http,
    Sse,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransportKind::Stdio => "stdio",
            TransportKind::Http => "http",
            TransportKind::Sse => "sse",
        })
    }
}

/// Auth context and rate-limit key a message is processed under.
///
/// One per HTTP request, one per SSE stream, one for the stdio process.
#[derive(Debug, Clone)]
pub struct CallScope {
    pub transport: TransportKind,
    pub auth: AuthContext,
    /// `None` disables rate limiting for this scope.
    pub rate_key: Option<RateLimitKey>,
}

impl CallScope {
    /// Scope for the stdio client, which is exempt from rate limiting.
    pub fn stdio(auth: AuthContext) -> Self {
        Self {
            transport: TransportKind::Stdio,
            auth,
            rate_key: None,
        }
    }

    pub fn network(transport: TransportKind, auth: AuthContext, client_addr: &str) -> Self {
        let rate_key = RateLimiter::key_for(auth.mode(), client_addr);
        Self {
            transport,
            auth,
            rate_key: Some(rate_key),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallToolParams {
    name: String,
    #[serde(default)]
    arguments: Option<JsonObject>,
}

#[derive(Debug, Deserialize)]
struct ReadResourceParams {
    uri: String,
}

fn parse_params<T: for<'de> Deserialize<'de>>(params: Option<Value>) -> Result<T, GatewayError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| GatewayError::Validation(format!("invalid params: {}", e)))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, GatewayError> {
    serde_json::to_value(value)
        .map_err(|e| GatewayError::Server(format!("serializing result: {}", e)))
}

/// Routes protocol methods to the dispatcher.
pub struct McpRouter {
    dispatcher: Arc<ToolDispatcher>,
    limiter: Arc<RateLimiter>,
}

impl McpRouter {
    pub fn new(dispatcher: Arc<ToolDispatcher>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            dispatcher,
            limiter,
        }
    }

    pub fn dispatcher(&self) -> &Arc<ToolDispatcher> {
        &self.dispatcher
    }

    /// Decode and handle raw bytes. Decoding failures become error responses.
    pub async fn handle_bytes(&self, bytes: &[u8], scope: &CallScope) -> Option<JsonRpcResponse> {
        match decode_request(bytes) {
            Ok(request) => self.handle(request, scope).await,
            Err(response) => {
                debug!(transport = %scope.transport, "Rejected undecodable message");
                Some(response)
            }
        }
    }

    /// Handle one request. Notifications yield `None`.
    ///
    /// Every other path ends in a response echoing the request id, including
    /// rate-limit rejections, which are JSON-RPC errors rather than transport
    /// failures.
    pub async fn handle(&self, request: JsonRpcRequest, scope: &CallScope) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!(transport = %scope.transport, method = %request.method, "Notification received");
            return None;
        }
        let id = request.id_value();

        if let Some(key) = &scope.rate_key
            && let RateLimitDecision::Exceeded { retry_after_secs } =
                self.limiter.consume(key).await
        {
            warn!(rate_key = %key, method = %request.method, retry_after_secs, "Request rate limited");
            return Some(JsonRpcResponse::from_gateway_error(
                id,
                GatewayError::RateLimit { retry_after_secs },
            ));
        }

        let response = match self.dispatch(&request.method, request.params, scope).await {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                debug!(method = %request.method, kind = err.kind(), "Method failed");
                JsonRpcResponse::from_gateway_error(id, err)
            }
        };
        Some(response)
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
        scope: &CallScope,
    ) -> Result<Value, GatewayError> {
        let auth = Some(&scope.auth);
        match method {
            "initialize" => to_value(InitializeResult {
                protocol_version: ProtocolVersion::V_2025_06_18,
                capabilities: ServerCapabilities::builder()
                    .enable_tools()
                    .enable_resources()
                    .build(),
                server_info: Implementation::from_build_env(),
                instructions: Some(INSTRUCTIONS.to_string()),
            }),
            "notifications/initialized" | "ping" => Ok(json!({})),
            "tools/list" => {
                let tools = self.dispatcher.list_tools(auth).await;
                to_value(ListToolsResult {
                    tools,
                    next_cursor: None,
                    ..Default::default()
                })
            }
            "tools/call" => {
                let call: CallToolParams = parse_params(params)?;
                let args = call.arguments.unwrap_or_default();
                let result = self.dispatcher.execute(&call.name, args, auth).await?;
                to_value(result)
            }
            "resources/list" => to_value(resources::list_resources()),
            "resources/read" => {
                let read: ReadResourceParams = parse_params(params)?;
                resources::read_resource(&read.uri, &self.dispatcher, auth).await
            }
            other => Err(GatewayError::Server(format!("Unknown method: {}", other))),
        }
    }
}
