//! Stateless `POST /mcp` and the liveness endpoint.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{HeaderMap, Extensions, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::debug;

use crate::error::GatewayError;
use crate::mcp::{CallScope, JsonRpcResponse, MAX_BODY_BYTES, TransportKind};
use crate::server::GatewayState;

/// Address used for rate-limit keys: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, then the socket peer.
pub fn client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    if let Some(first) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = header("x-real-ip") {
        return real.to_string();
    }
    peer.map(|p| p.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

pub(crate) fn peer_address(extensions: &Extensions) -> Option<SocketAddr> {
    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr)
}

/// 401 with a JSON-RPC error body; sent before the message is decoded.
pub(crate) fn unauthorized(err: GatewayError) -> Response {
    debug!(error = %err, "Rejecting unauthenticated request");
    let body = JsonRpcResponse::from_gateway_error(Value::Null, err);
    (StatusCode::UNAUTHORIZED, Json(body)).into_response()
}

/// Buffer a request body of at most [`MAX_BODY_BYTES`].
pub(crate) async fn read_body(body: Body) -> Result<Bytes, JsonRpcResponse> {
    axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        debug!(error = %e, "Rejecting request body");
        JsonRpcResponse::invalid_request(
            Value::Null,
            format!("body unreadable or larger than {} bytes", MAX_BODY_BYTES),
        )
    })
}

pub(crate) async fn mcp_post(
    State(state): State<Arc<GatewayState>>,
    extensions: Extensions,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let auth = match state.resolver.resolve_http(&headers) {
        Ok(auth) => auth,
        Err(err) => return unauthorized(err),
    };
    let body = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(rejection) => return (StatusCode::OK, Json(rejection)).into_response(),
    };
    let addr = client_address(&headers, peer_address(&extensions));
    let scope = CallScope::network(TransportKind::Http, auth, &addr);

    match state.router.handle_bytes(&body, &scope).await {
        Some(response) => (StatusCode::OK, Json(response)).into_response(),
        None => StatusCode::ACCEPTED.into_response(),
    }
}

pub(crate) async fn health(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let tools = state.router.dispatcher().snapshot().await.len();
    Json(json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "tools": tools,
        "sseSessions": state.sessions.len().await,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}
