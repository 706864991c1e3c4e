//! Transports: HTTP POST, HTTP + SSE, and stdio.
//!
//! All three feed raw messages into the shared [`McpRouter`]; they differ only
//! in how long an [`AuthContext`](crate::auth::AuthContext) lives:
//!
//! - `POST /mcp`: one context per request
//! - `GET /sse` + `POST /messages`: one context per stream
//! - stdio: one SYSTEM context for the process

mod http;
mod sse;
mod stdio;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::CredentialResolver;
use crate::mcp::McpRouter;

pub use http::client_address;
pub use sse::SessionStore;
pub use stdio::{serve_lines, serve_stdio};

/// State shared by every HTTP handler.
pub struct GatewayState {
    pub router: Arc<McpRouter>,
    pub resolver: Arc<CredentialResolver>,
    pub sessions: SessionStore,
}

impl GatewayState {
    pub fn new(router: Arc<McpRouter>, resolver: Arc<CredentialResolver>) -> Self {
        Self {
            router,
            resolver,
            sessions: SessionStore::default(),
        }
    }
}

pub fn create_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(http::health))
        .route("/mcp", post(http::mcp_post))
        .route("/sse", get(sse::sse_open))
        .route("/messages", post(sse::messages_post))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn serve_http(state: Arc<GatewayState>, bind: &str) -> anyhow::Result<()> {
    let app = create_router(state.clone());
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("binding {}", bind))?;

    info!(
        bind = %bind,
        server_token = state.resolver.has_server_token(),
        "MCP HTTP gateway listening"
    );
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
    Ok(())
}
