//! MCP gateway for Jira and Confluence.
//!
//! Inbound MCP traffic (stdio, HTTP, SSE) is authenticated into an
//! [`auth::AuthContext`], routed by [`mcp::McpRouter`], and executed by
//! [`tools::ToolDispatcher`] against downstream REST APIs with credentials
//! chosen per call.

pub mod auth;
pub mod cache;
pub mod config;
pub mod downstream;
pub mod error;
pub mod mcp;
pub mod rate_limit;
pub mod resources;
pub mod server;
pub mod tools;
pub mod types;

pub use auth::{AuthContext, AuthMode, CredentialResolver, HeaderBag};
pub use config::{GatewayConfig, load_config};
pub use error::GatewayError;
pub use mcp::{CallScope, McpRouter, TransportKind};
pub use server::{GatewayState, create_router, serve_http, serve_stdio};
pub use tools::{ToolDispatcher, ToolHandler, ToolRegistry};
pub use types::ServiceKind;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use crate::cache::ResponseCache;
use crate::downstream::ClientFactory;
use crate::rate_limit::RateLimiter;
use crate::tools::{JiraMetadataSource, default_handlers};

/// Wire up a gateway from configuration.
///
/// Builds the downstream client factory, the tool dispatcher with its
/// default handlers, the rate limiter, and the credential resolver.
pub fn create_gateway(config: GatewayConfig) -> Result<Arc<GatewayState>> {
    let config = Arc::new(config);
    let factory = Arc::new(ClientFactory::from_config(&config)?);
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(config.cache_ttl_secs)));

    let dispatcher = ToolDispatcher::new(config.clone(), factory.clone(), cache, default_handlers())
        .with_metadata_source(Arc::new(JiraMetadataSource::new(factory.clone(), config.clone())));
    let limiter = Arc::new(RateLimiter::new(config.rate_limit));
    let router = Arc::new(McpRouter::new(Arc::new(dispatcher), limiter));
    let resolver = Arc::new(CredentialResolver::from_config(&config));

    info!(
        jira = factory.is_configured(ServiceKind::Jira),
        confluence = factory.is_configured(ServiceKind::Confluence),
        server_token = resolver.has_server_token(),
        "Gateway initialized"
    );
    Ok(Arc::new(GatewayState::new(router, resolver)))
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::config::RateLimitConfig;
    use axum::response::Response;
    use serde_json::Value;

    pub fn gateway_state(server_token: Option<&str>, max_requests: u32) -> Arc<GatewayState> {
        let config = GatewayConfig {
            server_token: server_token.map(str::to_string),
            rate_limit: RateLimitConfig {
                window_ms: 60_000,
                max_requests,
            },
            ..GatewayConfig::default()
        };
        create_gateway(config).unwrap()
    }

    pub async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
