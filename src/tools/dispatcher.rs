//! Tool dispatch: registry snapshots, credential strategy, and invocation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use rmcp::model::{CallToolResult, Content, JsonObject, Tool as McpTool};
use serde_json::{Value, json};
use tokio::sync::RwLock;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::auth::{AuthContext, HeaderBag, substitute};
use crate::cache::{ResponseCache, credential_scope};
use crate::config::{GatewayConfig, ToolResultFormat};
use crate::downstream::{ClientFactory, ClientStrategy, DownstreamClient, strategy_for};
use crate::error::GatewayError;
use crate::tools::jira::priority_names;
use crate::tools::{RegistryMetadata, ToolContext, ToolHandler, ToolRegistry};
use crate::types::ServiceKind;

/// Future returned by [`MetadataSource::fetch`].
pub type MetadataFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RegistryMetadata, GatewayError>> + Send + 'a>>;

/// Where live registry metadata comes from.
pub trait MetadataSource: Send + Sync {
    fn fetch<'a>(&'a self, auth: &'a AuthContext) -> MetadataFuture<'a>;
}

/// Reads the Jira priority list with the caller's credentials.
pub struct JiraMetadataSource {
    factory: Arc<ClientFactory>,
    config: Arc<GatewayConfig>,
}

impl JiraMetadataSource {
    pub fn new(factory: Arc<ClientFactory>, config: Arc<GatewayConfig>) -> Self {
        Self { factory, config }
    }
}

impl MetadataSource for JiraMetadataSource {
    fn fetch<'a>(&'a self, auth: &'a AuthContext) -> MetadataFuture<'a> {
        Box::pin(async move {
            if !self.factory.is_configured(ServiceKind::Jira) {
                return Ok(RegistryMetadata::default());
            }
            let headers = substitute(
                auth.headers(),
                ServiceKind::Jira,
                self.config.substitution.as_ref(),
            );
            let strategy = strategy_for(Some(auth), &headers, ServiceKind::Jira);
            let client = self.factory.build(ServiceKind::Jira, &strategy)?;
            let raw = client.get_json(&["rest", "api", "2", "priority"], &[]).await?;
            Ok(RegistryMetadata {
                jira_priorities: priority_names(&raw),
            })
        })
    }
}

/// Holds the current registry snapshot and runs tool calls.
pub struct ToolDispatcher {
    handlers: Vec<Arc<dyn ToolHandler>>,
    registry: RwLock<Arc<ToolRegistry>>,
    metadata_source: Option<Arc<dyn MetadataSource>>,
    factory: Arc<ClientFactory>,
    cache: Arc<ResponseCache>,
    config: Arc<GatewayConfig>,
}

impl ToolDispatcher {
    pub fn new(
        config: Arc<GatewayConfig>,
        factory: Arc<ClientFactory>,
        cache: Arc<ResponseCache>,
        handlers: Vec<Arc<dyn ToolHandler>>,
    ) -> Self {
        let registry = ToolRegistry::build(&handlers, RegistryMetadata::default());
        Self {
            handlers,
            registry: RwLock::new(Arc::new(registry)),
            metadata_source: None,
            factory,
            cache,
            config,
        }
    }

    pub fn with_metadata_source(mut self, source: Arc<dyn MetadataSource>) -> Self {
        self.metadata_source = Some(source);
        self
    }

    /// Current registry. Callers keep a consistent view for as long as they
    /// hold the `Arc`, whatever refreshes happen meanwhile.
    pub async fn snapshot(&self) -> Arc<ToolRegistry> {
        self.registry.read().await.clone()
    }

    pub async fn list_tools(&self, auth: Option<&AuthContext>) -> Vec<McpTool> {
        if let Some(auth) = auth
            && !auth.headers().is_empty()
        {
            self.refresh_metadata(auth).await;
        }
        self.snapshot().await.list_tools()
    }

    /// Fetch live metadata and install a rebuilt registry if it changed.
    ///
    /// Returns whether a new snapshot was installed. Failures are logged and
    /// leave the current snapshot in place.
    pub async fn refresh_metadata(&self, auth: &AuthContext) -> bool {
        let Some(source) = &self.metadata_source else {
            return false;
        };
        let metadata = match source.fetch(auth).await {
            Ok(m) => m,
            Err(err) => {
                warn!(mode = %auth.mode(), error = %err, "Registry metadata refresh failed");
                return false;
            }
        };

        if **self.snapshot().await.metadata() == metadata {
            return false;
        }
        let rebuilt = Arc::new(ToolRegistry::build(&self.handlers, metadata));
        let mut current = self.registry.write().await;
        if current.metadata() == rebuilt.metadata() {
            return false;
        }
        *current = rebuilt;
        info!(tools = current.len(), "Tool registry rebuilt with new metadata");
        true
    }

    /// Build the client a call to `service` would use under `auth`.
    ///
    /// Returns the client together with the cache scope for its headers.
    pub fn client_for(
        &self,
        service: ServiceKind,
        auth: Option<&AuthContext>,
    ) -> Result<(DownstreamClient, ClientStrategy, String), GatewayError> {
        let headers = match auth {
            Some(a) => substitute(a.headers(), service, self.config.substitution.as_ref()),
            None => HeaderBag::new(),
        };
        let strategy = strategy_for(auth, &headers, service);
        let client = self.factory.build(service, &strategy)?;
        Ok((client, strategy, credential_scope(&headers)))
    }

    /// Run a tool and return its raw JSON value.
    pub async fn invoke(
        &self,
        name: &str,
        args: JsonObject,
        auth: Option<&AuthContext>,
    ) -> Result<Value, GatewayError> {
        let registry = self.snapshot().await;
        let Some(descriptor) = registry.get(name) else {
            return Err(GatewayError::ToolExecution {
                tool: name.to_string(),
                reason: "Tool not found".to_string(),
            });
        };

        let service = descriptor.service;
        let (client, strategy, cache_scope) = self.client_for(service, auth)?;
        let span = info_span!(
            "tool_call",
            tool = %name,
            service = %service,
            mode = auth.map(|a| a.mode().as_str()).unwrap_or("none"),
            strategy = strategy.name(),
        );
        debug!(
            parent: &span,
            passthrough = ?client.passthrough_header_names(),
            auth = client.auth_kind(),
            "Dispatching tool call"
        );

        let ctx = ToolContext {
            client,
            cache: self.cache.clone(),
            config: self.config.clone(),
            metadata: registry.metadata().clone(),
            span: span.clone(),
            cache_scope,
        };
        let handler = descriptor.handler.clone();
        let started = Instant::now();
        let mut task = tokio::spawn(
            async move { handler.execute(args, &ctx).await }.instrument(span.clone()),
        );

        let outcome = match tokio::time::timeout(self.factory.timeout(), &mut task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(GatewayError::Server(format!(
                "tool '{}' aborted: {}",
                name, join_err
            ))),
            Err(_) => {
                task.abort();
                Err(GatewayError::Network(format!(
                    "tool '{}' timed out after {}s",
                    name,
                    self.factory.timeout().as_secs()
                )))
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &outcome {
            Ok(_) => info!(parent: &span, elapsed_ms, "Tool call completed"),
            Err(err) => warn!(parent: &span, elapsed_ms, kind = err.kind(), error = %err, "Tool call failed"),
        }
        outcome
    }

    /// Run a tool and shape the result per `toolResultFormat`.
    pub async fn execute(
        &self,
        name: &str,
        args: JsonObject,
        auth: Option<&AuthContext>,
    ) -> Result<CallToolResult, GatewayError> {
        let value = self.invoke(name, args, auth).await?;
        Ok(format_result(self.config.tool_result_format, value))
    }
}

/// Shape a handler value as a protocol tool result.
pub fn format_result(format: ToolResultFormat, value: Value) -> CallToolResult {
    match format {
        ToolResultFormat::Structured => {
            let structured = if value.is_object() {
                value
            } else {
                json!({ "result": value })
            };
            CallToolResult::structured(structured)
        }
        ToolResultFormat::Text => {
            let text = match value {
                Value::String(s) => s,
                other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
            };
            CallToolResult::success(vec![Content::text(text)])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceConfig;
    use crate::tools::registry::{ToolFuture, schema};
    use rmcp::model::ToolAnnotations;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes the strategy it was given; never touches the network.
    struct Probe;

    impl ToolHandler for Probe {
        fn name(&self) -> &str {
            "probe"
        }

        fn service(&self) -> ServiceKind {
            ServiceKind::Jira
        }

        fn description(&self) -> &str {
            "probe"
        }

        fn input_schema(&self, metadata: &RegistryMetadata) -> JsonObject {
            schema(json!({"type": "object", "x-priorities": metadata.jira_priorities}))
        }

        fn annotations(&self) -> ToolAnnotations {
            ToolAnnotations {
                title: None,
                read_only_hint: Some(true),
                destructive_hint: None,
                idempotent_hint: None,
                open_world_hint: None,
            }
        }

        fn execute(&self, args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_> {
            let ctx = ctx.clone();
            Box::pin(async move {
                match args.get("mode").and_then(Value::as_str) {
                    Some("panic") => panic!("boom"),
                    Some("sleep") => {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        Ok(Value::Null)
                    }
                    Some("fail") => Err(GatewayError::NotFound("no such issue".into())),
                    Some("fetch") => ctx.client.get_json(&["echo"], &[]).await,
                    _ => Ok(json!({
                        "auth": ctx.client.auth_kind(),
                        "passthrough": ctx.client.passthrough_header_names(),
                        "scope": ctx.cache_scope,
                    })),
                }
            })
        }
    }

    struct FixedSource {
        priorities: Vec<String>,
        calls: AtomicUsize,
        fail: bool,
    }

    impl MetadataSource for FixedSource {
        fn fetch<'a>(&'a self, _auth: &'a AuthContext) -> MetadataFuture<'a> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail {
                    return Err(GatewayError::Network("down".into()));
                }
                Ok(RegistryMetadata {
                    jira_priorities: self.priorities.clone(),
                })
            })
        }
    }

    fn config(timeout_secs: u64) -> GatewayConfig {
        let mut acting = std::collections::BTreeMap::new();
        acting.insert("alice".to_string(), "svc-alice".to_string());
        let mut mappings = crate::config::MappingsByService::new();
        mappings.insert("jira".to_string(), acting);
        GatewayConfig {
            jira: Some(ServiceConfig {
                url: "https://jira.example.com".into(),
                personal_access_token: Some("system-pat".into()),
                ..Default::default()
            }),
            substitution: Some(crate::auth::SubstitutionRules {
                http_header_name: "x-acting-user".into(),
                mappings,
            }),
            request_timeout_secs: timeout_secs,
            ..Default::default()
        }
    }

    fn dispatcher(timeout_secs: u64) -> ToolDispatcher {
        dispatcher_with(config(timeout_secs))
    }

    fn dispatcher_with(config: GatewayConfig) -> ToolDispatcher {
        let config = Arc::new(config);
        let factory = Arc::new(ClientFactory::from_config(&config).unwrap());
        ToolDispatcher::new(
            config,
            factory,
            Arc::new(ResponseCache::new(Duration::from_secs(60))),
            vec![Arc::new(Probe)],
        )
    }

    fn headers_ctx(pairs: &[(&str, &str)]) -> AuthContext {
        AuthContext::from_headers(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    fn no_args() -> JsonObject {
        JsonObject::new()
    }

    fn mode(m: &str) -> JsonObject {
        schema(json!({ "mode": m }))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_tool_execution_error() {
        let d = dispatcher(5);
        let err = d.invoke("nope", no_args(), None).await.unwrap_err();
        assert_eq!(
            err,
            GatewayError::ToolExecution {
                tool: "nope".into(),
                reason: "Tool not found".into()
            }
        );
    }

    #[tokio::test]
    async fn test_caller_credentials_build_headers_client() {
        let d = dispatcher(5);
        let auth = headers_ctx(&[("x-jira-token", "caller"), ("x-acting-user", "bob")]);
        let value = d.invoke("probe", no_args(), Some(&auth)).await.unwrap();
        assert_eq!(value["auth"], "pat");
        assert_eq!(value["passthrough"], json!(["x-acting-user"]));
    }

    #[tokio::test]
    async fn test_passthrough_only_uses_system_client() {
        let d = dispatcher(5);
        let auth = headers_ctx(&[("x-acting-user", "alice")]);
        let value = d.invoke("probe", no_args(), Some(&auth)).await.unwrap();
        assert_eq!(value["auth"], "pat");
        assert_eq!(value["passthrough"], json!(["x-acting-user"]));
    }

    /// Downstream that reports the identity headers it received.
    async fn echo_downstream() -> String {
        let app = axum::Router::new().route(
            "/echo",
            axum::routing::get(|headers: http::HeaderMap| async move {
                let get = |name: &str| {
                    headers
                        .get(name)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string)
                };
                axum::Json(json!({
                    "actingUser": get("x-acting-user"),
                    "authorization": get("authorization"),
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[tokio::test]
    async fn test_substituted_identity_reaches_downstream() {
        let mut cfg = config(5);
        if let Some(jira) = cfg.jira.as_mut() {
            jira.url = echo_downstream().await;
        }
        let d = dispatcher_with(cfg);

        let alice = headers_ctx(&[("x-acting-user", "alice")]);
        let seen = d.invoke("probe", mode("fetch"), Some(&alice)).await.unwrap();
        assert_eq!(seen["actingUser"], "svc-alice");
        assert_eq!(seen["authorization"], "Bearer system-pat");
        assert_eq!(alice.headers().get("x-acting-user").unwrap(), "alice");

        let bob = headers_ctx(&[("x-jira-token", "caller"), ("x-acting-user", "bob")]);
        let seen = d.invoke("probe", mode("fetch"), Some(&bob)).await.unwrap();
        assert_eq!(seen["actingUser"], "bob");
        assert_eq!(seen["authorization"], "Bearer caller");
    }

    #[tokio::test]
    async fn test_cache_scope_differs_per_identity() {
        let d = dispatcher(5);
        let a = d
            .invoke("probe", no_args(), Some(&headers_ctx(&[("x-jira-token", "one")])))
            .await
            .unwrap();
        let b = d
            .invoke("probe", no_args(), Some(&headers_ctx(&[("x-jira-token", "two")])))
            .await
            .unwrap();
        assert_ne!(a["scope"], b["scope"]);
    }

    #[tokio::test]
    async fn test_handler_errors_pass_through() {
        let d = dispatcher(5);
        let err = d.invoke("probe", mode("fail"), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_panicking_handler_is_server_error() {
        let d = dispatcher(5);
        let err = d.invoke("probe", mode("panic"), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Server(_)));
    }

    #[tokio::test]
    async fn test_slow_handler_times_out_as_network_error() {
        let d = dispatcher(1);
        let err = d.invoke("probe", mode("sleep"), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::Network(_)));
    }

    #[tokio::test]
    async fn test_refresh_installs_new_snapshot_only_on_change() {
        let source = Arc::new(FixedSource {
            priorities: vec!["High".into(), "Low".into()],
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let d = dispatcher(5).with_metadata_source(source.clone());
        let before = d.snapshot().await;
        let auth = headers_ctx(&[("x-jira-token", "t")]);

        let tools = d.list_tools(Some(&auth)).await;
        assert_eq!(tools[0].input_schema["x-priorities"], json!(["High", "Low"]));
        let after = d.snapshot().await;
        assert!(!Arc::ptr_eq(&before, &after));
        // The old snapshot stays complete for anyone still holding it.
        assert!(before.metadata().jira_priorities.is_empty());

        assert!(!d.refresh_metadata(&auth).await);
        assert!(Arc::ptr_eq(&after, &d.snapshot().await));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_current_snapshot() {
        let source = Arc::new(FixedSource {
            priorities: vec![],
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let d = dispatcher(5).with_metadata_source(source);
        let before = d.snapshot().await;
        let tools = d.list_tools(Some(&headers_ctx(&[("x-jira-token", "t")]))).await;
        assert_eq!(tools.len(), 1);
        assert!(Arc::ptr_eq(&before, &d.snapshot().await));
    }

    #[tokio::test]
    async fn test_list_without_auth_skips_refresh() {
        let source = Arc::new(FixedSource {
            priorities: vec!["High".into()],
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let d = dispatcher(5).with_metadata_source(source.clone());
        d.list_tools(None).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_format_result_structured_and_text() {
        let structured = format_result(ToolResultFormat::Structured, json!({"a": 1}));
        assert_eq!(structured.structured_content, Some(json!({"a": 1})));

        let wrapped = format_result(ToolResultFormat::Structured, json!([1, 2]));
        assert_eq!(wrapped.structured_content, Some(json!({"result": [1, 2]})));

        let text = format_result(ToolResultFormat::Text, json!("plain"));
        assert!(text.structured_content.is_none());
        assert_eq!(text.content.len(), 1);
    }
}
