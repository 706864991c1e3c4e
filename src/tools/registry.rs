//! Tool handler trait and the immutable registry snapshot.
//!
//! A [`ToolRegistry`] is built in one step from the handler list and the
//! current [`RegistryMetadata`]; it is never mutated afterwards. The
//! dispatcher replaces the whole snapshot when metadata changes.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use rmcp::model::{JsonObject, Tool as McpTool, ToolAnnotations};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::error::GatewayError;
use crate::tools::ToolContext;
use crate::types::{ServiceKind, ToolName};

/// Downstream state that shapes tool schemas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMetadata {
    /// Jira priority names, in server order.
    pub jira_priorities: Vec<String>,
}

/// Future returned by [`ToolHandler::execute`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, GatewayError>> + Send + 'a>>;

/// A tool backed by one downstream service.
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;

    fn title(&self) -> Option<&str> {
        None
    }

    /// Service whose credentials and base URL this tool uses.
    fn service(&self) -> ServiceKind;

    fn description(&self) -> &str;

    /// Input schema; may depend on live downstream metadata.
    fn input_schema(&self, metadata: &RegistryMetadata) -> JsonObject;

    fn annotations(&self) -> ToolAnnotations;

    /// Run the tool. Errors are already classified.
    fn execute(&self, args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_>;
}

/// One registered tool.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: ToolName,
    pub service: ServiceKind,
    pub tool: McpTool,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolDescriptor {
    fn new(handler: Arc<dyn ToolHandler>, metadata: &RegistryMetadata) -> Self {
        let tool = McpTool {
            name: Cow::Owned(handler.name().to_string()),
            title: handler.title().map(|s| s.to_string()),
            description: Some(Cow::Owned(handler.description().to_string())),
            input_schema: Arc::new(handler.input_schema(metadata)),
            output_schema: None,
            annotations: Some(handler.annotations()),
            icons: None,
            meta: None,
        };
        Self {
            name: ToolName::new(handler.name()),
            service: handler.service(),
            tool,
            handler,
        }
    }
}

/// Immutable name → descriptor map.
pub struct ToolRegistry {
    tools: BTreeMap<ToolName, ToolDescriptor>,
    metadata: Arc<RegistryMetadata>,
}

impl ToolRegistry {
    pub fn build(handlers: &[Arc<dyn ToolHandler>], metadata: RegistryMetadata) -> Self {
        let mut tools = BTreeMap::new();
        for handler in handlers {
            let descriptor = ToolDescriptor::new(handler.clone(), &metadata);
            if tools.contains_key(&descriptor.name) {
                warn!(tool = %descriptor.name, "Duplicate tool name, keeping the first handler");
                continue;
            }
            tools.insert(descriptor.name.clone(), descriptor);
        }
        Self {
            tools,
            metadata: Arc::new(metadata),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name)
    }

    pub fn metadata(&self) -> &Arc<RegistryMetadata> {
        &self.metadata
    }

    /// Tools in name order, as sent on `tools/list`.
    pub fn list_tools(&self) -> Vec<McpTool> {
        self.tools.values().map(|d| d.tool.clone()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|n| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Compact JSON description of every tool.
    pub fn summary(&self) -> Value {
        let tools: Vec<Value> = self
            .tools
            .values()
            .map(|d| {
                json!({
                    "name": d.name,
                    "service": d.service,
                    "description": d.tool.description,
                    "readOnly": d.tool.annotations.as_ref().and_then(|a| a.read_only_hint),
                })
            })
            .collect();
        json!({ "tools": tools, "metadata": &*self.metadata })
    }
}

/// Unwrap a `json!` object literal into a schema map.
pub(crate) fn schema(value: Value) -> JsonObject {
    match value {
        Value::Object(map) => map,
        _ => JsonObject::new(),
    }
}
