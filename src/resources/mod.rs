//! Read-only resources exposed next to the tools.
//!
//! - `gateway://tools`: summary of the current registry snapshot
//! - `jira://priorities`: live Jira priority list, fetched with the caller's
//!   credentials exactly as a Jira tool call would be

use rmcp::model::{AnnotateAble, JsonObject, ListResourcesResult, RawResource};
use serde_json::{Value, json};

use crate::auth::AuthContext;
use crate::error::GatewayError;
use crate::tools::ToolDispatcher;

pub const TOOLS_URI: &str = "gateway://tools";
pub const PRIORITIES_URI: &str = "jira://priorities";

const JSON_MIME: &str = "application/json";

/// Maximum URI length accepted on `resources/read`.
const MAX_URI_LENGTH: usize = 4096;

fn resource(uri: &str, name: &str, description: &str) -> rmcp::model::Resource {
    RawResource {
        uri: uri.to_string(),
        name: name.to_string(),
        title: None,
        description: Some(description.to_string()),
        mime_type: Some(JSON_MIME.to_string()),
        size: None,
        icons: None,
        meta: None,
    }
    .no_annotation()
}

pub fn list_resources() -> ListResourcesResult {
    ListResourcesResult {
        meta: None,
        resources: vec![
            resource(TOOLS_URI, "tools", "Tools currently registered on this gateway."),
            resource(PRIORITIES_URI, "jira-priorities", "Issue priorities defined in Jira."),
        ],
        next_cursor: None,
    }
}

/// Render one resource as a `resources/read` result.
pub async fn read_resource(
    uri: &str,
    dispatcher: &ToolDispatcher,
    auth: Option<&AuthContext>,
) -> Result<Value, GatewayError> {
    if uri.is_empty() || uri.len() > MAX_URI_LENGTH {
        return Err(GatewayError::Validation("invalid resource uri".to_string()));
    }

    let body = match uri {
        TOOLS_URI => dispatcher.snapshot().await.summary(),
        PRIORITIES_URI => {
            dispatcher
                .invoke("jira_list_priorities", JsonObject::new(), auth)
                .await?
        }
        other => return Err(GatewayError::NotFound(format!("resource `{}`", other))),
    };

    let text = serde_json::to_string_pretty(&body)
        .map_err(|e| GatewayError::Server(format!("rendering resource: {}", e)))?;
    Ok(json!({
        "contents": [{
            "uri": uri,
            "mimeType": JSON_MIME,
            "text": text,
        }]
    }))
}
