//! Confluence tool handlers (REST content API).

use rmcp::model::{JsonObject, ToolAnnotations};
use serde_json::{Value, json};

use crate::error::GatewayError;
use crate::tools::context::{optional_str, optional_u64, required_str};
use crate::tools::registry::{RegistryMetadata, ToolFuture, ToolHandler, schema};
use crate::tools::ToolContext;
use crate::types::ServiceKind;

const DEFAULT_EXPAND: &str = "body.storage,version,space";

fn page_id_arg<'a>(args: &'a JsonObject, field: &str) -> Result<&'a str, GatewayError> {
    let id = required_str(args, field)?;
    if !id.chars().all(|c| c.is_ascii_digit()) {
        return Err(GatewayError::Validation(format!(
            "`{}` must be a numeric page id",
            field
        )));
    }
    Ok(id)
}

fn summarize_page(page: &Value) -> Value {
    json!({
        "id": page["id"],
        "title": page["title"],
        "type": page["type"],
        "space": page["space"]["key"],
        "version": page["version"]["number"],
    })
}

pub struct GetPageHandler;

impl ToolHandler for GetPageHandler {
    fn name(&self) -> &str {
        "confluence_get_page"
    }

    fn title(&self) -> Option<&str> {
        Some("Get Confluence page")
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Confluence
    }

    fn description(&self) -> &str {
        "Fetch a Confluence page by id, including its storage-format body."
    }

    fn input_schema(&self, _metadata: &RegistryMetadata) -> JsonObject {
        schema(json!({
            "type": "object",
            "properties": {
                "pageId": {"type": "string", "description": "Numeric page id."},
                "expand": {"type": "string", "default": DEFAULT_EXPAND},
            },
            "required": ["pageId"],
        }))
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations {
            title: Some("Get Confluence page".to_string()),
            read_only_hint: Some(true),
            destructive_hint: Some(false),
            idempotent_hint: Some(true),
            open_world_hint: Some(true),
        }
    }

    fn execute(&self, args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let id = page_id_arg(&args, "pageId")?;
            let expand = optional_str(&args, "expand")?.unwrap_or(DEFAULT_EXPAND);
            let page = ctx
                .client
                .get_json(&["rest", "api", "content", id], &[("expand", expand)])
                .await?;
            let mut out = summarize_page(&page);
            out["body"] = page["body"]["storage"]["value"].clone();
            Ok(out)
        })
    }
}

pub struct SearchHandler;

impl ToolHandler for SearchHandler {
    fn name(&self) -> &str {
        "confluence_search"
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Confluence
    }

    fn description(&self) -> &str {
        "Search Confluence content with a CQL query."
    }

    fn input_schema(&self, _metadata: &RegistryMetadata) -> JsonObject {
        schema(json!({
            "type": "object",
            "properties": {
                "cql": {"type": "string", "description": "CQL query, e.g. space = DEV and title ~ \"release\"."},
                "limit": {"type": "integer", "minimum": 1, "maximum": 100, "default": 25},
            },
            "required": ["cql"],
        }))
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations {
            title: Some("Search Confluence".to_string()),
            read_only_hint: Some(true),
            destructive_hint: Some(false),
            idempotent_hint: Some(true),
            open_world_hint: Some(true),
        }
    }

    fn execute(&self, args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let cql = required_str(&args, "cql")?;
            let limit = optional_u64(&args, "limit", 1, 100)?
                .unwrap_or(25)
                .to_string();
            let found = ctx
                .client
                .get_json(
                    &["rest", "api", "content", "search"],
                    &[("cql", cql), ("limit", limit.as_str())],
                )
                .await?;
            let results: Vec<Value> = found["results"]
                .as_array()
                .map(|items| items.iter().map(summarize_page).collect())
                .unwrap_or_default();
            Ok(json!({ "size": results.len(), "results": results }))
        })
    }
}

pub struct CreatePageHandler;

impl ToolHandler for CreatePageHandler {
    fn name(&self) -> &str {
        "confluence_create_page"
    }

    fn title(&self) -> Option<&str> {
        Some("Create Confluence page")
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Confluence
    }

    fn description(&self) -> &str {
        "Create a Confluence page in a space, optionally under a parent page. \
         The body is Confluence storage format (XHTML)."
    }

    fn input_schema(&self, _metadata: &RegistryMetadata) -> JsonObject {
        schema(json!({
            "type": "object",
            "properties": {
                "spaceKey": {"type": "string"},
                "title": {"type": "string"},
                "body": {"type": "string", "description": "Storage-format page body."},
                "parentId": {"type": "string", "description": "Optional parent page id."},
            },
            "required": ["spaceKey", "title", "body"],
        }))
    }

    fn annotations(&self) -> ToolAnnotations {
        ToolAnnotations {
            title: Some("Create Confluence page".to_string()),
            read_only_hint: Some(false),
            destructive_hint: Some(false),
            idempotent_hint: Some(false),
            open_world_hint: Some(true),
        }
    }

    fn execute(&self, args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let space = required_str(&args, "spaceKey")?;
            let title = required_str(&args, "title")?;
            let body = required_str(&args, "body")?;
            let parent = match args.get("parentId") {
                None | Some(Value::Null) => None,
                Some(_) => Some(page_id_arg(&args, "parentId")?),
            };

            let mut request = json!({
                "type": "page",
                "title": title,
                "space": {"key": space},
                "body": {"storage": {"value": body, "representation": "storage"}},
            });
            if let Some(parent) = parent {
                request["ancestors"] = json!([{"id": parent}]);
            }

            let page = ctx
                .client
                .post_json(&["rest", "api", "content"], &request)
                .await?;
            let id = page["id"].as_str().ok_or_else(|| {
                GatewayError::Server("Confluence did not return the new page id".to_string())
            })?;
            let url = ctx
                .client
                .endpoint(&["pages", "viewpage.action"], &[("pageId", id)])?;
            Ok(json!({
                "id": id,
                "title": page["title"],
                "url": url.as_str(),
            }))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_id_must_be_numeric() {
        let args = json!({"pageId": "12a"}).as_object().cloned().unwrap();
        assert!(matches!(
            page_id_arg(&args, "pageId"),
            Err(GatewayError::Validation(_))
        ));
        let args = json!({"pageId": "12345"}).as_object().cloned().unwrap();
        assert_eq!(page_id_arg(&args, "pageId").unwrap(), "12345");
    }

    #[test]
    fn test_summarize_page() {
        let page = json!({
            "id": "42",
            "title": "Runbook",
            "type": "page",
            "space": {"key": "OPS"},
            "version": {"number": 3},
        });
        let s = summarize_page(&page);
        assert_eq!(s["space"], "OPS");
        assert_eq!(s["version"], 3);
    }
}
