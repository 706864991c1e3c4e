//! Jira tool handlers.
//!
//! All calls go through the REST API v2 under the configured base URL.

use rmcp::model::{JsonObject, ToolAnnotations};
use serde_json::{Value, json};
use tracing::info;

use crate::error::GatewayError;
use crate::tools::context::{optional_str, optional_u64, required_str};
use crate::tools::registry::{RegistryMetadata, ToolFuture, ToolHandler, schema};
use crate::tools::ToolContext;
use crate::types::ServiceKind;

const API: [&str; 3] = ["rest", "api", "2"];

fn api_path<'a>(rest: &[&'a str]) -> Vec<&'a str> {
    API.iter().copied().chain(rest.iter().copied()).collect()
}

fn read_only(title: &str) -> ToolAnnotations {
    ToolAnnotations {
        title: Some(title.to_string()),
        read_only_hint: Some(true),
        destructive_hint: Some(false),
        idempotent_hint: Some(true),
        open_world_hint: Some(true),
    }
}

fn additive(title: &str) -> ToolAnnotations {
    ToolAnnotations {
        title: Some(title.to_string()),
        read_only_hint: Some(false),
        destructive_hint: Some(false),
        idempotent_hint: Some(false),
        open_world_hint: Some(true),
    }
}

/// `PROJ-123` style key: uppercase project key, dash, issue number.
pub(crate) fn is_issue_key(key: &str) -> bool {
    let Some((project, number)) = key.rsplit_once('-') else {
        return false;
    };
    let mut chars = project.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        && !number.is_empty()
        && number.chars().all(|c| c.is_ascii_digit())
}

fn issue_key_arg<'a>(args: &'a JsonObject) -> Result<&'a str, GatewayError> {
    let key = required_str(args, "issueKey")?;
    if !is_issue_key(key) {
        return Err(GatewayError::Validation(format!(
            "`issueKey` must look like PROJ-123, got `{}`",
            key
        )));
    }
    Ok(key)
}

/// Priority names from a `/priority` response, in server order.
pub(crate) fn priority_names(value: &Value) -> Vec<String> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|p| p.get("name").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Flatten the fields clients usually want out of a full issue document.
fn summarize_issue(issue: &Value) -> Value {
    let fields = &issue["fields"];
    let name = |v: &Value| v.get("name").cloned().unwrap_or(Value::Null);
    let person = |v: &Value| {
        v.get("displayName")
            .or_else(|| v.get("name"))
            .cloned()
            .unwrap_or(Value::Null)
    };
    json!({
        "key": issue["key"],
        "id": issue["id"],
        "summary": fields["summary"],
        "status": name(&fields["status"]),
        "priority": name(&fields["priority"]),
        "issueType": name(&fields["issuetype"]),
        "assignee": person(&fields["assignee"]),
        "reporter": person(&fields["reporter"]),
        "created": fields["created"],
        "updated": fields["updated"],
        "description": fields["description"],
    })
}

pub struct GetIssueHandler;

impl ToolHandler for GetIssueHandler {
    fn name(&self) -> &str {
        "jira_get_issue"
    }

    fn title(&self) -> Option<&str> {
        Some("Get Jira issue")
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Jira
    }

    fn description(&self) -> &str {
        "Fetch a single Jira issue by key and return its main fields \
         (summary, status, priority, assignee, reporter, dates, description)."
    }

    fn input_schema(&self, _metadata: &RegistryMetadata) -> JsonObject {
        schema(json!({
            "type": "object",
            "properties": {
                "issueKey": {"type": "string", "description": "Issue key, e.g. PROJ-123."},
                "fields": {
                    "type": "string",
                    "description": "Optional comma-separated list of fields to fetch.",
                },
            },
            "required": ["issueKey"],
        }))
    }

    fn annotations(&self) -> ToolAnnotations {
        read_only("Get Jira issue")
    }

    fn execute(&self, args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let key = issue_key_arg(&args)?;
            let fields = optional_str(&args, "fields")?;
            let query: Vec<(&str, &str)> = fields.map(|f| ("fields", f)).into_iter().collect();
            let issue = ctx
                .client
                .get_json(&api_path(&["issue", key]), &query)
                .await?;
            Ok(summarize_issue(&issue))
        })
    }
}

pub struct SearchIssuesHandler;

impl ToolHandler for SearchIssuesHandler {
    fn name(&self) -> &str {
        "jira_search_issues"
    }

    fn title(&self) -> Option<&str> {
        Some("Search Jira issues")
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Jira
    }

    fn description(&self) -> &str {
        "Search Jira issues with a JQL query. Returns one summary per issue."
    }

    fn input_schema(&self, _metadata: &RegistryMetadata) -> JsonObject {
        schema(json!({
            "type": "object",
            "properties": {
                "jql": {"type": "string", "description": "JQL query."},
                "maxResults": {"type": "integer", "minimum": 1, "maximum": 100, "default": 50},
                "startAt": {"type": "integer", "minimum": 0, "default": 0},
            },
            "required": ["jql"],
        }))
    }

    fn annotations(&self) -> ToolAnnotations {
        read_only("Search Jira issues")
    }

    fn execute(&self, args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let jql = required_str(&args, "jql")?;
            let max_results = optional_u64(&args, "maxResults", 1, 100)?
                .unwrap_or(50)
                .to_string();
            let start_at = optional_u64(&args, "startAt", 0, u32::MAX as u64)?
                .unwrap_or(0)
                .to_string();

            let result = ctx
                .client
                .get_json(
                    &api_path(&["search"]),
                    &[
                        ("jql", jql),
                        ("maxResults", max_results.as_str()),
                        ("startAt", start_at.as_str()),
                    ],
                )
                .await?;
            let issues: Vec<Value> = result["issues"]
                .as_array()
                .map(|items| items.iter().map(summarize_issue).collect())
                .unwrap_or_default();
            info!(parent: &ctx.span, count = issues.len(), "Jira search returned");
            Ok(json!({
                "total": result["total"],
                "startAt": result["startAt"],
                "maxResults": result["maxResults"],
                "issues": issues,
            }))
        })
    }
}

pub struct CreateIssueHandler;

impl ToolHandler for CreateIssueHandler {
    fn name(&self) -> &str {
        "jira_create_issue"
    }

    fn title(&self) -> Option<&str> {
        Some("Create Jira issue")
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Jira
    }

    fn description(&self) -> &str {
        "Create a Jira issue in a project. Priority must be one of the names \
         offered by the Jira server."
    }

    fn input_schema(&self, metadata: &RegistryMetadata) -> JsonObject {
        let mut priority = json!({
            "type": "string",
            "description": "Priority name.",
        });
        if !metadata.jira_priorities.is_empty() {
            priority["enum"] = json!(metadata.jira_priorities);
        }
        schema(json!({
            "type": "object",
            "properties": {
                "projectKey": {"type": "string", "description": "Project key, e.g. PROJ."},
                "summary": {"type": "string"},
                "issueType": {"type": "string", "default": "Task"},
                "description": {"type": "string"},
                "priority": priority,
            },
            "required": ["projectKey", "summary"],
        }))
    }

    fn annotations(&self) -> ToolAnnotations {
        additive("Create Jira issue")
    }

    fn execute(&self, args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let project = required_str(&args, "projectKey")?;
            let summary = required_str(&args, "summary")?;
            let issue_type = optional_str(&args, "issueType")?.unwrap_or("Task");
            let description = optional_str(&args, "description")?;
            let priority = optional_str(&args, "priority")?;

            let known = &ctx.metadata.jira_priorities;
            if let Some(p) = priority
                && !known.is_empty()
                && !known.iter().any(|k| k == p)
            {
                return Err(GatewayError::Validation(format!(
                    "unknown priority `{}`; expected one of {}",
                    p,
                    known.join(", ")
                )));
            }

            let mut fields = json!({
                "project": {"key": project},
                "summary": summary,
                "issuetype": {"name": issue_type},
            });
            if let Some(d) = description {
                fields["description"] = json!(d);
            }
            if let Some(p) = priority {
                fields["priority"] = json!({"name": p});
            }

            let created = ctx
                .client
                .post_json(&api_path(&["issue"]), &json!({"fields": fields}))
                .await?;
            let key = created["key"].as_str().ok_or_else(|| {
                GatewayError::Server("Jira did not return the new issue key".to_string())
            })?;
            let url = ctx.client.endpoint(&["browse", key], &[])?;
            info!(parent: &ctx.span, issue = key, "Jira issue created");
            Ok(json!({
                "key": key,
                "id": created["id"],
                "url": url.as_str(),
            }))
        })
    }
}

pub struct AddCommentHandler;

impl ToolHandler for AddCommentHandler {
    fn name(&self) -> &str {
        "jira_add_comment"
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Jira
    }

    fn description(&self) -> &str {
        "Add a comment to a Jira issue."
    }

    fn input_schema(&self, _metadata: &RegistryMetadata) -> JsonObject {
        schema(json!({
            "type": "object",
            "properties": {
                "issueKey": {"type": "string"},
                "body": {"type": "string", "description": "Comment text (wiki markup)."},
            },
            "required": ["issueKey", "body"],
        }))
    }

    fn annotations(&self) -> ToolAnnotations {
        additive("Comment on Jira issue")
    }

    fn execute(&self, args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let key = issue_key_arg(&args)?;
            let body = required_str(&args, "body")?;
            let comment = ctx
                .client
                .post_json(&api_path(&["issue", key, "comment"]), &json!({"body": body}))
                .await?;
            Ok(json!({
                "issueKey": key,
                "id": comment["id"],
                "created": comment["created"],
            }))
        })
    }
}

pub struct ListPrioritiesHandler;

impl ToolHandler for ListPrioritiesHandler {
    fn name(&self) -> &str {
        "jira_list_priorities"
    }

    fn service(&self) -> ServiceKind {
        ServiceKind::Jira
    }

    fn description(&self) -> &str {
        "List the issue priorities configured on the Jira server."
    }

    fn input_schema(&self, _metadata: &RegistryMetadata) -> JsonObject {
        schema(json!({"type": "object", "properties": {}}))
    }

    fn annotations(&self) -> ToolAnnotations {
        read_only("List Jira priorities")
    }

    fn execute(&self, _args: JsonObject, ctx: &ToolContext) -> ToolFuture<'_> {
        let ctx = ctx.clone();
        Box::pin(async move {
            let raw = ctx.cached_get_json(&api_path(&["priority"]), &[]).await?;
            let priorities: Vec<Value> = raw
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .map(|p| {
                            json!({
                                "id": p["id"],
                                "name": p["name"],
                                "description": p["description"],
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            Ok(json!({ "priorities": priorities }))
        })
    }
}
