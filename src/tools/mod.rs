//! Tool handlers and the dispatcher that runs them.
//!
//! Handlers implement [`ToolHandler`] and are collected into an immutable
//! [`ToolRegistry`] snapshot. The [`ToolDispatcher`] owns the current
//! snapshot, swaps in a rebuilt one when live metadata (Jira priorities)
//! changes, and builds a request-scoped [`ToolContext`] for every call.

mod confluence;
mod context;
mod dispatcher;
mod jira;
mod registry;

use std::sync::Arc;

pub use context::{ToolContext, optional_str, optional_u64, required_str};
pub use dispatcher::{
    JiraMetadataSource, MetadataFuture, MetadataSource, ToolDispatcher, format_result,
};
pub use registry::{RegistryMetadata, ToolDescriptor, ToolFuture, ToolHandler, ToolRegistry};

/// Every built-in tool.
pub fn default_handlers() -> Vec<Arc<dyn ToolHandler>> {
    vec![
        Arc::new(jira::GetIssueHandler),
        Arc::new(jira::SearchIssuesHandler),
        Arc::new(jira::CreateIssueHandler),
        Arc::new(jira::AddCommentHandler),
        Arc::new(jira::ListPrioritiesHandler),
        Arc::new(confluence::GetPageHandler),
        Arc::new(confluence::SearchHandler),
        Arc::new(confluence::CreatePageHandler),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_handlers_have_unique_names() {
        let handlers = default_handlers();
        let registry = ToolRegistry::build(&handlers, RegistryMetadata::default());
        assert_eq!(registry.len(), handlers.len());
        assert!(registry.get("jira_create_issue").is_some());
        assert!(registry.get("confluence_search").is_some());
    }

    #[test]
    fn test_every_tool_has_an_object_schema() {
        let registry = ToolRegistry::build(&default_handlers(), RegistryMetadata::default());
        for tool in registry.list_tools() {
            assert_eq!(tool.input_schema["type"], "object", "{}", tool.name);
            assert!(tool.annotations.is_some());
        }
    }
}
