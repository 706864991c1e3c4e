//! Acting-identity substitution ("impersonation") before a downstream call.

use serde::Deserialize;
use tracing::debug;

use crate::auth::context::HeaderBag;
use crate::config::MappingsByService;
use crate::types::ServiceKind;

/// Header used when the configuration does not name one.
pub const DEFAULT_ACTING_USER_HEADER: &str = "x-acting-user";

fn default_header_name() -> String {
    DEFAULT_ACTING_USER_HEADER.to_string()
}

/// Rules for rewriting the acting user, loaded once from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubstitutionRules {
    /// Header holding the acting identity (matched case-insensitively).
    #[serde(default = "default_header_name")]
    pub http_header_name: String,
    /// `service -> original identity -> substitute identity`.
    #[serde(default, alias = "mappingsByService")]
    pub mappings: MappingsByService,
}

impl SubstitutionRules {
    fn lookup(&self, service: ServiceKind, original: &str) -> Option<&str> {
        self.mappings
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(service.as_str()))
            .and_then(|(_, by_identity)| by_identity.get(original))
            .map(|s| s.as_str())
    }
}

/// Rewrite the acting identity for `service`.
///
/// Always returns a new bag; the input is never modified, so one resolved
/// context can be reused across services.
pub fn substitute(
    headers: &HeaderBag,
    service: ServiceKind,
    rules: Option<&SubstitutionRules>,
) -> HeaderBag {
    let mut out = headers.clone();
    let Some(rules) = rules else {
        return out;
    };

    let Some(key) = headers
        .keys()
        .find(|k| k.eq_ignore_ascii_case(&rules.http_header_name))
        .cloned()
    else {
        debug!(
            header = %rules.http_header_name,
            service = %service,
            "Acting-user header absent, no substitution"
        );
        return out;
    };

    if let Some(original) = headers.get(&key)
        && let Some(mapped) = rules.lookup(service, original)
    {
        debug!(header = %key, service = %service, "Substituting acting user");
        out.insert(key, mapped.to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> SubstitutionRules {
        let mut jira = std::collections::BTreeMap::new();
        jira.insert("alice".to_string(), "svc-alice".to_string());
        let mut mappings = MappingsByService::new();
        mappings.insert("jira".to_string(), jira);
        SubstitutionRules {
            http_header_name: "X-Acting-User".to_string(),
            mappings,
        }
    }

    fn bag(user: &str) -> HeaderBag {
        let mut b = HeaderBag::new();
        b.insert("x-acting-user".to_string(), user.to_string());
        b.insert("x-jira-token".to_string(), "t".to_string());
        b
    }

    #[test]
    fn test_mapped_identity_is_rewritten() {
        let out = substitute(&bag("alice"), ServiceKind::Jira, Some(&rules()));
        assert_eq!(out.get("x-acting-user").unwrap(), "svc-alice");
        assert_eq!(out.get("x-jira-token").unwrap(), "t");
    }

    #[test]
    fn test_unmapped_identity_is_unchanged() {
        let input = bag("bob");
        let out = substitute(&input, ServiceKind::Jira, Some(&rules()));
        assert_eq!(out, input);
    }

    #[test]
    fn test_mapping_is_per_service() {
        let out = substitute(&bag("alice"), ServiceKind::Confluence, Some(&rules()));
        assert_eq!(out.get("x-acting-user").unwrap(), "alice");
    }

    #[test]
    fn test_no_rules_is_noop() {
        let input = bag("alice");
        assert_eq!(substitute(&input, ServiceKind::Jira, None), input);
    }

    #[test]
    fn test_missing_header_is_noop() {
        let mut input = HeaderBag::new();
        input.insert("x-jira-token".to_string(), "t".to_string());
        assert_eq!(substitute(&input, ServiceKind::Jira, Some(&rules())), input);
    }

    #[test]
    fn test_substitution_is_pure() {
        let input = bag("alice");
        let snapshot = input.clone();
        let first = substitute(&input, ServiceKind::Jira, Some(&rules()));
        let second = substitute(&input, ServiceKind::Jira, Some(&rules()));
        assert_eq!(
            serde_json::to_vec(&first).unwrap(),
            serde_json::to_vec(&second).unwrap()
        );
        assert_eq!(input, snapshot);
    }

    #[test]
    fn test_rules_deserialize_with_default_header() {
        let rules: SubstitutionRules =
            serde_json::from_str(r#"{"mappings": {"jira": {"a": "b"}}}"#).unwrap();
        assert_eq!(rules.http_header_name, DEFAULT_ACTING_USER_HEADER);
        assert_eq!(rules.lookup(ServiceKind::Jira, "a"), Some("b"));
    }
}
