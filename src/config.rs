use anyhow::{Context, bail};
use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, path::Path, path::PathBuf};
use url::Url;

use crate::auth::SubstitutionRules;
use crate::downstream::Credentials;
use crate::types::ServiceKind;

const DEFAULT_CONFIG_FILE: &str = "gateway.json";

/// Process-wide gateway configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewayConfig {
    /// Static secret that unlocks system credentials via `x-server-token`.
    pub server_token: Option<String>,
    pub jira: Option<ServiceConfig>,
    pub confluence: Option<ServiceConfig>,
    pub rate_limit: RateLimitConfig,
    pub substitution: Option<SubstitutionRules>,
    pub tool_result_format: ToolResultFormat,
    pub request_timeout_secs: u64,
    pub cache_ttl_secs: u64,
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_token: None,
            jira: None,
            confluence: None,
            rate_limit: RateLimitConfig::default(),
            substitution: None,
            tool_result_format: ToolResultFormat::Structured,
            request_timeout_secs: 30,
            cache_ttl_secs: 300,
            bind: "127.0.0.1:3000".to_string(),
        }
    }
}

/// Connection and system credentials for one downstream service.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    pub url: String,
    #[serde(default)]
    pub personal_access_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub oauth2: Option<OAuth2Config>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2Config {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 100,
        }
    }
}

/// How tool results are shaped on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolResultFormat {
    /// `{ structuredContent: {...} }`
    Structured,
    /// `{ content: [{ type: "text", text }] }`
    Text,
}

impl ServiceConfig {
    /// System credentials, first configured wins: PAT, then basic, then OAuth2.
    pub fn system_credentials(&self) -> Option<Credentials> {
        if let Some(token) = self.personal_access_token.as_ref().filter(|t| !t.is_empty()) {
            return Some(Credentials::PersonalAccessToken(token.clone()));
        }
        if let (Some(username), Some(password)) = (&self.username, &self.password)
            && !username.is_empty()
        {
            return Some(Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            });
        }
        self.oauth2
            .as_ref()
            .filter(|o| !o.access_token.is_empty())
            .map(|o| Credentials::OAuth2(o.access_token.clone()))
    }

    pub fn base_url(&self) -> anyhow::Result<Url> {
        let url = Url::parse(&self.url).with_context(|| format!("invalid url `{}`", self.url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!("url `{}` must use http or https", self.url);
        }
        Ok(url)
    }
}

impl GatewayConfig {
    pub fn service(&self, service: ServiceKind) -> Option<&ServiceConfig> {
        match service {
            ServiceKind::Jira => self.jira.as_ref(),
            ServiceKind::Confluence => self.confluence.as_ref(),
        }
    }

    /// Reject configurations that would only fail later, per request.
    pub fn validate(&self) -> anyhow::Result<()> {
        for service in ServiceKind::ALL {
            if let Some(cfg) = self.service(service) {
                cfg.base_url()
                    .with_context(|| format!("service `{}`", service))?;
                if let Some(oauth) = &cfg.oauth2
                    && oauth.refresh_token.is_some() != oauth.token_url.is_some()
                {
                    bail!(
                        "service `{}`: oauth2 refresh needs both refreshToken and tokenUrl",
                        service
                    );
                }
            }
        }
        if self.rate_limit.window_ms == 0 || self.rate_limit.max_requests == 0 {
            bail!("rateLimit.windowMs and rateLimit.maxRequests must be non-zero");
        }
        if self.request_timeout_secs == 0 {
            bail!("requestTimeoutSecs must be non-zero");
        }
        Ok(())
    }

    /// Parse a configuration document, expanding `${VAR}` references first.
    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let cfg: GatewayConfig = serde_json::from_value(expand_value(value))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Locate the configuration file.
///
/// Returns `None` when nothing was requested explicitly and the default file
/// does not exist.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }

    if let Ok(p) = env::var("GATEWAY_CONFIG") {
        return Some(PathBuf::from(p));
    }

    let candidate = PathBuf::from(DEFAULT_CONFIG_FILE);
    if candidate.exists() {
        return Some(candidate);
    }

    None
}

pub fn load_config(explicit: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    let Some(path) = resolve_config_path(explicit) else {
        tracing::info!("No gateway config file found, using defaults");
        return Ok(GatewayConfig::default());
    };
    let raw = fs::read_to_string(&path)
        .with_context(|| format!("reading config file {}", path.display()))?;
    GatewayConfig::from_json_str(&raw)
        .with_context(|| format!("parsing config file {}", path.display()))
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_value(value: serde_json::Value) -> serde_json::Value {
    use serde_json::Value;
    match value {
        Value::String(s) => Value::String(expand_env_vars(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(expand_value).collect()),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, expand_value(v)))
                .collect(),
        ),
        other => other,
    }
}

/// Substitution mappings keyed by service name, as written in the config file.
pub type MappingsByService = BTreeMap<String, BTreeMap<String, String>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = GatewayConfig::default();
        assert_eq!(cfg.request_timeout_secs, 30);
        assert_eq!(cfg.rate_limit.window_ms, 60_000);
        assert_eq!(cfg.tool_result_format, ToolResultFormat::Structured);
        assert!(cfg.server_token.is_none());
    }

    #[test]
    fn test_parse_full_document() {
        let raw = r#"{
            "serverToken": "abc",
            "jira": {"url": "https://jira.example.com", "personalAccessToken": "pat"},
            "confluence": {"url": "https://wiki.example.com", "username": "u", "password": "p"},
            "rateLimit": {"windowMs": 1000, "maxRequests": 2},
            "substitution": {
                "httpHeaderName": "x-acting-user",
                "mappings": {"jira": {"alice": "svc-alice"}}
            },
            "toolResultFormat": "text"
        }"#;
        let cfg = GatewayConfig::from_json_str(raw).unwrap();
        assert_eq!(cfg.server_token.as_deref(), Some("abc"));
        assert_eq!(cfg.rate_limit.max_requests, 2);
        assert_eq!(cfg.tool_result_format, ToolResultFormat::Text);
        assert!(matches!(
            cfg.jira.unwrap().system_credentials(),
            Some(Credentials::PersonalAccessToken(_))
        ));
        assert!(matches!(
            cfg.confluence.unwrap().system_credentials(),
            Some(Credentials::Basic { .. })
        ));
    }

    #[test]
    fn test_credential_precedence() {
        let cfg = ServiceConfig {
            url: "https://jira.example.com".to_string(),
            personal_access_token: Some("pat".to_string()),
            username: Some("u".to_string()),
            password: Some("p".to_string()),
            oauth2: Some(OAuth2Config {
                access_token: "oauth".to_string(),
                ..Default::default()
            }),
        };
        assert_eq!(
            cfg.system_credentials(),
            Some(Credentials::PersonalAccessToken("pat".to_string()))
        );

        let basic_and_oauth = ServiceConfig {
            personal_access_token: None,
            ..cfg.clone()
        };
        assert!(matches!(
            basic_and_oauth.system_credentials(),
            Some(Credentials::Basic { .. })
        ));

        let oauth_only = ServiceConfig {
            personal_access_token: None,
            username: None,
            ..cfg
        };
        assert_eq!(
            oauth_only.system_credentials(),
            Some(Credentials::OAuth2("oauth".to_string()))
        );
    }

    #[test]
    fn test_rejects_bad_url() {
        let raw = r#"{"jira": {"url": "ftp://jira.example.com"}}"#;
        assert!(GatewayConfig::from_json_str(raw).is_err());
    }

    #[test]
    fn test_rejects_half_configured_refresh() {
        let raw = r#"{"jira": {"url": "https://j.example.com",
            "oauth2": {"accessToken": "a", "refreshToken": "r"}}}"#;
        assert!(GatewayConfig::from_json_str(raw).is_err());
    }

    #[test]
    fn test_rejects_zero_rate_limit() {
        let raw = r#"{"rateLimit": {"windowMs": 0, "maxRequests": 5}}"#;
        assert!(GatewayConfig::from_json_str(raw).is_err());
    }

    #[test]
    fn test_expand_env_vars_unknown_left_verbatim() {
        let out = expand_env_vars("token=${GATEWAY_TEST_SURELY_UNSET_VAR}");
        assert_eq!(out, "token=${GATEWAY_TEST_SURELY_UNSET_VAR}");
    }

    #[test]
    fn test_expand_env_vars_known() {
        let path = env::var("PATH").unwrap_or_default();
        assert_eq!(expand_env_vars("${PATH}"), path);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"serverToken": "from-file", "requestTimeoutSecs": 5}}"#
        )
        .unwrap();
        let cfg = load_config(Some(file.path())).unwrap();
        assert_eq!(cfg.server_token.as_deref(), Some("from-file"));
        assert_eq!(cfg.request_timeout_secs, 5);
    }

    #[test]
    fn test_load_config_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(load_config(Some(&missing)).is_err());
    }
}
