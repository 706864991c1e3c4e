//! Downstream credentials and their reserved-header representation.

use std::fmt;

use reqwest::RequestBuilder;

use crate::auth::HeaderBag;
use crate::types::ServiceKind;

/// Credentials for one downstream service.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Personal access token, sent as a bearer token.
    PersonalAccessToken(String),
    Basic { username: String, password: String },
    /// OAuth2 access token, sent as a bearer token.
    OAuth2(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PersonalAccessToken(_) => f.write_str("PersonalAccessToken(***)"),
            Self::Basic { username, .. } => write!(f, "Basic({}, ***)", username),
            Self::OAuth2(_) => f.write_str("OAuth2(***)"),
        }
    }
}

pub fn token_header(service: ServiceKind) -> String {
    format!("x-{}-token", service)
}

pub fn username_header(service: ServiceKind) -> String {
    format!("x-{}-username", service)
}

pub fn password_header(service: ServiceKind) -> String {
    format!("x-{}-password", service)
}

pub fn oauth_token_header(service: ServiceKind) -> String {
    format!("x-{}-oauth-token", service)
}

/// Whether `name` is a credential header of any known service.
pub fn is_credential_header(name: &str) -> bool {
    ServiceKind::ALL.iter().any(|&service| {
        [
            token_header(service),
            username_header(service),
            password_header(service),
            oauth_token_header(service),
        ]
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
    })
}

impl Credentials {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PersonalAccessToken(_) => "pat",
            Self::Basic { .. } => "basic",
            Self::OAuth2(_) => "oauth2",
        }
    }

    /// Reserved headers representing these credentials for `service`.
    pub fn to_headers(&self, service: ServiceKind) -> Vec<(String, String)> {
        match self {
            Self::PersonalAccessToken(token) => vec![(token_header(service), token.clone())],
            Self::Basic { username, password } => vec![
                (username_header(service), username.clone()),
                (password_header(service), password.clone()),
            ],
            Self::OAuth2(token) => vec![(oauth_token_header(service), token.clone())],
        }
    }

    /// Parse service credentials out of a header bag.
    ///
    /// Same precedence as system configuration: PAT, then basic (both halves
    /// required), then OAuth2.
    pub fn from_headers(service: ServiceKind, headers: &HeaderBag) -> Option<Self> {
        let get = |name: String| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&name))
                .map(|(_, v)| v.clone())
                .filter(|v| !v.is_empty())
        };

        if let Some(token) = get(token_header(service)) {
            return Some(Self::PersonalAccessToken(token));
        }
        if let (Some(username), Some(password)) =
            (get(username_header(service)), get(password_header(service)))
        {
            return Some(Self::Basic { username, password });
        }
        get(oauth_token_header(service)).map(Self::OAuth2)
    }

    /// Attach these credentials to an outgoing request.
    pub fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Self::PersonalAccessToken(token) | Self::OAuth2(token) => request.bearer_auth(token),
            Self::Basic { username, password } => request.basic_auth(username, Some(password)),
        }
    }
}
