//! NewType wrappers for strong typing throughout the gateway.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a session ID where a rate-limit key is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Tool name as exposed to MCP clients (e.g., "jira_get_issue").
    ///
    /// Unique within a registry snapshot.
    ToolName
);

newtype_string!(
    /// Identifier of an open SSE stream, handed to the client in the
    /// `endpoint` event and echoed back on every `POST /messages`.
    SessionId
);

newtype_string!(
    /// Budget key for the rate limiter.
    ///
    /// Built as `{mode}-{clientAddress}` for HTTP and SSE callers; stdio uses
    /// a single constant key.
    RateLimitKey
);

/// Downstream service a tool or credential belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    Jira,
    Confluence,
}

impl ServiceKind {
    /// All known services, in a stable order.
    pub const ALL: [ServiceKind; 2] = [ServiceKind::Jira, ServiceKind::Confluence];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceKind::Jira => "jira",
            ServiceKind::Confluence => "confluence",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "jira" => Ok(ServiceKind::Jira),
            "confluence" => Ok(ServiceKind::Confluence),
            other => Err(format!("unknown service: {}", other)),
        }
    }
}
