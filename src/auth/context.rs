//! Resolved credential context for one connection or request.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

/// Header bag carried by an [`AuthContext`].
///
/// Names are lower-cased; the sorted map keeps iteration (and therefore any
/// serialization or hashing of the bag) deterministic.
pub type HeaderBag = BTreeMap<String, String>;

/// Which identity a call runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// The gateway's own stored credentials.
    System,
    /// Credentials supplied by the caller on the request.
    Headers,
}

impl AuthMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMode::System => "system",
            AuthMode::Headers => "headers",
        }
    }
}

impl fmt::Display for AuthMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Auth context for a connection (stdio, SSE) or a single request (HTTP).
///
/// This struct is passed by reference through the request handling chain.
/// It is immutable once created; anything that needs a modified bag (identity
/// substitution) works on a copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    mode: AuthMode,
    headers: HeaderBag,
}

impl AuthContext {
    pub fn system(headers: HeaderBag) -> Self {
        Self {
            mode: AuthMode::System,
            headers,
        }
    }

    pub fn from_headers(headers: HeaderBag) -> Self {
        Self {
            mode: AuthMode::Headers,
            headers,
        }
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    pub fn headers(&self) -> &HeaderBag {
        &self.headers
    }

    pub fn is_system(&self) -> bool {
        self.mode == AuthMode::System
    }

    /// Header names only, for logging. Values may be secrets.
    pub fn header_names(&self) -> Vec<&str> {
        self.headers.keys().map(|k| k.as_str()).collect()
    }
}
