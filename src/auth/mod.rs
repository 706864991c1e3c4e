//! Authentication context module.
//!
//! This module decides which credentials apply to each inbound call and
//! optionally rewrites the acting identity before the call goes downstream.
//!
//! - **SYSTEM mode**: the caller presented the configured server token in
//!   `x-server-token`; the gateway's own credentials are used.
//! - **HEADERS mode**: everything else; only the caller's reserved `x-`
//!   headers are carried forward.
//!
//! ## Security Model
//!
//! - Contexts are values passed down the call chain, never stored in global state
//! - A HEADERS-mode bag never contains system credentials
//! - Substitution always produces a copy of the bag
//!
//! ## Usage
//!
//! ```ignore
//! let resolver = CredentialResolver::from_config(&config);
//! let ctx = resolver.resolve_http(&request_headers)?;
//! let jira_headers = substitute(ctx.headers(), ServiceKind::Jira, rules.as_ref());
//! ```

mod context;
mod resolver;
mod substitution;

pub use context::{AuthContext, AuthMode, HeaderBag};
pub use resolver::{
    CredentialResolver, RESERVED_HEADER_PREFIX, SERVER_TOKEN_HEADER, extract_prefixed_headers,
    http_header_pairs, system_credential_headers,
};
pub use substitution::{DEFAULT_ACTING_USER_HEADER, SubstitutionRules, substitute};
