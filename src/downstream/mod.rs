//! Downstream REST access for Jira and Confluence.
//!
//! A [`ClientFactory`] is built once from configuration. For every tool call
//! the dispatcher picks a [`ClientStrategy`] with [`select_strategy`] and asks
//! the factory for a fresh [`DownstreamClient`]; clients are never reused
//! between calls with different effective headers.

mod client;
mod credentials;
mod factory;
mod oauth;

pub use client::{ClientAuth, DownstreamClient};
pub use credentials::{
    Credentials, is_credential_header, oauth_token_header, password_header, token_header,
    username_header,
};
pub use factory::{ClientFactory, ClientStrategy, select_strategy, strategy_for};
pub use oauth::OAuth2TokenSource;
