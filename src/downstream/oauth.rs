//! OAuth2 access-token holder with refresh for system credentials.

use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::OAuth2Config;
use crate::error::GatewayError;
use crate::types::ServiceKind;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

struct TokenState {
    access_token: String,
    refresh_token: Option<String>,
}

/// Shared, refreshable OAuth2 token for one service's system credentials.
pub struct OAuth2TokenSource {
    service: ServiceKind,
    token_url: Option<String>,
    client_id: Option<String>,
    client_secret: Option<String>,
    state: RwLock<TokenState>,
    http: reqwest::Client,
}

impl OAuth2TokenSource {
    pub fn new(service: ServiceKind, config: &OAuth2Config, http: reqwest::Client) -> Self {
        Self {
            service,
            token_url: config.token_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            state: RwLock::new(TokenState {
                access_token: config.access_token.clone(),
                refresh_token: config.refresh_token.clone(),
            }),
            http,
        }
    }

    /// Current access token.
    pub async fn access_token(&self) -> String {
        self.state.read().await.access_token.clone()
    }

    pub async fn can_refresh(&self) -> bool {
        self.token_url.is_some() && self.state.read().await.refresh_token.is_some()
    }

    /// Exchange the refresh token for a new access token.
    ///
    /// `stale` is the token that was rejected. If another task already
    /// replaced it, the newer token is returned without a second exchange.
    pub async fn refresh(&self, stale: &str) -> Result<String, GatewayError> {
        let mut state = self.state.write().await;
        if state.access_token != stale {
            debug!(service = %self.service, "OAuth2 token already refreshed by another call");
            return Ok(state.access_token.clone());
        }

        let (Some(token_url), Some(refresh_token)) = (&self.token_url, &state.refresh_token)
        else {
            return Err(GatewayError::Authentication(format!(
                "{} OAuth2 token rejected and no refresh is configured",
                self.service
            )));
        };

        // the serializer is !Send and must not live across an await
        let body = {
            let mut form = url::form_urlencoded::Serializer::new(String::new());
            form.append_pair("grant_type", "refresh_token");
            form.append_pair("refresh_token", refresh_token);
            if let Some(id) = &self.client_id {
                form.append_pair("client_id", id);
            }
            if let Some(secret) = &self.client_secret {
                form.append_pair("client_secret", secret);
            }
            form.finish()
        };

        let response = self
            .http
            .post(token_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(service = %self.service, status = status.as_u16(), "OAuth2 refresh rejected");
            return Err(GatewayError::Authentication(format!(
                "{} OAuth2 refresh failed with HTTP {}",
                self.service, status
            )));
        }

        let token: TokenResponse = response.json().await?;
        state.access_token = token.access_token;
        if let Some(rotated) = token.refresh_token {
            state.refresh_token = Some(rotated);
        }
        info!(service = %self.service, "OAuth2 access token refreshed");
        Ok(state.access_token.clone())
    }
}
