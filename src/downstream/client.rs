//! Per-call HTTP client for one downstream service.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderName, HeaderValue, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use super::credentials::Credentials;
use super::oauth::OAuth2TokenSource;
use crate::auth::HeaderBag;
use crate::error::GatewayError;
use crate::types::ServiceKind;

/// How a [`DownstreamClient`] authenticates.
#[derive(Clone)]
pub enum ClientAuth {
    /// Fixed credentials, either caller-supplied or static system ones.
    Static(Credentials),
    /// System OAuth2 credentials that may be refreshed on a 401.
    OAuth2(Arc<OAuth2TokenSource>),
}

impl ClientAuth {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Static(creds) => creds.kind(),
            Self::OAuth2(_) => "oauth2",
        }
    }
}

/// Request-scoped client. Cheap to build; the connection pool lives in the
/// shared `reqwest::Client`.
#[derive(Clone)]
pub struct DownstreamClient {
    http: reqwest::Client,
    service: ServiceKind,
    base_url: Url,
    auth: ClientAuth,
    passthrough: Vec<(HeaderName, HeaderValue)>,
    timeout: Duration,
}

impl DownstreamClient {
    pub fn new(
        http: reqwest::Client,
        service: ServiceKind,
        base_url: Url,
        auth: ClientAuth,
        passthrough: &HeaderBag,
        timeout: Duration,
    ) -> Self {
        let passthrough = passthrough
            .iter()
            .filter_map(|(name, value)| {
                match (
                    HeaderName::from_bytes(name.as_bytes()),
                    HeaderValue::from_str(value),
                ) {
                    (Ok(n), Ok(v)) => Some((n, v)),
                    _ => {
                        warn!(header = %name, "Dropping passthrough header that is not valid HTTP");
                        None
                    }
                }
            })
            .collect();

        Self {
            http,
            service,
            base_url,
            auth,
            passthrough,
            timeout,
        }
    }

    pub fn service(&self) -> ServiceKind {
        self.service
    }

    pub fn auth_kind(&self) -> &'static str {
        self.auth.kind()
    }

    pub fn passthrough_header_names(&self) -> Vec<&str> {
        self.passthrough.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Base URL extended by `segments`, each percent-encoded as one path segment.
    pub fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, GatewayError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                GatewayError::Server(format!("{} base url cannot carry a path", self.service))
            })?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    pub async fn get_json(
        &self,
        segments: &[&str],
        query: &[(&str, &str)],
    ) -> Result<Value, GatewayError> {
        let url = self.endpoint(segments, query)?;
        self.send(Method::GET, url, None).await
    }

    pub async fn post_json(&self, segments: &[&str], body: &Value) -> Result<Value, GatewayError> {
        let url = self.endpoint(segments, &[])?;
        self.send(Method::POST, url, Some(body)).await
    }

    async fn send(
        &self,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> Result<Value, GatewayError> {
        let mut refreshed = false;
        loop {
            let mut request = self
                .http
                .request(method.clone(), url.clone())
                .timeout(self.timeout)
                .header(ACCEPT, "application/json");
            for (name, value) in &self.passthrough {
                request = request.header(name.clone(), value.clone());
            }

            let mut bearer_used = None;
            request = match &self.auth {
                ClientAuth::Static(creds) => creds.apply(request),
                ClientAuth::OAuth2(source) => {
                    let token = source.access_token().await;
                    let req = request.bearer_auth(&token);
                    bearer_used = Some(token);
                    req
                }
            };
            if let Some(body) = body {
                request = request.json(body);
            }

            debug!(service = %self.service, method = %method, path = url.path(), "Downstream request");
            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED
                && !refreshed
                && let (ClientAuth::OAuth2(source), Some(stale)) = (&self.auth, &bearer_used)
                && source.can_refresh().await
            {
                refreshed = true;
                if let Err(err) = source.refresh(stale).await {
                    warn!(service = %self.service, error = %err, "OAuth2 refresh failed");
                    return Err(GatewayError::from_status(401, String::new()));
                }
                continue;
            }

            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let bytes = response.bytes().await?;

            if !status.is_success() {
                let err = GatewayError::from_status(
                    status.as_u16(),
                    String::from_utf8_lossy(&bytes).into_owned(),
                );
                return Err(match (err, retry_after) {
                    (GatewayError::RateLimit { .. }, Some(secs)) => GatewayError::RateLimit {
                        retry_after_secs: secs.max(1),
                    },
                    (err, _) => err,
                });
            }

            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes).map_err(|e| {
                GatewayError::Server(format!(
                    "{} returned a response that is not JSON: {}",
                    self.service, e
                ))
            });
        }
    }
}
