//! Credential strategy selection and request-scoped client construction.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use url::Url;

use super::client::{ClientAuth, DownstreamClient};
use super::credentials::{Credentials, is_credential_header};
use super::oauth::OAuth2TokenSource;
use crate::auth::{AuthContext, AuthMode, HeaderBag};
use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::types::ServiceKind;

/// Which credentials a single downstream call uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientStrategy {
    /// Caller supplied credentials for this service.
    Headers {
        credentials: Credentials,
        passthrough: HeaderBag,
    },
    /// Gateway credentials, with the caller's extra headers forwarded.
    System { passthrough: HeaderBag },
}

impl ClientStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Headers { .. } => "headers",
            Self::System { .. } => "system",
        }
    }

    pub fn passthrough(&self) -> &HeaderBag {
        match self {
            Self::Headers { passthrough, .. } | Self::System { passthrough } => passthrough,
        }
    }
}

/// Pick the credential strategy for one call to `service`.
///
/// `headers` is the bag after acting-user substitution. Credential headers
/// of any service are never forwarded as passthrough.
pub fn select_strategy(
    mode: Option<AuthMode>,
    headers: &HeaderBag,
    service: ServiceKind,
) -> ClientStrategy {
    let passthrough: HeaderBag = headers
        .iter()
        .filter(|(name, _)| !is_credential_header(name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    match mode {
        // System bags carry configured credentials; the live token source
        // is used instead so an OAuth2 refresh is visible to every call.
        None | Some(AuthMode::System) => ClientStrategy::System { passthrough },
        Some(AuthMode::Headers) => match Credentials::from_headers(service, headers) {
            Some(credentials) => ClientStrategy::Headers {
                credentials,
                passthrough,
            },
            None => ClientStrategy::System { passthrough },
        },
    }
}

/// Convenience wrapper over [`select_strategy`] for an optional context.
pub fn strategy_for(auth: Option<&AuthContext>, headers: &HeaderBag, service: ServiceKind) -> ClientStrategy {
    select_strategy(auth.map(AuthContext::mode), headers, service)
}

struct ServiceEndpoint {
    base_url: Url,
    system: Option<ClientAuth>,
}

/// Builds a fresh [`DownstreamClient`] per call over one shared connection pool.
pub struct ClientFactory {
    http: reqwest::Client,
    services: HashMap<ServiceKind, ServiceEndpoint>,
    timeout: Duration,
}

impl ClientFactory {
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("building downstream HTTP client")?;
        Self::with_http(http, config)
    }

    pub fn with_http(http: reqwest::Client, config: &GatewayConfig) -> anyhow::Result<Self> {
        let mut services = HashMap::new();
        for service in ServiceKind::ALL {
            let Some(cfg) = config.service(service) else {
                continue;
            };
            let base_url = cfg
                .base_url()
                .with_context(|| format!("service `{}`", service))?;
            let system = match cfg.system_credentials() {
                Some(Credentials::OAuth2(_)) => cfg.oauth2.as_ref().map(|oauth| {
                    ClientAuth::OAuth2(Arc::new(OAuth2TokenSource::new(
                        service,
                        oauth,
                        http.clone(),
                    )))
                }),
                Some(creds) => Some(ClientAuth::Static(creds)),
                None => None,
            };
            services.insert(service, ServiceEndpoint { base_url, system });
        }

        Ok(Self {
            http,
            services,
            timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    pub fn is_configured(&self, service: ServiceKind) -> bool {
        self.services.contains_key(&service)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build the client for one call. Never cached.
    pub fn build(
        &self,
        service: ServiceKind,
        strategy: &ClientStrategy,
    ) -> Result<DownstreamClient, GatewayError> {
        let endpoint = self.services.get(&service).ok_or_else(|| {
            GatewayError::Server(format!("{} is not configured on this gateway", service))
        })?;

        let auth = match strategy {
            ClientStrategy::Headers { credentials, .. } => ClientAuth::Static(credentials.clone()),
            ClientStrategy::System { .. } => endpoint.system.clone().ok_or_else(|| {
                GatewayError::Authentication(format!(
                    "no {} credentials supplied and none configured",
                    service
                ))
            })?,
        };

        Ok(DownstreamClient::new(
            self.http.clone(),
            service,
            endpoint.base_url.clone(),
            auth,
            strategy.passthrough(),
            self.timeout,
        ))
    }
}
