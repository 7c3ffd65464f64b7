//! Credentials for outbound agent-backend calls.
//!
//! The relay never fetches tokens itself; it asks a [`CredentialProvider`] for the headers to
//! attach to each request. On Cloud Run the provider asks the metadata server for a
//! Google-signed ID token whose audience is the backend base URL.

use crate::config::{self, AgentAuthMode, Config};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::sync::Arc;

const METADATA_BASE_URL: &str = "http://metadata.google.internal";
const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("metadata request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("metadata server error: {0}")]
    Api(String),
    #[error("token is not a valid header value")]
    InvalidToken,
}

/// Supplies the headers to attach to every agent-backend request.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Current auth headers. Empty when no credentials are available; never fails.
    async fn auth_headers(&self) -> HeaderMap;
}

/// No auth header at all (local backends).
pub struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn auth_headers(&self) -> HeaderMap {
        HeaderMap::new()
    }
}

/// Fixed bearer token, e.g. from `gcloud auth print-identity-token` during development.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn auth_headers(&self) -> HeaderMap {
        match bearer_headers(&self.token) {
            Ok(headers) => headers,
            Err(e) => {
                log::error!("auth: configured bearer token unusable: {}", e);
                HeaderMap::new()
            }
        }
    }
}

/// Google-signed ID token from the instance metadata server, fetched on every call.
pub struct MetadataIdToken {
    audience: Option<String>,
    metadata_base: String,
    client: reqwest::Client,
}

impl MetadataIdToken {
    /// `audience` is the backend base URL; when absent no token is requested.
    pub fn new(audience: Option<String>) -> Self {
        Self::with_metadata_base(audience, METADATA_BASE_URL)
    }

    pub fn with_metadata_base(audience: Option<String>, metadata_base: impl Into<String>) -> Self {
        Self {
            audience: audience.filter(|a| !a.trim().is_empty()),
            metadata_base: metadata_base.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// GET the identity endpoint for `audience`; returns the raw JWT.
    pub async fn fetch_id_token(&self, audience: &str) -> Result<String, CredentialError> {
        let url = format!("{}{}", self.metadata_base, IDENTITY_PATH);
        let res = self
            .client
            .get(&url)
            .query(&[("audience", audience)])
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(CredentialError::Api(format!("{} {}", status, body)));
        }
        let token = res.text().await?.trim().to_string();
        if token.is_empty() {
            return Err(CredentialError::Api("empty identity token".to_string()));
        }
        Ok(token)
    }
}

#[async_trait]
impl CredentialProvider for MetadataIdToken {
    async fn auth_headers(&self) -> HeaderMap {
        let Some(audience) = self.audience.as_deref() else {
            return HeaderMap::new();
        };
        let fetched = self
            .fetch_id_token(audience)
            .await
            .and_then(|token| bearer_headers(&token));
        match fetched {
            Ok(headers) => {
                log::debug!("auth: fetched id token for agent backend");
                headers
            }
            Err(e) => {
                log::error!(
                    "auth: could not fetch id token, requests to the agent backend will likely fail: {}",
                    e
                );
                HeaderMap::new()
            }
        }
    }
}

fn bearer_headers(token: &str) -> Result<HeaderMap, CredentialError> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|_| CredentialError::InvalidToken)?;
    value.set_sensitive(true);
    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}

/// Build the provider selected by `agent.auth.mode`.
pub fn provider_for(config: &Config) -> Arc<dyn CredentialProvider> {
    match config.agent.auth.mode {
        AgentAuthMode::None => Arc::new(NoCredentials),
        AgentAuthMode::Token => match config::resolve_bearer_token(config) {
            Some(token) => Arc::new(StaticToken::new(token)),
            None => {
                log::warn!("auth: mode is token but no token configured (agent.auth.token or ADK_BEARER_TOKEN); sending no auth header");
                Arc::new(NoCredentials)
            }
        },
        AgentAuthMode::Metadata => {
            Arc::new(MetadataIdToken::new(config::resolve_agent_base_url(config)))
        }
    }
}
