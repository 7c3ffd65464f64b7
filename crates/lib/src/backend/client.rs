//! Agent backend HTTP client: create session and run.

use crate::auth::{self, CredentialProvider};
use crate::backend::protocol::{extract_reply, CreateSessionRequest, RunRequest, SessionState, Turn};
use crate::backend::AgentBackend;
use crate::config::{self, Config};
use crate::session::{AgentSession, SessionId, UserId};
use async_trait::async_trait;
use std::sync::Arc;

/// Client for the agent backend's session and run endpoints.
#[derive(Clone)]
pub struct AgentClient {
    base_url: Option<String>,
    app_name: Option<String>,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("agent request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("agent api error: {0}")]
    Api(String),
    #[error("agent backend not configured: {0} missing")]
    NotConfigured(&'static str),
    #[error("invalid agent request: {0}")]
    InvalidRequest(String),
    #[error("agent response is not a list of turns: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("agent response has no model text")]
    NoModelReply,
}

impl AgentError {
    /// True when the backend could not be reached or the call could not be made (as opposed
    /// to the backend answering with something unreadable).
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            AgentError::Request(_)
                | AgentError::Api(_)
                | AgentError::NotConfigured(_)
                | AgentError::InvalidRequest(_)
        )
    }
}

impl AgentClient {
    pub fn new(
        base_url: Option<String>,
        app_name: Option<String>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
            app_name,
            client: reqwest::Client::new(),
            credentials,
        }
    }

    /// Base URL, app name and credential provider resolved from config and env.
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config::resolve_agent_base_url(config),
            config::resolve_agent_app_name(config),
            auth::provider_for(config),
        )
    }

    fn endpoint(&self) -> Result<(&str, &str), AgentError> {
        let base = self
            .base_url
            .as_deref()
            .ok_or(AgentError::NotConfigured("base url"))?;
        let app = self
            .app_name
            .as_deref()
            .ok_or(AgentError::NotConfigured("app name"))?;
        Ok((base, app))
    }

    /// `base` with `segments` appended, each one percent-encoded as a single path segment.
    fn endpoint_url(base: &str, segments: &[&str]) -> Result<reqwest::Url, AgentError> {
        let mut url = reqwest::Url::parse(base)
            .map_err(|e| AgentError::InvalidRequest(format!("base url {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| AgentError::InvalidRequest(format!("base url {} cannot hold a path", base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn post_json<T: serde::Serialize + ?Sized>(
        &self,
        url: reqwest::Url,
        body: &T,
    ) -> Result<reqwest::Response, AgentError> {
        let headers = self.credentials.auth_headers().await;
        let res = self
            .client
            .post(url)
            .headers(headers)
            .json(body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(AgentError::Api(format!("{} {}", status, body)));
        }
        Ok(res)
    }

    /// POST /apps/{app}/users/{agent_user_id}/sessions/{session_id} with a fresh session id.
    /// An empty user identity is rejected before any request is made.
    pub async fn create_session(&self, user: &UserId) -> Result<AgentSession, AgentError> {
        if user.as_str().trim().is_empty() {
            return Err(AgentError::InvalidRequest("empty user id".to_string()));
        }
        let (base, app) = self.endpoint()?;
        let session = AgentSession::for_user(user, SessionId::generate());
        let url = Self::endpoint_url(
            base,
            &[
                "apps",
                app,
                "users",
                &session.agent_user_id,
                "sessions",
                session.session_id.as_str(),
            ],
        )?;
        let body = CreateSessionRequest {
            state: SessionState {
                discord_user_id: user.as_str(),
            },
        };
        self.post_json(url, &body).await?;
        log::info!(
            "agent: created session {} for {}",
            session.session_id,
            session.agent_user_id
        );
        Ok(session)
    }

    /// POST /run: send one user message and return the model's reply text.
    pub async fn send_message(
        &self,
        session: &AgentSession,
        text: &str,
    ) -> Result<String, AgentError> {
        let (base, app) = self.endpoint()?;
        let url = Self::endpoint_url(base, &["run"])?;
        let body = RunRequest::new(
            app,
            &session.agent_user_id,
            session.session_id.as_str(),
            text,
        );
        let raw = self.post_json(url, &body).await?.text().await?;
        log::debug!("agent: run response: {}", raw);
        let turns: Vec<Turn> = serde_json::from_str(&raw)?;
        extract_reply(&turns)
            .map(str::to_string)
            .ok_or(AgentError::NoModelReply)
    }
}

#[async_trait]
impl AgentBackend for AgentClient {
    async fn create_session(&self, user: &UserId) -> Result<AgentSession, AgentError> {
        AgentClient::create_session(self, user).await
    }

    async fn send_message(
        &self,
        session: &AgentSession,
        text: &str,
    ) -> Result<String, AgentError> {
        AgentClient::send_message(self, session, text).await
    }
}
