//! Agent backend: the HTTP client for session creation and runs, and the trait the relay
//! depends on so handlers can be exercised without a live backend.

mod client;
mod protocol;

pub use client::{AgentClient, AgentError};
pub use protocol::{extract_reply, Content, Part, Turn};

use crate::session::{AgentSession, UserId};
use async_trait::async_trait;

/// The two operations the relay needs from an agent backend.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Create a new session for `user`. Any error means "no session available".
    async fn create_session(&self, user: &UserId) -> Result<AgentSession, AgentError>;

    /// Send one user message in `session` and return the model's reply text.
    async fn send_message(&self, session: &AgentSession, text: &str)
        -> Result<String, AgentError>;
}
