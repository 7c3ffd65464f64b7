//! Per-user agent sessions.
//!
//! Each chat user maps to at most one backend session. Entries are never expired: a stored
//! session is assumed live until a call using it fails, at which point the relay clears the
//! whole registry. There is no per-user removal.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Prefix that namespaces chat-platform user ids on the agent backend.
pub const AGENT_USER_PREFIX: &str = "discord_";

/// Chat-platform user id (e.g. a Discord snowflake as a string).
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// User id as the agent backend knows it: `discord_<id>`.
    pub fn agent_user_id(&self) -> String {
        format!("{}{}", AGENT_USER_PREFIX, self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Backend session id (UUID v4, hyphenated).
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A session addressed on the backend by (agent user id, session id).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSession {
    pub agent_user_id: String,
    pub session_id: SessionId,
}

impl AgentSession {
    pub fn for_user(user: &UserId, session_id: SessionId) -> Self {
        Self {
            agent_user_id: user.agent_user_id(),
            session_id,
        }
    }
}

/// In-memory map of user -> session id, shared by all message handlers.
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<UserId, SessionId>>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn get(&self, user: &UserId) -> Option<SessionId> {
        self.inner.read().await.get(user).cloned()
    }

    /// Record the session for a user. Overwrites an existing entry (last writer wins).
    pub async fn insert(&self, user: UserId, session_id: SessionId) {
        self.inner.write().await.insert(user, session_id);
    }

    /// Drop every entry; returns how many were dropped.
    pub async fn clear(&self) -> usize {
        let mut g = self.inner.write().await;
        let n = g.len();
        g.clear();
        n
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
