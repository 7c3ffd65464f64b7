//! Gateway HTTP wire types.

use serde::{Deserialize, Serialize};

/// Body of `GET /`: `{ "status": "alive", "bot_is_ready": bool }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub bot_is_ready: bool,
}

impl HealthStatus {
    pub fn alive(bot_is_ready: bool) -> Self {
        Self {
            status: "alive".to_string(),
            bot_is_ready,
        }
    }
}
