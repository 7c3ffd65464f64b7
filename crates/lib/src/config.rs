//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.relay/config.json`) and environment.
//! Environment variables win over the file when set and non-empty, so a container can be
//! configured with env alone (`ADK_BASE_URL`, `ADK_APP_NAME`, `DISCORD_API_KEY`, `PORT`).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Health server settings.
    #[serde(default)]
    pub health: HealthConfig,

    /// Agent backend settings.
    #[serde(default)]
    pub agent: AgentConfig,

    /// Channel settings (e.g. Discord).
    #[serde(default)]
    pub channels: ChannelsConfig,
}

/// Health server bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConfig {
    /// Port for the liveness probe (default 8080). Overridden by PORT env.
    #[serde(default = "default_health_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0", as the hosting platform probes from outside).
    #[serde(default = "default_health_bind")]
    pub bind: String,
}

fn default_health_port() -> u16 {
    8080
}

fn default_health_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            port: default_health_port(),
            bind: default_health_bind(),
        }
    }
}

/// Agent backend location and credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Backend base URL, e.g. the Cloud Run URL of the agent service. Overridden by ADK_BASE_URL env.
    pub base_url: Option<String>,
    /// Application name on the backend. Overridden by ADK_APP_NAME env.
    pub app_name: Option<String>,
    #[serde(default)]
    pub auth: AgentAuthConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAuthConfig {
    #[serde(default)]
    pub mode: AgentAuthMode,
    /// Bearer token used when mode is "token". Overridden by ADK_BEARER_TOKEN env.
    pub token: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentAuthMode {
    /// ID token from the instance metadata server, audience = base URL.
    #[default]
    Metadata,
    /// Fixed bearer token.
    Token,
    /// No Authorization header.
    None,
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub discord: DiscordChannelConfig,
}

/// Discord channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscordChannelConfig {
    /// Bot token from the Discord developer portal. Overridden by DISCORD_API_KEY env.
    pub bot_token: Option<String>,
}

/// Held by tests that read or write the environment variables resolved here.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

fn env_non_empty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn config_non_empty(value: Option<&String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve the agent backend base URL: env ADK_BASE_URL overrides config. Trailing `/` removed.
pub fn resolve_agent_base_url(config: &Config) -> Option<String> {
    env_non_empty("ADK_BASE_URL")
        .or_else(|| config_non_empty(config.agent.base_url.as_ref()))
        .map(|u| u.trim_end_matches('/').to_string())
}

/// Resolve the backend application name: env ADK_APP_NAME overrides config.
pub fn resolve_agent_app_name(config: &Config) -> Option<String> {
    env_non_empty("ADK_APP_NAME").or_else(|| config_non_empty(config.agent.app_name.as_ref()))
}

/// Resolve the static bearer token: env ADK_BEARER_TOKEN overrides config.
pub fn resolve_bearer_token(config: &Config) -> Option<String> {
    env_non_empty("ADK_BEARER_TOKEN").or_else(|| config_non_empty(config.agent.auth.token.as_ref()))
}

/// Resolve the Discord bot token: env DISCORD_API_KEY overrides config.
pub fn resolve_discord_token(config: &Config) -> Option<String> {
    env_non_empty("DISCORD_API_KEY")
        .or_else(|| config_non_empty(config.channels.discord.bot_token.as_ref()))
}

/// Resolve the health port: env PORT overrides config. An unparsable PORT is an error.
pub fn resolve_health_port(config: &Config) -> Result<u16> {
    match env_non_empty("PORT") {
        Some(p) => p
            .parse()
            .with_context(|| format!("PORT is not a valid port number: {}", p)),
        None => Ok(config.health.port),
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RELAY_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".relay").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
