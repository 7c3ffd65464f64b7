//! Relay core library. Relays Discord direct messages to an ADK agent backend, one backend
//! session per user, plus the gateway wiring and health probe used by the CLI.

pub mod auth;
pub mod backend;
pub mod channels;
pub mod config;
pub mod gateway;
pub mod init;
pub mod relay;
pub mod session;
