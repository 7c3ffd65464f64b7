//! Gateway: process wiring for the relay.
//!
//! Runs the Discord connector, the inbound message loop (one task per message) and the HTTP
//! liveness probe side by side until shutdown.

mod protocol;
mod server;

pub use protocol::HealthStatus;
pub use server::{health_router, run_gateway, spawn_inbound_processor};
