//! Communication channels (e.g. Discord).
//!
//! Channel trait and registry so the gateway can start/stop channel connectors
//! and deliver replies. Inbound messages are sent to the gateway for relay handling.

mod discord;
mod inbound;
mod registry;

pub use discord::DiscordChannel;
pub use inbound::InboundMessage;
pub use registry::{ChannelHandle, ChannelRegistry};
