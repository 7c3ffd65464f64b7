//! Inbound message from a channel: delivered to the gateway for relay handling.

/// A message from a channel to be relayed to the agent backend and answered.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub channel_id: String,
    /// Where the reply goes (e.g. the Discord DM channel id).
    pub conversation_id: String,
    /// Platform user id of the author.
    pub author_id: String,
    /// True for one-to-one private channels.
    pub is_direct: bool,
    /// True when the bot itself authored the message.
    pub from_self: bool,
    pub text: String,
}
