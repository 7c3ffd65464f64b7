//! Discord channel: serenity gateway client for inbound messages, REST calls for replies and
//! the typing indicator.

use crate::channels::inbound::InboundMessage;
use crate::channels::registry::ChannelHandle;
use async_trait::async_trait;
use serenity::all::{ChannelId, ShardManager};
use serenity::http::Http;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;

/// Discord rejects messages longer than this.
const MAX_MESSAGE_LENGTH: usize = 2000;

/// Discord channel connector: receives direct messages and sends replies.
pub struct DiscordChannel {
    id: String,
    token: String,
    http: Arc<Http>,
    /// Set once the gateway session is ready; read by the health endpoint.
    ready: Arc<AtomicBool>,
    shard_manager: std::sync::Mutex<Option<Arc<ShardManager>>>,
}

impl DiscordChannel {
    pub fn new(token: String, ready: Arc<AtomicBool>) -> Self {
        let http = Arc::new(Http::new(&token));
        Self {
            id: "discord".to_string(),
            token,
            http,
            ready,
            shard_manager: std::sync::Mutex::new(None),
        }
    }

    /// Connect to the Discord gateway and forward messages to the relay. Returns a handle to await on shutdown.
    pub fn start_inbound(
        self: Arc<Self>,
        inbound_tx: mpsc::Sender<InboundMessage>,
    ) -> JoinHandle<()> {
        log::info!("discord channel: connecting to gateway");
        tokio::spawn(async move {
            run_client(self, inbound_tx).await;
        })
    }

    /// Send a text message to a channel, split into several messages when over the length limit.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        let channel = parse_channel_id(conversation_id)?;
        for chunk in chunk_message(text) {
            channel
                .say(&self.http, chunk)
                .await
                .map_err(|e| format!("sendMessage failed: {}", e))?;
        }
        Ok(())
    }

    /// Trigger the typing indicator (lasts about ten seconds on Discord).
    pub async fn send_typing(&self, conversation_id: &str) -> Result<(), String> {
        parse_channel_id(conversation_id)?
            .broadcast_typing(&self.http)
            .await
            .map_err(|e| format!("typing failed: {}", e))
    }
}

async fn run_client(channel: Arc<DiscordChannel>, inbound_tx: mpsc::Sender<InboundMessage>) {
    let intents = GatewayIntents::DIRECT_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
    let handler = Handler {
        channel_id: channel.id.clone(),
        inbound_tx,
        ready: channel.ready.clone(),
        bot_user_id: Arc::new(OnceCell::new()),
    };
    let mut client = match Client::builder(&channel.token, intents)
        .event_handler(handler)
        .await
    {
        Ok(client) => client,
        Err(e) => {
            log::error!("discord: failed to create client: {}", e);
            return;
        }
    };
    if let Ok(mut g) = channel.shard_manager.lock() {
        *g = Some(client.shard_manager.clone());
    }
    if let Err(e) = client.start().await {
        log::error!("discord: client error: {}", e);
    }
    channel.ready.store(false, Ordering::SeqCst);
    log::info!("discord channel: gateway connection closed");
}

struct Handler {
    channel_id: String,
    inbound_tx: mpsc::Sender<InboundMessage>,
    ready: Arc<AtomicBool>,
    /// Bot user id, set from the Ready event.
    bot_user_id: Arc<OnceCell<u64>>,
}

#[serenity::async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        let _ = self.bot_user_id.set(ready.user.id.get());
        self.ready.store(true, Ordering::SeqCst);
        log::info!(
            "discord: logged in as {} ({}), ready for direct messages",
            ready.user.name,
            ready.user.id
        );
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        let from_self = self
            .bot_user_id
            .get()
            .is_some_and(|id| msg.author.id.get() == *id);
        let inbound = InboundMessage {
            channel_id: self.channel_id.clone(),
            conversation_id: msg.channel_id.to_string(),
            author_id: msg.author.id.to_string(),
            is_direct: msg.guild_id.is_none(),
            from_self,
            text: msg.content,
        };
        if self.inbound_tx.send(inbound).await.is_err() {
            log::debug!("discord: inbound channel closed, dropping message");
        }
    }
}

#[async_trait]
impl ChannelHandle for DiscordChannel {
    fn id(&self) -> &str {
        &self.id
    }

    fn stop(&self) {
        let manager = self.shard_manager.lock().ok().and_then(|mut g| g.take());
        if let Some(manager) = manager {
            tokio::spawn(async move {
                manager.shutdown_all().await;
            });
        }
    }

    async fn send_message(&self, conversation_id: &str, text: &str) -> Result<(), String> {
        DiscordChannel::send_message(self, conversation_id, text).await
    }

    async fn send_typing(&self, conversation_id: &str) -> Result<(), String> {
        DiscordChannel::send_typing(self, conversation_id).await
    }
}

fn parse_channel_id(conversation_id: &str) -> Result<ChannelId, String> {
    conversation_id
        .parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .map(ChannelId::new)
        .ok_or_else(|| format!("invalid discord channel id: {}", conversation_id))
}

/// Split at the last newline within the limit, or at the limit itself.
fn chunk_message(content: &str) -> Vec<&str> {
    if content.len() <= MAX_MESSAGE_LENGTH {
        return vec![content];
    }

    let mut chunks = Vec::new();
    let mut remaining = content;
    while !remaining.is_empty() {
        if remaining.len() <= MAX_MESSAGE_LENGTH {
            chunks.push(remaining);
            break;
        }
        let mut boundary = MAX_MESSAGE_LENGTH;
        while !remaining.is_char_boundary(boundary) {
            boundary -= 1;
        }
        let split_at = match remaining[..boundary].rfind('\n') {
            Some(i) if i > 0 => i,
            _ => boundary,
        };
        let (chunk, rest) = remaining.split_at(split_at);
        chunks.push(chunk);
        remaining = rest.strip_prefix('\n').unwrap_or(rest);
    }
    chunks
}
