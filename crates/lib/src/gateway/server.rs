//! Gateway HTTP server and inbound loop.

use crate::backend::AgentClient;
use crate::channels::{ChannelHandle, ChannelRegistry, DiscordChannel, InboundMessage};
use crate::config::{self, Config};
use crate::gateway::protocol::HealthStatus;
use crate::relay::Relay;
use crate::session::SessionRegistry;
use anyhow::{Context, Result};
use axum::{extract::State, routing::get, Json, Router};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const INBOUND_QUEUE_CAPACITY: usize = 64;

/// Shared state for the health endpoint.
#[derive(Clone)]
struct HealthState {
    /// Written by the Discord connector once its gateway session is ready.
    bot_ready: Arc<AtomicBool>,
}

/// Router serving the liveness probe on `GET /`.
pub fn health_router(bot_ready: Arc<AtomicBool>) -> Router {
    Router::new()
        .route("/", get(health_http))
        .with_state(HealthState { bot_ready })
}

/// GET / returns liveness and chat-platform readiness. Always 200 while the process is up.
async fn health_http(State(state): State<HealthState>) -> Json<HealthStatus> {
    Json(HealthStatus::alive(state.bot_ready.load(Ordering::SeqCst)))
}

/// Consume inbound messages and handle each one in its own task, so a slow backend round
/// trip for one user does not hold up anyone else.
pub fn spawn_inbound_processor(
    relay: Relay,
    channel_registry: Arc<ChannelRegistry>,
    mut inbound_rx: mpsc::Receiver<InboundMessage>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = inbound_rx.recv().await {
            let relay = relay.clone();
            let channel_registry = channel_registry.clone();
            tokio::spawn(async move {
                let Some(handle) = channel_registry.get(&msg.channel_id).await else {
                    log::warn!("inbound: no channel registered for {}", msg.channel_id);
                    return;
                };
                relay.handle(&msg, &handle).await;
            });
        }
        log::debug!("inbound: queue closed, processor stopping");
    })
}

/// Run the relay: Discord connector, inbound processor and health server.
/// `port` overrides the configured health port. Fails before binding anything when the
/// Discord token is missing. Blocks until shutdown (e.g. Ctrl+C or SIGTERM).
pub async fn run_gateway(config: Config, port: Option<u16>) -> Result<()> {
    let Some(discord_token) = config::resolve_discord_token(&config) else {
        anyhow::bail!(
            "discord bot token not configured (set DISCORD_API_KEY or channels.discord.botToken)"
        );
    };
    let port = match port {
        Some(p) => p,
        None => config::resolve_health_port(&config)?,
    };
    let bind_addr = health_bind_addr(&config.health.bind, port)?;
    if config::resolve_agent_base_url(&config).is_none() {
        log::warn!("agent base url not configured (ADK_BASE_URL); every message will fail to create a session");
    }

    let relay = Relay::new(
        Arc::new(AgentClient::from_config(&config)),
        Arc::new(SessionRegistry::new()),
    );
    let bot_ready = Arc::new(AtomicBool::new(false));
    let channel_registry = Arc::new(ChannelRegistry::new());
    let channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>> =
        Arc::new(tokio::sync::RwLock::new(Vec::new()));
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE_CAPACITY);

    spawn_inbound_processor(relay, channel_registry.clone(), inbound_rx);

    let discord = Arc::new(DiscordChannel::new(discord_token, bot_ready.clone()));
    channel_registry
        .register(discord.id().to_string(), discord.clone())
        .await;
    let handle = discord.start_inbound(inbound_tx);
    channel_tasks.write().await.push(handle);
    log::info!("discord channel registered");

    let app = health_router(bot_ready);
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("health server listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(channel_registry, channel_tasks))
        .await
        .context("health server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Socket address for the health server. `bind` is an IPv4 or IPv6 address.
fn health_bind_addr(bind: &str, port: u16) -> Result<SocketAddr> {
    let ip: IpAddr = bind
        .trim()
        .parse()
        .with_context(|| format!("health.bind is not an IP address: {}", bind))?;
    Ok(SocketAddr::new(ip, port))
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops channel connectors, then awaits their tasks.
async fn shutdown_signal(
    channel_registry: Arc<ChannelRegistry>,
    channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                log::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channels");

    for id in channel_registry.ids().await {
        if let Some(handle) = channel_registry.get(&id).await {
            handle.stop();
        }
    }

    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}
