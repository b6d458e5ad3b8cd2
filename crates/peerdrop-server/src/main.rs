//! # peerdrop-server
//!
//! LAN relay for presence and file handoff between devices.
//!
//! This binary provides:
//! - **Presence**: every WebSocket connection gets an ephemeral identity and
//!   the full peer list is pushed to all devices on each change, plus a
//!   periodic heartbeat
//! - **Grace period**: a device that drops stays visible for a while before
//!   it is removed
//! - **Mailboxes**: store-and-forward file payloads addressed by peer id,
//!   pushed immediately when the recipient is online
//! - **REST API** (axum) for health, instance info, peers and mailboxes

mod api;
mod broadcast;
mod clock;
mod config;
mod error;
mod identity;
mod lifecycle;
mod mailbox;
mod presence;
mod relay;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::clock::Clock;
use crate::config::ServerConfig;
use crate::lifecycle::Lifecycle;
use crate::relay::Relay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,peerdrop_server=debug")),
        )
        .init();

    info!("Starting PeerDrop relay v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize the relay core
    // -----------------------------------------------------------------------
    let relay = Arc::new(Relay::new(&config, Clock::new()));
    let lifecycle = Arc::new(Lifecycle::new(relay.clone(), &config));

    let app_state = AppState {
        relay: relay.clone(),
        lifecycle: lifecycle.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic mailbox TTL eviction
    let purge_relay = relay.clone();
    let purge_every = config.mailbox_purge_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_every);
        loop {
            interval.tick().await;
            purge_relay.purge_expired_payloads().await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP/WebSocket server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                lifecycle.shutdown().await;
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    lifecycle.shutdown().await;
    Ok(())
}
