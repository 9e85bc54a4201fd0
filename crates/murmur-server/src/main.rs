//! # murmur-server
//!
//! Real-time conversation and notification delivery server.
//!
//! This binary provides:
//! - **WebSocket transport** (`/ws`) with per-connection room membership and
//!   a personal room per user
//! - **Message fan-out** of persisted messages to conversation rooms plus
//!   sidebar-level `conversation:touched` events to participants
//! - **Notification fan-out** to the target user's personal room
//! - **REST API** (axum) for conversation resolution, history, sending and
//!   notifications, backed by SQLite

mod api;
mod config;
mod connections;
mod error;
mod fanout;
mod notify;
mod persistence;
mod resolver;
mod rooms;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use murmur_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::persistence::SqliteStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,murmur_server=debug")),
        )
        .init();

    info!("Starting Murmur server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database opened");

    let store = Arc::new(SqliteStore::new(db));
    let http_addr = config.http_addr;
    let app_state = AppState::new(store, config);

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic connection/room gauge (every 5 minutes)
    let connections = app_state.connections.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            info!(
                connections = connections.connection_count(),
                rooms = connections.registry().room_count(),
                "Delivery status"
            );
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
