//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use murmur_shared::constants::{
    DEFAULT_HTTP_PORT, MAX_MESSAGE_LEN, OUTBOUND_QUEUE_CAPACITY, WS_IDLE_TIMEOUT_SECS,
};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP and WebSocket server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: `./murmur.db`
    pub database_path: PathBuf,

    /// Human-readable name for this server instance.
    /// Env: `INSTANCE_NAME`
    /// Default: `"Murmur Node"`
    pub instance_name: String,

    /// Events buffered per connection before deliveries to it are dropped.
    /// Env: `OUTBOUND_QUEUE_CAPACITY`
    /// Default: `256`
    pub outbound_queue_capacity: usize,

    /// A connection with no inbound frame for this long is closed.
    /// Env: `WS_IDLE_TIMEOUT_SECS`
    /// Default: `90`
    pub ws_idle_timeout: Duration,

    /// Maximum message content length in bytes.
    /// Env: `MAX_MESSAGE_LEN`
    /// Default: `4000`
    pub max_message_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: PathBuf::from("./murmur.db"),
            instance_name: "Murmur Node".to_string(),
            outbound_queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            ws_idle_timeout: Duration::from_secs(WS_IDLE_TIMEOUT_SECS),
            max_message_len: MAX_MESSAGE_LEN,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            if let Some(parsed) = parse_or_warn::<SocketAddr>("HTTP_ADDR", &addr) {
                config.http_addr = parsed;
            }
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.trim().is_empty() {
                config.database_path = PathBuf::from(path);
            }
        }

        if let Some(name) = lookup("INSTANCE_NAME") {
            config.instance_name = name;
        }

        if let Some(val) = lookup("OUTBOUND_QUEUE_CAPACITY") {
            if let Some(n) = parse_or_warn::<usize>("OUTBOUND_QUEUE_CAPACITY", &val) {
                if n > 0 {
                    config.outbound_queue_capacity = n;
                } else {
                    tracing::warn!("OUTBOUND_QUEUE_CAPACITY must be positive, using default");
                }
            }
        }

        if let Some(val) = lookup("WS_IDLE_TIMEOUT_SECS") {
            if let Some(secs) = parse_or_warn::<u64>("WS_IDLE_TIMEOUT_SECS", &val) {
                config.ws_idle_timeout = Duration::from_secs(secs.max(1));
            }
        }

        if let Some(val) = lookup("MAX_MESSAGE_LEN") {
            if let Some(n) = parse_or_warn::<usize>("MAX_MESSAGE_LEN", &val) {
                config.max_message_len = n;
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

fn parse_or_warn<T: FromStr>(key: &str, value: &str) -> Option<T> {
    match value.trim().parse::<T>() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(key, value = %value, "Invalid value, using default");
            None
        }
    }
}
