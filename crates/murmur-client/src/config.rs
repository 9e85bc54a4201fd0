//! Client configuration.

use std::path::PathBuf;
use std::time::Duration;

use murmur_shared::constants::SEND_COOLDOWN_MS;
use murmur_shared::types::UserId;

use crate::error::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the HTTP API, e.g. `http://localhost:8080`.
    pub base_url: String,

    /// WebSocket endpoint. Derived from `base_url` by default.
    pub ws_url: String,

    /// Identity this client acts as.
    pub user_id: UserId,

    /// Timeout applied to every HTTP request. A send that never resolves
    /// keeps its provisional entry visible until this fires.
    pub request_timeout: Duration,

    /// Window during which identical content is not resubmitted.
    pub send_cooldown: Duration,

    /// Delay before re-opening a dropped push connection.
    pub reconnect_delay: Duration,

    /// Read-cursor file. `None` uses the platform data directory.
    pub cursor_path: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(base_url: &str, user_id: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();
        let ws_url = derive_ws_url(&base_url)?;
        Ok(Self {
            base_url,
            ws_url,
            user_id: UserId::parse(user_id)?,
            request_timeout: Duration::from_secs(10),
            send_cooldown: Duration::from_millis(SEND_COOLDOWN_MS),
            reconnect_delay: Duration::from_secs(2),
            cursor_path: None,
        })
    }
}

fn derive_ws_url(base_url: &str) -> Result<String> {
    if let Some(rest) = base_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}/ws"))
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}/ws"))
    } else {
        Err(ClientError::InvalidConfig(format!(
            "base url must start with http:// or https://, got {base_url}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ws_url_follows_scheme() {
        let plain = ClientConfig::new("http://localhost:8080/", "alice").unwrap();
        assert_eq!(plain.base_url, "http://localhost:8080");
        assert_eq!(plain.ws_url, "ws://localhost:8080/ws");

        let tls = ClientConfig::new("https://chat.example.org", "alice").unwrap();
        assert_eq!(tls.ws_url, "wss://chat.example.org/ws");
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(matches!(
            ClientConfig::new("ftp://host", "alice"),
            Err(ClientError::InvalidConfig(_))
        ));
        assert!(ClientConfig::new("http://host", "  ").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = ClientConfig::new("http://host", "alice").unwrap();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.send_cooldown, Duration::from_secs(2));
        assert_eq!(config.reconnect_delay, Duration::from_secs(2));
    }
}
