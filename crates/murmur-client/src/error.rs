use thiserror::Error;

use murmur_shared::SharedError;

/// Errors produced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("Server returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] SharedError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Message is empty")]
    EmptyMessage,

    /// Identical content was submitted to the same room within the cooldown.
    #[error("Duplicate message suppressed")]
    DuplicateSend,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session is closed")]
    SessionClosed,
}

impl ClientError {
    /// Stringify for the UI layer.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Api { message, .. } => message.clone(),
            ClientError::DuplicateSend => "Message already sent".into(),
            ClientError::EmptyMessage => "Message is empty".into(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
