use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use murmur_shared::types::{RoomId, UserId};
use murmur_shared::SharedError;

use crate::connections::ConnectionError;
use crate::persistence::PersistenceError;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    #[error("{user} is not a participant of {room}")]
    NotAMember { room: RoomId, user: UserId },

    #[error("Invalid conversation: {0}")]
    InvalidConversation(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Persistence failure: {0}")]
    Persistence(PersistenceError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PersistenceError> for ServerError {
    fn from(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotFound => ServerError::NotFound("record not found".into()),
            other => ServerError::Persistence(other),
        }
    }
}

impl From<SharedError> for ServerError {
    fn from(err: SharedError) -> Self {
        match err {
            SharedError::SelfConversation(user) => ServerError::InvalidConversation(format!(
                "{user} cannot start a direct conversation with themselves"
            )),
            SharedError::Serialization(e) => ServerError::Internal(e.to_string()),
            other => ServerError::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServerError::RoomNotFound(_) | ServerError::NotFound(_) => {
                (StatusCode::NOT_FOUND, self.to_string())
            }
            ServerError::NotAMember { .. } => (StatusCode::FORBIDDEN, self.to_string()),
            ServerError::InvalidConversation(_) | ServerError::BadRequest(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ServerError::Connection(_) => (StatusCode::CONFLICT, self.to_string()),
            ServerError::Persistence(_) => {
                tracing::warn!(error = %self, "Persistence failure");
                (StatusCode::SERVICE_UNAVAILABLE, "Persistence failure".to_string())
            }
            ServerError::Internal(_) => {
                tracing::error!(error = %self, "Internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
