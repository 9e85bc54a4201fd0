use thiserror::Error;

#[derive(Error, Debug)]
pub enum SharedError {
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("A direct conversation needs two distinct users (got {0} twice)")]
    SelfConversation(String),

    #[error("Unknown notification kind: {0}")]
    UnknownNotificationKind(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
