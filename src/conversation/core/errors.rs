//! Error types for the conversation subsystem.

use thiserror::Error;

/// Conversation subsystem error type.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Unknown conversation or message identifier.
    #[error("{0} not found")]
    NotFound(String),
    /// Operation not allowed in the current conversation state.
    #[error("{0}")]
    InvalidState(String),
    /// Completion API failure.
    #[error("completion error: {0}")]
    Upstream(String),
    /// Invalid configuration or unsupported values.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// `SQLite` storage error (sync).
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// `SQLite` storage error (async).
    #[error("tokio-rusqlite error: {0}")]
    TokioSqlite(#[from] tokio_rusqlite::Error),
    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    /// URL parse error.
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

impl ChatError {
    /// Unknown conversation identifier.
    #[must_use]
    pub fn conversation_not_found() -> Self {
        Self::NotFound("Conversation".to_string())
    }

    /// Unknown message identifier.
    #[must_use]
    pub fn message_not_found() -> Self {
        Self::NotFound("Message".to_string())
    }
}

/// Convenience result alias for conversation operations.
pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_messages() {
        assert_eq!(
            ChatError::conversation_not_found().to_string(),
            "Conversation not found"
        );
        assert_eq!(ChatError::message_not_found().to_string(), "Message not found");
    }
}
