//! Persistent records and their in-memory projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::conversation::core::role::Role;

/// System prompt seeded into every new conversation.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a useful AI assistant.";

/// Title a conversation carries until its first user message.
pub const DEFAULT_TITLE: &str = "New conversation";

/// A durable conversation row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Surrogate key.
    pub id: i64,
    /// Opaque external identifier.
    pub conversation_id: String,
    /// Display title.
    pub title: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// `false` once the conversation has been logically deleted.
    pub active: bool,
    /// Current system prompt.
    pub system_message: String,
}

/// One stored turn of a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Surrogate key.
    pub id: i64,
    /// Owning conversation's surrogate key.
    pub conversation_pk: i64,
    /// Role of the author.
    pub role: Role,
    /// Text content.
    pub content: String,
    /// Creation time, the ordering key.
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Project the row onto the role/content pair kept in the cache.
    #[must_use]
    pub fn to_turn(&self) -> ChatTurn {
        ChatTurn::new(self.role, self.content.clone())
    }
}

/// A positive/negative signal attached to one message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feedback {
    /// Surrogate key.
    pub id: i64,
    /// Rated message.
    pub message_id: i64,
    /// Thumbs up or down.
    pub is_positive: bool,
    /// Time of the latest submission.
    pub created_at: DateTime<Utc>,
}

/// Role/content pair as sent to the completion API.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Role of the author.
    pub role: Role,
    /// Text content.
    pub content: String,
}

impl ChatTurn {
    /// Build a turn.
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Build a system turn.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }
}
