//! Persistent storage for conversations, messages and feedback.

pub mod sqlite_store;

pub use sqlite_store::{ConversationStore, SqliteConversationStore, StoreFuture};
