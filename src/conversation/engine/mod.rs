//! Conversation orchestration: the cache/store manager and title derivation.

pub mod manager;
pub mod title;

pub use manager::{ChatReply, ConversationManager, SESSION_ENDED};
pub use title::derive_title;
