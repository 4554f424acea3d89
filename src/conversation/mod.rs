//! Conversations: records, persistence, the in-memory cache and the manager tying them
//! together.

pub mod cache;
pub mod core;
pub mod engine;
pub mod export;
pub mod storage;

pub use cache::ConversationCache;
pub use engine::{ChatReply, ConversationManager};
pub use export::render_transcript;
pub use storage::{ConversationStore, SqliteConversationStore};
