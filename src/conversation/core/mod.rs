//! Core conversation types: configuration, errors, roles and records.

pub mod config;
pub mod errors;
pub mod records;
pub mod role;

pub use config::{LlmConfig, RelayConfig, ServerConfig, StorageConfig};
pub use errors::{ChatError, ChatResult};
pub use records::{
    ChatTurn, Conversation, DEFAULT_SYSTEM_PROMPT, DEFAULT_TITLE, Feedback, Message,
};
pub use role::{Role, UnknownRole};
