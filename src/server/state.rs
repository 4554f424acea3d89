//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::conversation::engine::ConversationManager;
use crate::conversation::storage::ConversationStore;
use crate::llm::CompletionClient;

/// Shared application state.
pub struct AppState {
    /// Cache/store coordinator for conversation history.
    pub manager: ConversationManager,
    /// Direct store access for read-only listings and feedback.
    pub store: Arc<dyn ConversationStore>,
    /// Completion backend used by the chat route.
    pub completion: Arc<dyn CompletionClient>,
}

impl AppState {
    /// Wire a manager over `store` and wrap everything for sharing.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>, completion: Arc<dyn CompletionClient>) -> Arc<Self> {
        Arc::new(Self {
            manager: ConversationManager::new(Arc::clone(&store)),
            store,
            completion,
        })
    }
}
