//! Conversation manager: keeps the cache and the store consistent.

use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversation::cache::ConversationCache;
use crate::conversation::core::errors::{ChatError, ChatResult};
use crate::conversation::core::records::{ChatTurn, Conversation, DEFAULT_SYSTEM_PROMPT, Message};
use crate::conversation::core::role::Role;
use crate::conversation::engine::title::derive_title;
use crate::conversation::storage::ConversationStore;
use crate::llm::CompletionClient;

/// Message returned when chatting on a deactivated conversation.
pub const SESSION_ENDED: &str = "The chat session has ended. Please start a new session.";

/// Result of one chat turn.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Assistant text.
    pub response: String,
    /// Conversation the turn was recorded under.
    pub conversation_id: String,
    /// Id of the stored assistant message.
    pub message_id: i64,
}

/// Exclusive hold on one identifier's lock.
///
/// On drop the mutex is released first, then the map entry is removed if no other task
/// holds or waits on it, so idle identifiers leave nothing behind.
struct IdentifierGuard<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    identifier: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for IdentifierGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.locks
            .remove_if(&self.identifier, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Mediates between the conversation cache and the persistent store.
///
/// Every operation on an identifier runs under that identifier's lock, so resolve creates
/// at most one row and appends land in the cache in commit order.
pub struct ConversationManager {
    store: Arc<dyn ConversationStore>,
    cache: ConversationCache,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConversationManager {
    /// Create a manager over `store` with an empty cache.
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store,
            cache: ConversationCache::new(),
            locks: DashMap::new(),
        }
    }

    /// The in-memory projection, for inspection.
    #[must_use]
    pub const fn cache(&self) -> &ConversationCache {
        &self.cache
    }

    async fn lock(&self, identifier: &str) -> IdentifierGuard<'_> {
        let lock = Arc::clone(
            self.locks
                .entry(identifier.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        IdentifierGuard {
            locks: &self.locks,
            identifier: identifier.to_string(),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Look up a conversation, creating it with the default system message if unknown.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn resolve(&self, identifier: &str) -> ChatResult<Conversation> {
        let _guard = self.lock(identifier).await;
        self.resolve_locked(identifier).await
    }

    async fn resolve_locked(&self, identifier: &str) -> ChatResult<Conversation> {
        let (conversation, created) = self
            .store
            .get_or_create_conversation(identifier, DEFAULT_SYSTEM_PROMPT)
            .await?;
        if created {
            info!("Created conversation {identifier}");
        }
        Ok(conversation)
    }

    /// Role/content history of a conversation, served from the cache when possible.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn load_messages(&self, identifier: &str) -> ChatResult<Vec<ChatTurn>> {
        let _guard = self.lock(identifier).await;
        if let Some(turns) = self.cache.get(identifier) {
            debug!("Cache hit for {identifier}");
            return Ok(turns);
        }
        let conversation = self.resolve_locked(identifier).await?;
        self.turns_for(&conversation).await
    }

    async fn turns_for(&self, conversation: &Conversation) -> ChatResult<Vec<ChatTurn>> {
        if let Some(turns) = self.cache.get(&conversation.conversation_id) {
            debug!("Cache hit for {}", conversation.conversation_id);
            return Ok(turns);
        }

        debug!("Cache miss for {}", conversation.conversation_id);
        let turns: Vec<ChatTurn> = self
            .store
            .list_messages(conversation.id)
            .await?
            .iter()
            .map(Message::to_turn)
            .collect();
        self.cache.put(&conversation.conversation_id, turns.clone());
        Ok(turns)
    }

    /// Store one message and mirror it into the cache once committed.
    ///
    /// # Errors
    /// Returns an error if storage access fails; the cache is left untouched then.
    pub async fn append(&self, identifier: &str, role: Role, content: &str) -> ChatResult<Message> {
        let _guard = self.lock(identifier).await;
        let conversation = self.resolve_locked(identifier).await?;
        let first_title = (role == Role::User).then(|| derive_title(content));
        self.append_locked(&conversation, role, content, first_title)
            .await
    }

    /// `first_title` is applied only while the conversation holds its first exchange.
    async fn append_locked(
        &self,
        conversation: &Conversation,
        role: Role,
        content: &str,
        first_title: Option<String>,
    ) -> ChatResult<Message> {
        let message = self
            .store
            .append_message(conversation.id, role, content, first_title)
            .await?;

        if !self.cache.push(&conversation.conversation_id, message.to_turn()) {
            debug!(
                "No cache entry for {}, next load reads the store",
                conversation.conversation_id
            );
        }
        Ok(message)
    }

    /// Drop the cache entry for `identifier`. The store is not touched.
    pub async fn invalidate(&self, identifier: &str) -> bool {
        let _guard = self.lock(identifier).await;
        self.cache.invalidate(identifier)
    }

    /// Replace the system prompt in the store and, if cached, in the cache.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn replace_system_message(&self, identifier: &str, text: &str) -> ChatResult<()> {
        let _guard = self.lock(identifier).await;
        let conversation = self.resolve_locked(identifier).await?;
        self.store.set_system_message(conversation.id, text).await?;
        self.cache.replace_system(identifier, text);
        Ok(())
    }

    /// Logically delete a conversation and drop its cache entry.
    ///
    /// # Errors
    /// Returns `ChatError::NotFound` for an unknown identifier.
    pub async fn deactivate(&self, identifier: &str) -> ChatResult<()> {
        let found = self.deactivate_and_invalidate(identifier).await?;
        if found {
            Ok(())
        } else {
            Err(ChatError::conversation_not_found())
        }
    }

    /// Deactivate `identifier` if it exists and start a fresh conversation.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn clear(&self, identifier: &str) -> ChatResult<String> {
        self.deactivate_and_invalidate(identifier).await?;
        self.start_new().await
    }

    async fn deactivate_and_invalidate(&self, identifier: &str) -> ChatResult<bool> {
        let _guard = self.lock(identifier).await;
        let found = self.store.deactivate(identifier).await?;
        self.cache.invalidate(identifier);
        if found {
            info!("Deactivated conversation {identifier}");
        }
        Ok(found)
    }

    /// Mint a new identifier, create its conversation and warm the cache.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    pub async fn start_new(&self) -> ChatResult<String> {
        let identifier = Uuid::new_v4().to_string();
        let _guard = self.lock(&identifier).await;
        let conversation = self.resolve_locked(&identifier).await?;
        self.cache.put(
            &identifier,
            vec![ChatTurn::system(conversation.system_message)],
        );
        Ok(identifier)
    }

    /// Run one chat turn: complete over the history plus `text`, then store both turns.
    ///
    /// The completion runs before any write, so an upstream failure changes nothing. If
    /// the assistant write fails after the user write committed, the user turn stays.
    ///
    /// # Errors
    /// Returns `ChatError::InvalidState` for a deactivated conversation,
    /// `ChatError::Upstream` if the completion fails, or a storage error.
    pub async fn chat(
        &self,
        identifier: &str,
        role: Role,
        text: &str,
        completion: &dyn CompletionClient,
    ) -> ChatResult<ChatReply> {
        let _guard = self.lock(identifier).await;
        let conversation = self.resolve_locked(identifier).await?;
        if !conversation.active {
            return Err(ChatError::InvalidState(SESSION_ENDED.to_string()));
        }

        let mut history = self.turns_for(&conversation).await?;
        history.push(ChatTurn::new(role, text));
        let response = completion.complete(history).await.inspect_err(|err| {
            warn!("Completion failed for {identifier}: {err}");
        })?;

        // The incoming turn names the conversation whatever its role.
        self.append_locked(&conversation, role, text, Some(derive_title(text)))
            .await?;
        let assistant = self
            .append_locked(&conversation, Role::Assistant, &response, None)
            .await
            .inspect_err(|err| {
                warn!("Assistant turn for {identifier} not stored after user turn: {err}");
            })?;

        Ok(ChatReply {
            response,
            conversation_id: identifier.to_string(),
            message_id: assistant.id,
        })
    }
}
