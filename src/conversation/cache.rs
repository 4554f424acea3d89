//! In-memory projection of active conversations.

use dashmap::DashMap;

use crate::conversation::core::records::ChatTurn;
use crate::conversation::core::role::Role;

/// Thread-safe cache of role/content sequences keyed by conversation identifier.
///
/// Every entry must be re-derivable from the store; writers only touch the cache after
/// the corresponding store commit has succeeded.
#[derive(Default)]
pub struct ConversationCache {
    entries: DashMap<String, Vec<ChatTurn>>,
}

impl ConversationCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the cached sequence for `identifier`.
    #[must_use]
    pub fn get(&self, identifier: &str) -> Option<Vec<ChatTurn>> {
        self.entries.get(identifier).map(|entry| entry.value().clone())
    }

    /// Replace the cached sequence for `identifier`.
    pub fn put(&self, identifier: &str, turns: Vec<ChatTurn>) {
        self.entries.insert(identifier.to_string(), turns);
    }

    /// Append a turn to an existing entry. Returns `false` if nothing is cached.
    pub fn push(&self, identifier: &str, turn: ChatTurn) -> bool {
        let Some(mut entry) = self.entries.get_mut(identifier) else {
            return false;
        };
        entry.push(turn);
        true
    }

    /// Update the leading system turn in place, or insert one at the front.
    /// Returns `false` if nothing is cached.
    pub fn replace_system(&self, identifier: &str, text: &str) -> bool {
        let Some(mut entry) = self.entries.get_mut(identifier) else {
            return false;
        };
        if entry.first().is_some_and(|first| first.role == Role::System) {
            entry[0].content = text.to_string();
        } else {
            entry.insert(0, ChatTurn::system(text));
        }
        true
    }

    /// Drop the entry for `identifier`. Returns `true` if one was present.
    pub fn invalidate(&self, identifier: &str) -> bool {
        self.entries.remove(identifier).is_some()
    }

    /// Whether an entry is cached for `identifier`.
    #[must_use]
    pub fn contains(&self, identifier: &str) -> bool {
        self.entries.contains_key(identifier)
    }

    /// Number of cached conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no conversations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
