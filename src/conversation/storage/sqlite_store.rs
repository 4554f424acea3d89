//! SQLite-backed conversation, message and feedback store.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use tokio_rusqlite::Connection;

use crate::conversation::core::errors::ChatResult;
use crate::conversation::core::records::{Conversation, DEFAULT_TITLE, Feedback, Message};
use crate::conversation::core::role::Role;

/// Boxed future type for store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS conversations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id TEXT NOT NULL UNIQUE,
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        active INTEGER NOT NULL DEFAULT 1,
        system_message TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_active_updated
        ON conversations (active, updated_at DESC);
    CREATE TABLE IF NOT EXISTS messages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_pk INTEGER NOT NULL REFERENCES conversations (id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_conversation_created
        ON messages (conversation_pk, created_at, id);
    CREATE TABLE IF NOT EXISTS feedback (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        message_id INTEGER NOT NULL UNIQUE REFERENCES messages (id) ON DELETE CASCADE,
        is_positive INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    );";

const CONVERSATION_COLUMNS: &str =
    "id, conversation_id, title, created_at, updated_at, active, system_message";
const MESSAGE_COLUMNS: &str = "id, conversation_pk, role, content, created_at";

/// Persistent store for conversations, messages and feedback.
pub trait ConversationStore: Send + Sync {
    /// Look up a conversation by its external identifier.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_conversation(
        &self,
        identifier: &str,
    ) -> StoreFuture<'_, ChatResult<Option<Conversation>>>;

    /// Return the conversation for `identifier`, creating it together with its system
    /// message in one transaction if absent. The flag is `true` when a row was created.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get_or_create_conversation(
        &self,
        identifier: &str,
        system_prompt: &str,
    ) -> StoreFuture<'_, ChatResult<(Conversation, bool)>>;

    /// All messages of a conversation, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_messages(&self, conversation_pk: i64) -> StoreFuture<'_, ChatResult<Vec<Message>>>;

    /// Insert one message and touch the conversation. When `first_title` is given and the
    /// conversation holds at most two messages after the insert, the title is set as well.
    ///
    /// # Errors
    /// Returns an error if storage access fails; nothing is written in that case.
    fn append_message(
        &self,
        conversation_pk: i64,
        role: Role,
        content: &str,
        first_title: Option<String>,
    ) -> StoreFuture<'_, ChatResult<Message>>;

    /// Update the first system message (inserting one ahead of all others if missing)
    /// and the conversation's stored prompt.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn set_system_message(&self, conversation_pk: i64, text: &str)
    -> StoreFuture<'_, ChatResult<()>>;

    /// Mark a conversation inactive. Returns `false` if the identifier is unknown.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn deactivate(&self, identifier: &str) -> StoreFuture<'_, ChatResult<bool>>;

    /// Active conversations, most recently updated first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_active(&self, skip: u32, limit: u32) -> StoreFuture<'_, ChatResult<Vec<Conversation>>>;

    /// Non-system messages of a conversation, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_visible_messages(
        &self,
        conversation_pk: i64,
        skip: u32,
        limit: u32,
    ) -> StoreFuture<'_, ChatResult<Vec<Message>>>;

    /// Look up a message by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_message(&self, message_id: i64) -> StoreFuture<'_, ChatResult<Option<Message>>>;

    /// Insert or replace the single feedback row of a message.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the message does not exist.
    fn upsert_feedback(
        &self,
        message_id: i64,
        is_positive: bool,
    ) -> StoreFuture<'_, ChatResult<Feedback>>;

    /// Feedback recorded for a message, if any.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn find_feedback(&self, message_id: i64) -> StoreFuture<'_, ChatResult<Option<Feedback>>>;
}

/// `SQLite` implementation of the conversation store.
pub struct SqliteConversationStore {
    conn: Connection,
}

impl SqliteConversationStore {
    /// Open (or create) the database file and ensure the schema exists.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open(path: impl AsRef<Path>) -> ChatResult<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        Self::init(conn).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened.
    pub async fn open_in_memory() -> ChatResult<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> ChatResult<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;
        Ok(Self { conn })
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

fn conversation_from_row(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        title: row.get(2)?,
        created_at: timestamp_at(row, 3)?,
        updated_at: timestamp_at(row, 4)?,
        active: row.get(5)?,
        system_message: row.get(6)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        conversation_pk: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: timestamp_at(row, 4)?,
    })
}

fn feedback_from_row(row: &Row<'_>) -> rusqlite::Result<Feedback> {
    Ok(Feedback {
        id: row.get(0)?,
        message_id: row.get(1)?,
        is_positive: row.get(2)?,
        created_at: timestamp_at(row, 3)?,
    })
}

impl ConversationStore for SqliteConversationStore {
    fn find_conversation(
        &self,
        identifier: &str,
    ) -> StoreFuture<'_, ChatResult<Option<Conversation>>> {
        let identifier = identifier.to_string();
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT {CONVERSATION_COLUMNS} FROM conversations
                                 WHERE conversation_id = ?1"
                            ),
                            params![identifier],
                            conversation_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(row)
        })
    }

    fn get_or_create_conversation(
        &self,
        identifier: &str,
        system_prompt: &str,
    ) -> StoreFuture<'_, ChatResult<(Conversation, bool)>> {
        let identifier = identifier.to_string();
        let system_prompt = system_prompt.to_string();
        Box::pin(async move {
            let now = now_millis();
            let result = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let inserted = tx.execute(
                        "INSERT INTO conversations
                         (conversation_id, title, created_at, updated_at, active, system_message)
                         VALUES (?1, ?2, ?3, ?3, 1, ?4)
                         ON CONFLICT (conversation_id) DO NOTHING",
                        params![identifier, DEFAULT_TITLE, now, system_prompt],
                    )?;
                    if inserted == 1 {
                        let conversation_pk = tx.last_insert_rowid();
                        tx.execute(
                            "INSERT INTO messages (conversation_pk, role, content, created_at)
                             VALUES (?1, ?2, ?3, ?4)",
                            params![conversation_pk, Role::System, system_prompt, now],
                        )?;
                    }
                    let conversation = tx.query_row(
                        &format!(
                            "SELECT {CONVERSATION_COLUMNS} FROM conversations
                             WHERE conversation_id = ?1"
                        ),
                        params![identifier],
                        conversation_from_row,
                    )?;
                    tx.commit()?;
                    Ok((conversation, inserted == 1))
                })
                .await?;
            Ok(result)
        })
    }

    fn list_messages(&self, conversation_pk: i64) -> StoreFuture<'_, ChatResult<Vec<Message>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_pk = ?1
                         ORDER BY created_at, id"
                    ))?;
                    let rows = stmt
                        .query_map(params![conversation_pk], message_from_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }

    fn append_message(
        &self,
        conversation_pk: i64,
        role: Role,
        content: &str,
        first_title: Option<String>,
    ) -> StoreFuture<'_, ChatResult<Message>> {
        let content = content.to_string();
        Box::pin(async move {
            let now = now_millis();
            let message = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        "INSERT INTO messages (conversation_pk, role, content, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![conversation_pk, role, content, now],
                    )?;
                    let message_id = tx.last_insert_rowid();
                    let count: i64 = tx.query_row(
                        "SELECT COUNT(*) FROM messages WHERE conversation_pk = ?1",
                        params![conversation_pk],
                        |row| row.get(0),
                    )?;
                    match first_title {
                        Some(title) if count <= 2 => {
                            tx.execute(
                                "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3",
                                params![title, now, conversation_pk],
                            )?;
                        }
                        _ => {
                            tx.execute(
                                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                                params![now, conversation_pk],
                            )?;
                        }
                    }
                    let message = tx.query_row(
                        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                        params![message_id],
                        message_from_row,
                    )?;
                    tx.commit()?;
                    Ok(message)
                })
                .await?;
            Ok(message)
        })
    }

    fn set_system_message(
        &self,
        conversation_pk: i64,
        text: &str,
    ) -> StoreFuture<'_, ChatResult<()>> {
        let text = text.to_string();
        Box::pin(async move {
            let now = now_millis();
            self.conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    let updated = tx.execute(
                        "UPDATE messages SET content = ?1
                         WHERE id = (
                             SELECT id FROM messages
                             WHERE conversation_pk = ?2 AND role = ?3
                             ORDER BY created_at, id
                             LIMIT 1
                         )",
                        params![text, conversation_pk, Role::System],
                    )?;
                    if updated == 0 {
                        // Date it before every existing message so it sorts first.
                        tx.execute(
                            "INSERT INTO messages (conversation_pk, role, content, created_at)
                             VALUES (?1, ?2, ?3, COALESCE(
                                 (SELECT MIN(created_at) - 1 FROM messages WHERE conversation_pk = ?1),
                                 ?4
                             ))",
                            params![conversation_pk, Role::System, text, now],
                        )?;
                    }
                    tx.execute(
                        "UPDATE conversations SET system_message = ?1, updated_at = ?2 WHERE id = ?3",
                        params![text, now, conversation_pk],
                    )?;
                    tx.commit()?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn deactivate(&self, identifier: &str) -> StoreFuture<'_, ChatResult<bool>> {
        let identifier = identifier.to_string();
        Box::pin(async move {
            let now = now_millis();
            let changed = self
                .conn
                .call(move |conn| {
                    let changed = conn.execute(
                        "UPDATE conversations SET active = 0, updated_at = ?1
                         WHERE conversation_id = ?2",
                        params![now, identifier],
                    )?;
                    Ok(changed)
                })
                .await?;
            Ok(changed > 0)
        })
    }

    fn list_active(&self, skip: u32, limit: u32) -> StoreFuture<'_, ChatResult<Vec<Conversation>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations
                         WHERE active = 1
                         ORDER BY updated_at DESC, id DESC
                         LIMIT ?1 OFFSET ?2"
                    ))?;
                    let rows = stmt
                        .query_map(params![limit, skip], conversation_from_row)?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }

    fn list_visible_messages(
        &self,
        conversation_pk: i64,
        skip: u32,
        limit: u32,
    ) -> StoreFuture<'_, ChatResult<Vec<Message>>> {
        Box::pin(async move {
            let rows = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT {MESSAGE_COLUMNS} FROM messages
                         WHERE conversation_pk = ?1 AND role != ?2
                         ORDER BY created_at, id
                         LIMIT ?3 OFFSET ?4"
                    ))?;
                    let rows = stmt
                        .query_map(
                            params![conversation_pk, Role::System, limit, skip],
                            message_from_row,
                        )?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(rows)
                })
                .await?;
            Ok(rows)
        })
    }

    fn find_message(&self, message_id: i64) -> StoreFuture<'_, ChatResult<Option<Message>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                            params![message_id],
                            message_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(row)
        })
    }

    fn upsert_feedback(
        &self,
        message_id: i64,
        is_positive: bool,
    ) -> StoreFuture<'_, ChatResult<Feedback>> {
        Box::pin(async move {
            let now = now_millis();
            let feedback = self
                .conn
                .call(move |conn| {
                    let tx = conn.transaction()?;
                    tx.execute(
                        "INSERT INTO feedback (message_id, is_positive, created_at)
                         VALUES (?1, ?2, ?3)
                         ON CONFLICT (message_id) DO UPDATE
                         SET is_positive = excluded.is_positive,
                             created_at = excluded.created_at",
                        params![message_id, is_positive, now],
                    )?;
                    let feedback = tx.query_row(
                        "SELECT id, message_id, is_positive, created_at
                         FROM feedback WHERE message_id = ?1",
                        params![message_id],
                        feedback_from_row,
                    )?;
                    tx.commit()?;
                    Ok(feedback)
                })
                .await?;
            Ok(feedback)
        })
    }

    fn find_feedback(&self, message_id: i64) -> StoreFuture<'_, ChatResult<Option<Feedback>>> {
        Box::pin(async move {
            let row = self
                .conn
                .call(move |conn| {
                    let row = conn
                        .query_row(
                            "SELECT id, message_id, is_positive, created_at
                             FROM feedback WHERE message_id = ?1",
                            params![message_id],
                            feedback_from_row,
                        )
                        .optional()?;
                    Ok(row)
                })
                .await?;
            Ok(row)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::core::records::DEFAULT_SYSTEM_PROMPT;

    async fn store() -> SqliteConversationStore {
        SqliteConversationStore::open_in_memory().await.unwrap()
    }

    async fn count_rows(store: &SqliteConversationStore, table: &'static str) -> i64 {
        store
            .conn
            .call(move |conn| {
                let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?;
                Ok(count)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let store = store().await;

        let (first, created) = store
            .get_or_create_conversation("c1", DEFAULT_SYSTEM_PROMPT)
            .await
            .unwrap();
        assert!(created);
        assert!(first.active);
        assert_eq!(first.title, DEFAULT_TITLE);
        assert_eq!(first.system_message, DEFAULT_SYSTEM_PROMPT);

        let (second, created) = store
            .get_or_create_conversation("c1", DEFAULT_SYSTEM_PROMPT)
            .await
            .unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);

        assert_eq!(count_rows(&store, "conversations").await, 1);
        let messages = store.list_messages(first.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, DEFAULT_SYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_append_sets_title_only_on_first_exchange() {
        let store = store().await;
        let (conv, _) = store
            .get_or_create_conversation("c1", DEFAULT_SYSTEM_PROMPT)
            .await
            .unwrap();

        store
            .append_message(conv.id, Role::User, "first", Some("first".to_string()))
            .await
            .unwrap();
        store
            .append_message(conv.id, Role::Assistant, "reply", None)
            .await
            .unwrap();
        store
            .append_message(conv.id, Role::User, "second", Some("second".to_string()))
            .await
            .unwrap();

        let conv = store.find_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conv.title, "first");

        let contents: Vec<String> = store
            .list_messages(conv.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec![DEFAULT_SYSTEM_PROMPT, "first", "reply", "second"]);
    }

    #[tokio::test]
    async fn test_append_to_unknown_conversation_fails() {
        let store = store().await;
        let result = store.append_message(42, Role::User, "orphan", None).await;
        assert!(result.is_err());
        assert_eq!(count_rows(&store, "messages").await, 0);
    }

    #[tokio::test]
    async fn test_set_system_message_updates_or_inserts_first() {
        let store = store().await;
        let (conv, _) = store
            .get_or_create_conversation("c1", DEFAULT_SYSTEM_PROMPT)
            .await
            .unwrap();

        store.set_system_message(conv.id, "Be terse.").await.unwrap();
        let messages = store.list_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "Be terse.");
        let conv = store.find_conversation("c1").await.unwrap().unwrap();
        assert_eq!(conv.system_message, "Be terse.");

        // Remove the system row to exercise the insert path.
        store
            .conn
            .call(|conn| {
                conn.execute("DELETE FROM messages WHERE role = 'system'", [])?;
                Ok(())
            })
            .await
            .unwrap();
        store
            .append_message(conv.id, Role::User, "hi", None)
            .await
            .unwrap();
        store.set_system_message(conv.id, "Be kind.").await.unwrap();

        let messages = store.list_messages(conv.id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[0].content, "Be kind.");
        assert_eq!(messages[1].content, "hi");
    }

    #[tokio::test]
    async fn test_deactivate_and_list_active() {
        let store = store().await;
        store
            .get_or_create_conversation("a", DEFAULT_SYSTEM_PROMPT)
            .await
            .unwrap();
        let (b, _) = store
            .get_or_create_conversation("b", DEFAULT_SYSTEM_PROMPT)
            .await
            .unwrap();
        store
            .get_or_create_conversation("c", DEFAULT_SYSTEM_PROMPT)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store
            .append_message(b.id, Role::User, "bump", None)
            .await
            .unwrap();

        assert!(store.deactivate("c").await.unwrap());
        assert!(!store.deactivate("missing").await.unwrap());

        let active: Vec<String> = store
            .list_active(0, 10)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.conversation_id)
            .collect();
        assert_eq!(active, vec!["b", "a"]);

        let page = store.list_active(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].conversation_id, "a");

        let c = store.find_conversation("c").await.unwrap().unwrap();
        assert!(!c.active);
    }

    #[tokio::test]
    async fn test_visible_messages_skip_system_and_paginate() {
        let store = store().await;
        let (conv, _) = store
            .get_or_create_conversation("c1", DEFAULT_SYSTEM_PROMPT)
            .await
            .unwrap();
        for i in 0..4 {
            store
                .append_message(conv.id, Role::User, &format!("m{i}"), None)
                .await
                .unwrap();
        }

        let all = store.list_visible_messages(conv.id, 0, 50).await.unwrap();
        assert_eq!(all.len(), 4);
        assert!(all.iter().all(|m| m.role != Role::System));

        let page = store.list_visible_messages(conv.id, 1, 2).await.unwrap();
        let contents: Vec<&str> = page.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m1", "m2"]);
    }

    #[tokio::test]
    async fn test_feedback_upsert_keeps_one_row() {
        let store = store().await;
        let (conv, _) = store
            .get_or_create_conversation("c1", DEFAULT_SYSTEM_PROMPT)
            .await
            .unwrap();
        let message = store
            .append_message(conv.id, Role::Assistant, "answer", None)
            .await
            .unwrap();

        let first = store.upsert_feedback(message.id, true).await.unwrap();
        assert!(first.is_positive);
        let second = store.upsert_feedback(message.id, false).await.unwrap();
        assert!(!second.is_positive);
        assert_eq!(first.id, second.id);

        assert_eq!(count_rows(&store, "feedback").await, 1);
        let stored = store.find_feedback(message.id).await.unwrap().unwrap();
        assert!(!stored.is_positive);
        assert!(store.find_message(message.id).await.unwrap().is_some());
        assert!(store.find_message(message.id + 100).await.unwrap().is_none());
    }
}
