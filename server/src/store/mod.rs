//! Durable message log.
//!
//! The store is the sole authority for messages; the in-memory registry and
//! unread tally only cache what can be rebuilt from it.

pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::UserId;

pub use sqlite::SqliteMessageStore;

/// sender id -> number of messages from that sender with no read timestamp.
pub type UnreadCounts = BTreeMap<UserId, u64>;

/// Shared handle to the persistence layer.
pub type SharedStore = Arc<dyn MessageStore>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database lock poisoned")]
    LockPoisoned,

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("storage task failed: {0}")]
    Task(String),
}

/// A persisted direct message. Only `read_at` ever changes after insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub from: UserId,
    pub to: UserId,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

/// One row of a user's inbox: the latest exchange with a single correspondent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub user_id: UserId,
    pub last_message: String,
    pub last_message_time: Option<DateTime<Utc>>,
    pub unread_count: u64,
}

/// Persistence contract consumed by the messaging core.
///
/// Calls are blocking; async callers go through [`run_blocking`].
pub trait MessageStore: Send + Sync {
    /// Persist a new message and return it with its id and creation time.
    fn append(&self, sender: UserId, recipient: UserId, body: &str)
        -> Result<Message, StorageError>;

    /// Both directions of the conversation, oldest first.
    fn history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<Message>, StorageError>;

    /// Stamp every unread message from `sender` to `recipient` with the current
    /// time. Returns how many messages changed; a repeat call returns 0.
    fn mark_read(&self, recipient: UserId, sender: UserId) -> Result<usize, StorageError>;

    fn unread_counts(&self, recipient: UserId) -> Result<UnreadCounts, StorageError>;

    /// One entry per correspondent, most recent exchange first.
    fn conversations(&self, user: UserId) -> Result<Vec<Conversation>, StorageError>;
}

/// Run a store call on the blocking pool so a slow query only stalls the
/// calling connection's task.
pub async fn run_blocking<T, F>(store: &SharedStore, f: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce(&dyn MessageStore) -> Result<T, StorageError> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || f(store.as_ref()))
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
}
