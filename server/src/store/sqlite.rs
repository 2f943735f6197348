use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use std::cmp::Ordering;
use std::collections::HashMap;

use super::{Conversation, Message, MessageStore, StorageError, UnreadCounts};
use crate::db::DbPool;
use crate::UserId;

/// [`MessageStore`] backed by the `messages` table.
#[derive(Clone)]
pub struct SqliteMessageStore {
    db: DbPool,
}

impl SqliteMessageStore {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>, StorageError> {
        self.db.lock().map_err(|_| StorageError::LockPoisoned)
    }
}

/// Fixed-width RFC 3339 so lexical order in SQL matches time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

const MESSAGE_COLUMNS: &str = "id, from_user_id, to_user_id, body, created_at, read_at";

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let created_at: String = row.get(4)?;
    let read_at: Option<String> = row.get(5)?;
    Ok(Message {
        id: row.get(0)?,
        from: row.get(1)?,
        to: row.get(2)?,
        body: row.get(3)?,
        created_at: parse_timestamp(4, &created_at)?,
        read_at: read_at.as_deref().map(|raw| parse_timestamp(5, raw)).transpose()?,
    })
}

impl MessageStore for SqliteMessageStore {
    fn append(
        &self,
        sender: UserId,
        recipient: UserId,
        body: &str,
    ) -> Result<Message, StorageError> {
        let conn = self.lock()?;
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO messages (from_user_id, to_user_id, body, created_at) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![sender, recipient, body, format_timestamp(created_at)],
        )?;

        // Round-trip through the stored text so the returned value matches what
        // history() will later report.
        let id = conn.last_insert_rowid();
        let message = conn.query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
            [id],
            message_from_row,
        )?;
        Ok(message)
    }

    fn history(&self, user_a: UserId, user_b: UserId) -> Result<Vec<Message>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE (from_user_id = ?1 AND to_user_id = ?2)
                OR (from_user_id = ?2 AND to_user_id = ?1)
             ORDER BY created_at ASC, id ASC"
        ))?;
        let messages = stmt
            .query_map(rusqlite::params![user_a, user_b], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn mark_read(&self, recipient: UserId, sender: UserId) -> Result<usize, StorageError> {
        let conn = self.lock()?;
        let updated = conn.execute(
            "UPDATE messages SET read_at = ?3
             WHERE to_user_id = ?1 AND from_user_id = ?2 AND read_at IS NULL",
            rusqlite::params![recipient, sender, format_timestamp(Utc::now())],
        )?;
        Ok(updated)
    }

    fn unread_counts(&self, recipient: UserId) -> Result<UnreadCounts, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT from_user_id, COUNT(*) FROM messages
             WHERE to_user_id = ?1 AND read_at IS NULL
             GROUP BY from_user_id",
        )?;
        let counts = stmt
            .query_map([recipient], |row| {
                Ok((row.get::<_, UserId>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<UnreadCounts>>()?;
        Ok(counts)
    }

    fn conversations(&self, user: UserId) -> Result<Vec<Conversation>, StorageError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT from_user_id, to_user_id, body, created_at, read_at FROM messages
             WHERE from_user_id = ?1 OR to_user_id = ?1
             ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([user], |row| {
            Ok((
                row.get::<_, UserId>(0)?,
                row.get::<_, UserId>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;

        let mut by_user: HashMap<UserId, Conversation> = HashMap::new();
        for row in rows {
            let (from, to, body, created_at, read_at) = row?;
            let other = if from == user { to } else { from };
            let entry = by_user.entry(other).or_insert_with(|| Conversation {
                user_id: other,
                last_message: String::new(),
                last_message_time: None,
                unread_count: 0,
            });
            // Rows arrive oldest first, so the last write wins.
            entry.last_message = body;
            entry.last_message_time = DateTime::parse_from_rfc3339(&created_at)
                .ok()
                .map(|ts| ts.with_timezone(&Utc));
            if to == user && read_at.is_none() {
                entry.unread_count += 1;
            }
        }

        let mut conversations: Vec<Conversation> = by_user.into_values().collect();
        conversations.sort_by(compare_recent_first);
        Ok(conversations)
    }
}

/// Most recent first; missing timestamps last; ties by correspondent id.
fn compare_recent_first(a: &Conversation, b: &Conversation) -> Ordering {
    match (a.last_message_time, b.last_message_time) {
        (Some(ta), Some(tb)) => tb.cmp(&ta),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
    .then(a.user_id.cmp(&b.user_id))
}
