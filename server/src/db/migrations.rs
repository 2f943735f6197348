use rusqlite_migration::{Migrations, M};

/// Define all schema migrations.
/// Uses SQLite user_version pragma for tracking, no migration table needed.
///
/// Users live in the external identity layer; messages only carry their ids.
pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![M::up(
        "-- Migration 1: direct messages

CREATE TABLE messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    from_user_id INTEGER NOT NULL,
    to_user_id INTEGER NOT NULL,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL,
    read_at TEXT,
    CHECK (from_user_id <> to_user_id)
);

CREATE INDEX idx_messages_unread ON messages(to_user_id, from_user_id, read_at);
CREATE INDEX idx_messages_pair ON messages(from_user_id, to_user_id);
",
    )])
}
