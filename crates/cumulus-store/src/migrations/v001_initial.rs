//! v001 -- Initial schema creation.
//!
//! Creates the two core tables: `users` and `fs_events`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    email        TEXT NOT NULL UNIQUE,
    display_name TEXT,
    api_token    TEXT UNIQUE,                 -- bearer token for API access
    created_at   TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Buffered filesystem events for offline subscribers
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS fs_events (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id       INTEGER NOT NULL,           -- FK -> users(id)
    subscriber_id TEXT NOT NULL,              -- UUID v4
    event         TEXT NOT NULL,              -- opaque serialized event
    created_at    TEXT NOT NULL,

    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_fs_events_subscriber
    ON fs_events(subscriber_id, user_id);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
