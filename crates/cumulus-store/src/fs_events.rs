//! CRUD for the `fs_events` table: events buffered for offline subscribers.
//!
//! Rows are opaque serialized blobs keyed by `(subscriber_id, user_id)`; the
//! event pipeline owns the wire format.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::Result;

impl Database {
    /// Append a batch of serialized events for one subscriber, in order.
    pub fn insert_fs_events(
        &mut self,
        user_id: i64,
        subscriber_id: Uuid,
        events: &[String],
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn_mut().transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO fs_events (user_id, subscriber_id, event, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for event in events {
                stmt.execute(params![user_id, subscriber_id.to_string(), event, now])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Read and delete all events for a subscriber owned by `user_id`,
    /// in insertion order.
    pub fn take_fs_events_by_subscriber(
        &mut self,
        subscriber_id: Uuid,
        user_id: i64,
    ) -> Result<Vec<String>> {
        let tx = self.conn_mut().transaction()?;

        let events = {
            let mut stmt = tx.prepare(
                "SELECT event FROM fs_events
                 WHERE subscriber_id = ?1 AND user_id = ?2
                 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![subscriber_id.to_string(), user_id], |row| {
                row.get::<_, String>(0)
            })?;

            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            events
        };

        tx.execute(
            "DELETE FROM fs_events WHERE subscriber_id = ?1 AND user_id = ?2",
            params![subscriber_id.to_string(), user_id],
        )?;
        tx.commit()?;

        Ok(events)
    }

    /// Remove all events for a subscriber, regardless of owner.
    pub fn delete_fs_events_by_subscriber(&self, subscriber_id: Uuid) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM fs_events WHERE subscriber_id = ?1",
            params![subscriber_id.to_string()],
        )?;
        Ok(affected)
    }

    /// Remove every stored event.
    pub fn delete_all_fs_events(&self) -> Result<usize> {
        let affected = self.conn().execute("DELETE FROM fs_events", [])?;
        Ok(affected)
    }

    pub fn count_fs_events(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM fs_events", [], |row| row.get(0))?;
        Ok(count)
    }
}
