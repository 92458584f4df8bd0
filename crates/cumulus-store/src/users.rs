//! CRUD for the `users` table.

use chrono::{DateTime, Utc};
use rusqlite::params;

use cumulus_shared::User;

use crate::database::Database;
use crate::error::{Result, StoreError};

impl Database {
    /// Insert a user and return the stored record.
    pub fn insert_user(
        &self,
        email: &str,
        display_name: Option<&str>,
        api_token: Option<&str>,
    ) -> Result<User> {
        let created_at = Utc::now();
        self.conn().execute(
            "INSERT INTO users (email, display_name, api_token, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![email, display_name, api_token, created_at.to_rfc3339()],
        )?;

        Ok(User {
            id: self.conn().last_insert_rowid(),
            email: email.to_string(),
            display_name: display_name.map(String::from),
            created_at,
        })
    }

    pub fn user_by_id(&self, id: i64) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, email, display_name, created_at FROM users WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn user_by_token(&self, token: &str) -> Result<User> {
        self.conn()
            .query_row(
                "SELECT id, email, display_name, created_at FROM users WHERE api_token = ?1",
                params![token],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn count_users(&self) -> Result<i64> {
        let count = self
            .conn()
            .query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;
        Ok(count)
    }
}

fn not_found(e: rusqlite::Error) -> StoreError {
    match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
        other => StoreError::Sqlite(other),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let ts_str: String = row.get(3)?;
    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        display_name: row.get(2)?,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> (Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        (db, dir)
    }

    #[test]
    fn insert_and_fetch_by_id() {
        let (db, _dir) = test_db();

        let user = db
            .insert_user("alice@example.com", Some("Alice"), Some("tok-1"))
            .unwrap();
        let fetched = db.user_by_id(user.id).unwrap();

        assert_eq!(fetched.email, "alice@example.com");
        assert_eq!(fetched.display_name.as_deref(), Some("Alice"));
    }

    #[test]
    fn fetch_by_token() {
        let (db, _dir) = test_db();

        let user = db.insert_user("bob@example.com", None, Some("tok-2")).unwrap();
        let fetched = db.user_by_token("tok-2").unwrap();
        assert_eq!(fetched.id, user.id);

        assert!(matches!(
            db.user_by_token("unknown"),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn missing_user_is_not_found() {
        let (db, _dir) = test_db();
        assert!(matches!(db.user_by_id(999), Err(StoreError::NotFound)));
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let (db, _dir) = test_db();
        db.insert_user("dup@example.com", None, None).unwrap();
        assert!(db.insert_user("dup@example.com", None, None).is_err());
    }

    #[test]
    fn count_reflects_inserts() {
        let (db, _dir) = test_db();
        assert_eq!(db.count_users().unwrap(), 0);
        db.insert_user("a@example.com", None, None).unwrap();
        db.insert_user("b@example.com", None, None).unwrap();
        assert_eq!(db.count_users().unwrap(), 2);
    }
}
