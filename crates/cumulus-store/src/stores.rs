//! Async adapters implementing the event-pipeline store contracts on top of
//! the SQLite [`Database`].
//!
//! Statements are short; the connection is taken behind a tokio mutex and
//! the guard is never held across an await point.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use cumulus_events::store::{EventStore, UserStore};
use cumulus_shared::User;

use crate::database::Database;
use crate::error::StoreError;

/// [`EventStore`] backed by the `fs_events` table.
#[derive(Clone)]
pub struct SqliteEventStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteEventStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn create(&self, user_id: i64, subscriber_id: Uuid, events: Vec<String>) -> Result<()> {
        let mut db = self.db.lock().await;
        db.insert_fs_events(user_id, subscriber_id, &events)?;
        Ok(())
    }

    async fn take_by_subscriber(&self, subscriber_id: Uuid, user_id: i64) -> Result<Vec<String>> {
        let mut db = self.db.lock().await;
        Ok(db.take_fs_events_by_subscriber(subscriber_id, user_id)?)
    }

    async fn delete_by_subscriber(&self, subscriber_id: Uuid) -> Result<()> {
        let db = self.db.lock().await;
        db.delete_fs_events_by_subscriber(subscriber_id)?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        let db = self.db.lock().await;
        db.delete_all_fs_events()?;
        Ok(())
    }
}

/// [`UserStore`] backed by the `users` table.
#[derive(Clone)]
pub struct SqliteUserStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteUserStore {
    pub fn new(db: Arc<Mutex<Database>>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for SqliteUserStore {
    async fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        let db = self.db.lock().await;
        match db.user_by_id(id) {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn user_by_token(&self, token: &str) -> Result<Option<User>> {
        let db = self.db.lock().await;
        match db.user_by_token(token) {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
