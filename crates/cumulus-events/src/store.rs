//! Persistence contracts consumed by the event pipeline.
//!
//! The database layer provides the real implementations; the in-memory ones
//! here back tests and embedded setups.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use cumulus_shared::User;

/// Durable storage for events buffered while a subscriber is offline.
///
/// Events are opaque serialized blobs to the store; the pipeline owns the
/// wire format.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append a batch of serialized events for one subscriber.
    async fn create(&self, user_id: i64, subscriber_id: Uuid, events: Vec<String>) -> Result<()>;

    /// Read and delete all stored events for a subscriber owned by `user_id`,
    /// in insertion order.
    async fn take_by_subscriber(&self, subscriber_id: Uuid, user_id: i64) -> Result<Vec<String>>;

    /// Remove all events for a subscriber, regardless of owner.
    async fn delete_by_subscriber(&self, subscriber_id: Uuid) -> Result<()>;

    /// Remove every stored event. Invoked once at hub startup to discard
    /// records from a previous run.
    async fn delete_all(&self) -> Result<()>;
}

/// Lookup of subscriber owners and API credentials.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user_by_id(&self, id: i64) -> Result<Option<User>>;

    async fn user_by_token(&self, token: &str) -> Result<Option<User>>;
}

/// In-memory [`EventStore`], keeps insertion order per subscriber.
#[derive(Default)]
pub struct MemoryEventStore {
    rows: Mutex<Vec<StoredEvent>>,
}

struct StoredEvent {
    user_id: i64,
    subscriber_id: Uuid,
    event: String,
}

impl MemoryEventStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn len(&self) -> usize {
        self.rows.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.lock().await.is_empty()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn create(&self, user_id: i64, subscriber_id: Uuid, events: Vec<String>) -> Result<()> {
        let mut rows = self.rows.lock().await;
        rows.extend(events.into_iter().map(|event| StoredEvent {
            user_id,
            subscriber_id,
            event,
        }));
        Ok(())
    }

    async fn take_by_subscriber(&self, subscriber_id: Uuid, user_id: i64) -> Result<Vec<String>> {
        let mut rows = self.rows.lock().await;
        let mut taken = Vec::new();
        rows.retain(|row| {
            if row.subscriber_id == subscriber_id && row.user_id == user_id {
                taken.push(row.event.clone());
                false
            } else {
                true
            }
        });
        Ok(taken)
    }

    async fn delete_by_subscriber(&self, subscriber_id: Uuid) -> Result<()> {
        let mut rows = self.rows.lock().await;
        rows.retain(|row| row.subscriber_id != subscriber_id);
        Ok(())
    }

    async fn delete_all(&self) -> Result<()> {
        self.rows.lock().await.clear();
        Ok(())
    }
}

/// In-memory [`UserStore`].
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<i64, User>>,
    tokens: Mutex<HashMap<String, i64>>,
}

impl MemoryUserStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, user: User) {
        self.users.lock().await.insert(user.id, user);
    }

    pub async fn insert_with_token(&self, user: User, token: &str) {
        self.tokens.lock().await.insert(token.to_string(), user.id);
        self.insert(user).await;
    }
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn user_by_id(&self, id: i64) -> Result<Option<User>> {
        Ok(self.users.lock().await.get(&id).cloned())
    }

    async fn user_by_token(&self, token: &str) -> Result<Option<User>> {
        let id = match self.tokens.lock().await.get(token) {
            Some(id) => *id,
            None => return Ok(None),
        };
        self.user_by_id(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_removes_matching_rows_in_order() {
        let store = MemoryEventStore::new();
        let sub = Uuid::new_v4();
        let other = Uuid::new_v4();

        store
            .create(1, sub, vec!["a".into(), "b".into()])
            .await
            .unwrap();
        store.create(1, other, vec!["x".into()]).await.unwrap();
        store.create(2, sub, vec!["c".into()]).await.unwrap();

        let taken = store.take_by_subscriber(sub, 1).await.unwrap();
        assert_eq!(taken, vec!["a".to_string(), "b".to_string()]);

        // Rows for the other user and the other subscriber remain.
        assert_eq!(store.len().await, 2);

        // A second take is empty.
        assert!(store.take_by_subscriber(sub, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_by_subscriber_ignores_owner() {
        let store = MemoryEventStore::new();
        let sub = Uuid::new_v4();

        store.create(1, sub, vec!["a".into()]).await.unwrap();
        store.create(2, sub, vec!["b".into()]).await.unwrap();

        store.delete_by_subscriber(sub).await.unwrap();
        assert!(store.is_empty().await);
    }
}
