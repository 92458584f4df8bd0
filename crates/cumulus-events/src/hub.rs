//! Topic registry and subscriber lifecycle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use cumulus_shared::constants::{
    EVENT_CHANNEL_CAPACITY, EVENT_DEBOUNCE_SECS, OFFLINE_MAX_AGE_SECS, OWNER_CACHE_TTL_SECS,
    SWEEP_PERIOD_SECS,
};
use cumulus_shared::RequestContext;

use crate::event::Event;
use crate::store::{EventStore, UserStore};
use crate::subscriber::Subscriber;
use crate::EventHubError;

/// Tunables for the hub and its subscribers. Defaults are the production
/// values; tests compress the windows.
#[derive(Debug, Clone)]
pub struct EventHubOptions {
    /// Quiet period after the last publish before a subscriber flushes.
    pub debounce: Duration,
    /// How long a cached owner record stays valid.
    pub owner_cache_ttl: Duration,
    /// Offline age beyond which the sweeper expires a subscriber.
    pub offline_max_age: Duration,
    /// Interval between sweeper passes.
    pub sweep_period: Duration,
    /// Outbound channel capacity per subscriber.
    pub channel_capacity: usize,
}

impl Default for EventHubOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(EVENT_DEBOUNCE_SECS),
            owner_cache_ttl: Duration::from_secs(OWNER_CACHE_TTL_SECS),
            offline_max_age: Duration::from_secs(OFFLINE_MAX_AGE_SECS),
            sweep_period: Duration::from_secs(SWEEP_PERIOD_SECS),
            channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// Topic-indexed registry of [`Subscriber`]s.
///
/// Topics are folder identifiers. A background sweeper expires subscribers
/// that have been offline longer than [`EventHubOptions::offline_max_age`].
pub struct EventHub {
    registry: RwLock<Registry>,
    users: Arc<dyn UserStore>,
    events: Arc<dyn EventStore>,
    opts: Arc<EventHubOptions>,
    shutdown: watch::Sender<bool>,
    sweeper: std::sync::Mutex<Option<JoinHandle<()>>>,
}

struct Registry {
    topics: HashMap<i64, HashMap<Uuid, Arc<Subscriber>>>,
    closed: bool,
}

impl EventHub {
    pub async fn new(users: Arc<dyn UserStore>, events: Arc<dyn EventStore>) -> Arc<Self> {
        Self::with_options(users, events, EventHubOptions::default()).await
    }

    pub async fn with_options(
        users: Arc<dyn UserStore>,
        events: Arc<dyn EventStore>,
        opts: EventHubOptions,
    ) -> Arc<Self> {
        // Stored events from a previous run have no subscriber to resume.
        if let Err(e) = events.delete_all().await {
            warn!(error = %e, "failed to discard stale stored events");
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let hub = Arc::new(Self {
            registry: RwLock::new(Registry {
                topics: HashMap::new(),
                closed: false,
            }),
            users,
            events,
            opts: Arc::new(opts),
            shutdown,
            sweeper: std::sync::Mutex::new(None),
        });

        let handle = tokio::spawn(sweeper_loop(Arc::downgrade(&hub), shutdown_rx));
        *hub.sweeper.lock().expect("sweeper mutex") = Some(handle);

        hub
    }

    /// Subscribe to a topic and return a channel of its events.
    ///
    /// If a live subscriber with this id already exists it is reactivated and
    /// the second tuple element is `true`; buffered and persisted events will
    /// be replayed on the returned channel. A closed leftover subscriber is
    /// evicted and replaced.
    pub async fn subscribe(
        &self,
        topic: i64,
        id: Uuid,
        ctx: &RequestContext,
    ) -> Result<(mpsc::Receiver<Event>, bool), EventHubError> {
        if let Some(existing) = self.live_subscriber(topic, id).await? {
            // Reactivate outside the registry lock; set_online touches the
            // durable store.
            if let Some(rx) = existing.set_online().await {
                info!(topic, subscriber = %id, "reactivated offline subscriber");
                return Ok((rx, true));
            }
            // Closed between lookup and reactivation (sweeper race); evict
            // and fall through to create a fresh subscriber.
            self.evict(topic, id, &existing).await;
        }

        let (sub, rx) = Subscriber::new(
            ctx,
            id,
            Arc::clone(&self.users),
            Arc::clone(&self.events),
            Arc::clone(&self.opts),
        )?;

        let mut registry = self.registry.write().await;
        if registry.closed {
            return Err(EventHubError::Closed);
        }
        info!(topic, subscriber = %id, "subscribed");
        if let Some(displaced) = registry.topics.entry(topic).or_default().insert(id, sub) {
            // Another connection claimed the same id concurrently; the older
            // entry loses.
            tokio::spawn(async move { displaced.close().await });
        }

        Ok((rx, false))
    }

    /// Mark a subscriber offline instead of removing it. Buffered events are
    /// persisted for when it reconnects; subscribers offline longer than the
    /// configured maximum age are removed by the sweeper.
    pub async fn unsubscribe(&self, topic: i64, id: Uuid) {
        let sub = {
            let registry = self.registry.write().await;
            if registry.closed {
                return;
            }
            registry
                .topics
                .get(&topic)
                .and_then(|subs| subs.get(&id))
                .cloned()
        };

        if let Some(sub) = sub {
            info!(topic, subscriber = %id, "marking subscriber offline");
            sub.stop().await;
            sub.set_offline().await;
        }
    }

    /// Snapshot of the subscribers of a topic.
    pub async fn get_subscribers(&self, topic: i64) -> Vec<Arc<Subscriber>> {
        let registry = self.registry.read().await;
        registry
            .topics
            .get(&topic)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Shut down the hub: close every subscriber and stop the sweeper.
    /// Consumers observe their channel closing.
    pub async fn close(&self) {
        let subscribers: Vec<Arc<Subscriber>> = {
            let mut registry = self.registry.write().await;
            if registry.closed {
                return;
            }
            registry.closed = true;
            registry
                .topics
                .drain()
                .flat_map(|(_, subs)| subs.into_values())
                .collect()
        };

        let _ = self.shutdown.send(true);

        for sub in subscribers {
            sub.close().await;
        }

        let handle = self.sweeper.lock().expect("sweeper mutex").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Remove subscribers whose offline age exceeds the maximum, closing
    /// them and dropping empty topics.
    pub(crate) async fn sweep_expired(&self) {
        let expired: Vec<Arc<Subscriber>> = {
            let mut registry = self.registry.write().await;
            if registry.closed {
                return;
            }

            let mut expired = Vec::new();
            for subs in registry.topics.values_mut() {
                let mut dead = Vec::new();
                for (id, sub) in subs.iter() {
                    if sub.should_expire().await {
                        dead.push(*id);
                    }
                }
                for id in dead {
                    if let Some(sub) = subs.remove(&id) {
                        expired.push(sub);
                    }
                }
            }
            registry.topics.retain(|_, subs| !subs.is_empty());
            expired
        };

        // Close outside the registry lock; close touches the durable store.
        for sub in expired {
            info!(subscriber = %sub.id(), "expiring subscriber offline too long");
            sub.close().await;
        }
    }

    /// Look up a non-closed subscriber, evicting a closed leftover entry.
    async fn live_subscriber(
        &self,
        topic: i64,
        id: Uuid,
    ) -> Result<Option<Arc<Subscriber>>, EventHubError> {
        let mut registry = self.registry.write().await;
        if registry.closed {
            return Err(EventHubError::Closed);
        }

        let Some(subs) = registry.topics.get_mut(&topic) else {
            return Ok(None);
        };
        let Some(sub) = subs.get(&id) else {
            return Ok(None);
        };

        if sub.is_closed().await {
            subs.remove(&id);
            return Ok(None);
        }
        Ok(Some(Arc::clone(sub)))
    }

    /// Remove `sub` from the registry if it is still the entry for this id.
    async fn evict(&self, topic: i64, id: Uuid, sub: &Arc<Subscriber>) {
        let mut registry = self.registry.write().await;
        if let Some(subs) = registry.topics.get_mut(&topic) {
            if subs.get(&id).is_some_and(|s| Arc::ptr_eq(s, sub)) {
                subs.remove(&id);
            }
        }
    }
}

async fn sweeper_loop(hub: std::sync::Weak<EventHub>, mut shutdown: watch::Receiver<bool>) {
    let period = match hub.upgrade() {
        Some(hub) => hub.opts.sweep_period,
        None => return,
    };

    let mut ticker = tokio::time::interval(period);
    // The first tick of a tokio interval completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                debug!("sweeper shutting down");
                return;
            }
            _ = ticker.tick() => {
                let Some(hub) = hub.upgrade() else { return };
                hub.sweep_expired().await;
            }
        }
    }
}
