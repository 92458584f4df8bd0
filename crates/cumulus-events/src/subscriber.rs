//! Per-client subscriber state.
//!
//! A subscriber buffers published events and flushes them after a debounce
//! window: onto its live channel while online, into the durable event store
//! while offline. Reconnecting drains the durable store back into the buffer.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use cumulus_shared::{RequestContext, User};

use crate::event::{debounce_events, Event};
use crate::hub::EventHubOptions;
use crate::store::{EventStore, UserStore};
use crate::EventHubError;

pub struct Subscriber {
    id: Uuid,
    user_id: i64,
    users: Arc<dyn UserStore>,
    events: Arc<dyn EventStore>,
    opts: Arc<EventHubOptions>,
    state: Mutex<State>,
}

struct State {
    /// Sender half of the live channel. `None` once closed.
    tx: Option<mpsc::Sender<Event>>,
    /// Events awaiting a flush decision.
    buffer: Vec<Event>,
    online: bool,
    offline_since: Option<Instant>,
    /// Bumped on every (re)arm; a woken debounce task whose epoch no longer
    /// matches was cancelled and must not flush.
    timer_epoch: u64,
    timer_armed: bool,
    owner: Option<(Arc<User>, Instant)>,
    closed: bool,
}

impl Subscriber {
    /// Create a subscriber bound to the authenticated user of `ctx`.
    pub(crate) fn new(
        ctx: &RequestContext,
        id: Uuid,
        users: Arc<dyn UserStore>,
        events: Arc<dyn EventStore>,
        opts: Arc<EventHubOptions>,
    ) -> Result<(Arc<Self>, mpsc::Receiver<Event>), EventHubError> {
        let user = ctx.user().ok_or(EventHubError::MissingUser)?;
        let (tx, rx) = mpsc::channel(opts.channel_capacity);

        let sub = Arc::new(Self {
            id,
            user_id: user.id,
            users,
            events,
            opts,
            state: Mutex::new(State {
                tx: Some(tx),
                buffer: Vec::new(),
                online: true,
                offline_since: None,
                timer_epoch: 0,
                timer_armed: false,
                owner: Some((Arc::clone(user), Instant::now())),
                closed: false,
            }),
        });

        Ok((sub, rx))
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    /// Append an event to the buffer and (re)arm the debounce timer.
    /// No-op once the subscriber is closed.
    pub async fn publish(self: &Arc<Self>, event: Event) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }
        state.buffer.push(event);
        self.arm_timer(&mut state);
    }

    /// The owner of this subscriber, reloaded from the user store when the
    /// cached record is older than the configured TTL.
    pub async fn owner(&self) -> Result<Arc<User>> {
        let mut state = self.state.lock().await;

        if let Some((user, cached_at)) = &state.owner {
            if cached_at.elapsed() < self.opts.owner_cache_ttl {
                return Ok(Arc::clone(user));
            }
        }

        let user = self
            .users
            .user_by_id(self.user_id)
            .await?
            .ok_or_else(|| anyhow!("user {} not found", self.user_id))?;
        let user = Arc::new(user);
        state.owner = Some((Arc::clone(&user), Instant::now()));
        Ok(user)
    }

    pub async fn online(&self) -> bool {
        self.state.lock().await.online
    }

    /// When the subscriber went offline; `None` while online.
    pub async fn offline_since(&self) -> Option<Instant> {
        self.state.lock().await.offline_since
    }

    /// Copy of the events currently awaiting a flush decision.
    pub async fn buffer_snapshot(&self) -> Vec<Event> {
        self.state.lock().await.buffer.clone()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Cancel any pending debounce timer and flush remaining events.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.timer_armed = false;
        self.flush_locked(&mut state).await;
    }

    /// Reactivate the subscriber: install a fresh live channel, drop the
    /// owner cache, and drain persisted events back into the buffer in
    /// stored order. Returns `None` if the subscriber is already closed.
    pub(crate) async fn set_online(self: &Arc<Self>) -> Option<mpsc::Receiver<Event>> {
        let mut state = self.state.lock().await;
        if state.closed {
            return None;
        }

        state.online = true;
        state.offline_since = None;
        state.owner = None;
        state.timer_armed = false;

        let (tx, rx) = mpsc::channel(self.opts.channel_capacity);
        state.tx = Some(tx);

        match self.events.take_by_subscriber(self.id, self.user_id).await {
            Ok(stored) => {
                for raw in stored {
                    match serde_json::from_str::<Event>(&raw) {
                        Ok(event) => state.buffer.push(event),
                        Err(e) => warn!(
                            subscriber = %self.id,
                            error = %e,
                            "skipping undecodable stored event"
                        ),
                    }
                }
            }
            Err(e) => warn!(
                subscriber = %self.id,
                error = %e,
                "failed to load stored events"
            ),
        }

        if !state.buffer.is_empty() {
            self.arm_timer(&mut state);
        }

        Some(rx)
    }

    /// Mark the subscriber offline and flush, which persists the buffer.
    pub(crate) async fn set_offline(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }

        state.online = false;
        state.offline_since = Some(Instant::now());
        state.timer_armed = false;

        self.flush_locked(&mut state).await;
    }

    /// Permanently close the subscriber: close the channel, release the
    /// buffer, and remove its durable records.
    pub(crate) async fn close(&self) {
        let mut state = self.state.lock().await;
        if state.closed {
            return;
        }

        state.closed = true;
        state.timer_armed = false;
        state.tx = None;
        state.buffer = Vec::new();

        if let Err(e) = self.events.delete_by_subscriber(self.id).await {
            warn!(
                subscriber = %self.id,
                error = %e,
                "failed to remove stored events on close"
            );
        }
    }

    /// Whether the sweeper should expire this subscriber.
    pub(crate) async fn should_expire(&self) -> bool {
        let state = self.state.lock().await;
        match state.offline_since {
            Some(since) => !state.online && since.elapsed() > self.opts.offline_max_age,
            None => false,
        }
    }

    fn arm_timer(self: &Arc<Self>, state: &mut State) {
        state.timer_epoch = state.timer_epoch.wrapping_add(1);
        state.timer_armed = true;

        let epoch = state.timer_epoch;
        let delay = self.opts.debounce;
        let sub = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            sub.debounce_fired(epoch).await;
        });
    }

    async fn debounce_fired(&self, epoch: u64) {
        let mut state = self.state.lock().await;
        // Rearmed or cancelled since this task went to sleep.
        if !state.timer_armed || state.timer_epoch != epoch {
            return;
        }
        state.timer_armed = false;
        self.flush_locked(&mut state).await;
    }

    /// Flush the buffer: merged events onto the live channel while online,
    /// the raw buffer into the durable store while offline. Store errors are
    /// logged and the buffer dropped; the event stream is advisory.
    async fn flush_locked(&self, state: &mut State) {
        if state.buffer.is_empty() || state.closed {
            return;
        }

        if state.online {
            if let Some(tx) = &state.tx {
                for event in debounce_events(&state.buffer) {
                    match tx.try_send(event) {
                        Ok(()) => {}
                        Err(TrySendError::Full(event)) => debug!(
                            subscriber = %self.id,
                            file_id = %event.file_id,
                            "channel full, dropping event"
                        ),
                        Err(TrySendError::Closed(event)) => debug!(
                            subscriber = %self.id,
                            file_id = %event.file_id,
                            "receiver gone, dropping event"
                        ),
                    }
                }
            }
        } else {
            let serialized: Vec<String> = state
                .buffer
                .iter()
                .filter_map(|event| match serde_json::to_string(event) {
                    Ok(raw) => Some(raw),
                    Err(e) => {
                        warn!(subscriber = %self.id, error = %e, "failed to serialize event");
                        None
                    }
                })
                .collect();

            if let Err(e) = self
                .events
                .create(self.user_id, self.id, serialized)
                .await
            {
                warn!(
                    subscriber = %self.id,
                    error = %e,
                    "failed to persist buffered events"
                );
            }
        }

        state.buffer.clear();
        state.timer_armed = false;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::Utc;
    use tokio::time::{sleep, timeout};

    use crate::store::{MemoryEventStore, MemoryUserStore};

    use super::*;

    fn test_user(id: i64, name: &str) -> User {
        User {
            id,
            email: format!("u{id}@example.com"),
            display_name: Some(name.to_string()),
            created_at: Utc::now(),
        }
    }

    fn test_opts() -> Arc<EventHubOptions> {
        Arc::new(EventHubOptions {
            debounce: Duration::from_millis(40),
            ..EventHubOptions::default()
        })
    }

    struct Fixture {
        sub: Arc<Subscriber>,
        rx: mpsc::Receiver<Event>,
        events: Arc<MemoryEventStore>,
        users: Arc<MemoryUserStore>,
    }

    async fn fixture(opts: Arc<EventHubOptions>) -> Fixture {
        let users = MemoryUserStore::new();
        users.insert(test_user(1, "alice")).await;
        let events = MemoryEventStore::new();

        let ctx = RequestContext::for_user(Arc::new(test_user(1, "alice")));
        let (sub, rx) = Subscriber::new(
            &ctx,
            Uuid::new_v4(),
            users.clone(),
            events.clone(),
            opts,
        )
        .unwrap();

        Fixture {
            sub,
            rx,
            events,
            users,
        }
    }

    async fn recv_within(rx: &mut mpsc::Receiver<Event>, ms: u64) -> Option<Event> {
        timeout(Duration::from_millis(ms), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn requires_authenticated_user() {
        let result = Subscriber::new(
            &RequestContext::default(),
            Uuid::new_v4(),
            MemoryUserStore::new(),
            MemoryEventStore::new(),
            test_opts(),
        );
        assert!(matches!(result, Err(EventHubError::MissingUser)));
    }

    #[tokio::test]
    async fn debounce_delivers_merged_events() {
        let mut f = fixture(test_opts()).await;

        f.sub.publish(Event::create("7", "/f")).await;
        f.sub.publish(Event::modify("7", "/f")).await;

        let evt = recv_within(&mut f.rx, 200).await.expect("one event");
        assert_eq!(evt, Event::create("7", "/f"));
        assert!(recv_within(&mut f.rx, 80).await.is_none());
    }

    #[tokio::test]
    async fn republish_rearms_the_timer() {
        let mut f = fixture(test_opts()).await;

        f.sub.publish(Event::modify("1", "/a")).await;
        sleep(Duration::from_millis(20)).await;
        f.sub.publish(Event::modify("2", "/b")).await;

        // Both arrive in a single flush once the window finally elapses.
        let first = recv_within(&mut f.rx, 200).await.expect("first");
        let second = recv_within(&mut f.rx, 50).await.expect("second");
        assert_eq!(first.file_id, "1");
        assert_eq!(second.file_id, "2");
    }

    #[tokio::test]
    async fn stop_flushes_immediately_and_stale_timer_is_noop() {
        let mut f = fixture(test_opts()).await;

        f.sub.publish(Event::modify("1", "/a")).await;
        f.sub.stop().await;

        assert_eq!(
            recv_within(&mut f.rx, 20).await,
            Some(Event::modify("1", "/a"))
        );

        // The original debounce task wakes later and must not deliver again.
        sleep(Duration::from_millis(80)).await;
        assert!(recv_within(&mut f.rx, 20).await.is_none());
    }

    #[tokio::test]
    async fn offline_flush_persists_raw_buffer() {
        let f = fixture(test_opts()).await;

        f.sub.set_offline().await;
        f.sub.publish(Event::create("7", "/f")).await;
        f.sub.publish(Event::modify("7", "/f")).await;
        sleep(Duration::from_millis(100)).await;

        // Persisted un-merged: both raw events stored, buffer cleared.
        assert_eq!(f.events.len().await, 2);
        assert!(f.sub.buffer_snapshot().await.is_empty());
        assert!(!f.sub.online().await);
        assert!(f.sub.offline_since().await.is_some());
    }

    #[tokio::test]
    async fn set_online_drains_store_into_channel() {
        let f = fixture(test_opts()).await;

        f.sub.set_offline().await;
        f.sub.publish(Event::modify("9", "/h")).await;
        sleep(Duration::from_millis(100)).await;
        assert_eq!(f.events.len().await, 1);

        let mut rx = f.sub.set_online().await.expect("not closed");
        assert!(f.sub.online().await);
        assert!(f.sub.offline_since().await.is_none());

        let evt = recv_within(&mut rx, 200).await.expect("replayed event");
        assert_eq!(evt, Event::modify("9", "/h"));
        assert!(f.events.is_empty().await);
    }

    #[tokio::test]
    async fn undecodable_stored_rows_are_skipped() {
        let f = fixture(test_opts()).await;
        f.events
            .create(
                1,
                f.sub.id(),
                vec![
                    "not json".to_string(),
                    serde_json::to_string(&Event::modify("3", "/x")).unwrap(),
                ],
            )
            .await
            .unwrap();

        f.sub.set_offline().await;
        let mut rx = f.sub.set_online().await.unwrap();

        let evt = recv_within(&mut rx, 200).await.expect("valid event");
        assert_eq!(evt, Event::modify("3", "/x"));
        assert!(recv_within(&mut rx, 50).await.is_none());
    }

    #[tokio::test]
    async fn full_channel_drops_excess_events() {
        let opts = Arc::new(EventHubOptions {
            debounce: Duration::from_millis(40),
            channel_capacity: 1,
            ..EventHubOptions::default()
        });
        let mut f = fixture(opts).await;

        f.sub.publish(Event::modify("1", "/a")).await;
        f.sub.publish(Event::modify("2", "/b")).await;
        f.sub.publish(Event::modify("3", "/c")).await;

        let evt = recv_within(&mut f.rx, 200).await.expect("first fits");
        assert_eq!(evt.file_id, "1");
        assert!(recv_within(&mut f.rx, 80).await.is_none());
    }

    #[tokio::test]
    async fn close_is_terminal() {
        let mut f = fixture(test_opts()).await;

        f.sub.publish(Event::modify("1", "/a")).await;
        f.sub.close().await;

        // Channel closed, buffer gone, durable records wiped.
        assert!(recv_within(&mut f.rx, 80).await.is_none());
        assert!(f.sub.is_closed().await);
        assert!(f.sub.buffer_snapshot().await.is_empty());
        assert!(f.events.is_empty().await);

        // Publishing after close is a no-op.
        f.sub.publish(Event::modify("2", "/b")).await;
        sleep(Duration::from_millis(80)).await;
        assert!(f.sub.buffer_snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn owner_cache_expires_after_ttl() {
        let opts = Arc::new(EventHubOptions {
            debounce: Duration::from_millis(40),
            owner_cache_ttl: Duration::from_millis(50),
            ..EventHubOptions::default()
        });
        let f = fixture(opts).await;

        // Seeded from the request context.
        let owner = f.sub.owner().await.unwrap();
        assert_eq!(owner.display_name.as_deref(), Some("alice"));

        // The store record changes; the cache still answers until the TTL.
        f.users.insert(test_user(1, "alice-renamed")).await;
        let owner = f.sub.owner().await.unwrap();
        assert_eq!(owner.display_name.as_deref(), Some("alice"));

        sleep(Duration::from_millis(80)).await;
        let owner = f.sub.owner().await.unwrap();
        assert_eq!(owner.display_name.as_deref(), Some("alice-renamed"));
    }

    #[tokio::test]
    async fn reactivation_drops_owner_cache() {
        let f = fixture(test_opts()).await;

        f.users.insert(test_user(1, "alice-renamed")).await;
        f.sub.set_offline().await;
        let _rx = f.sub.set_online().await.unwrap();

        let owner = f.sub.owner().await.unwrap();
        assert_eq!(owner.display_name.as_deref(), Some("alice-renamed"));
    }
}
