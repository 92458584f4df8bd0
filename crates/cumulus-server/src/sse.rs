//! Server-Sent Events delivery of filesystem change notifications.
//!
//! On connect the client receives a `subscribed` or `resumed` frame, then an
//! `event` frame per delivered change, with keep-alive comments in between.
//! Dropping the stream (client disconnect) marks the subscriber offline so
//! its events are buffered for a reconnect.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::response::sse;
use futures::Stream;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

use cumulus_events::{Event, EventHub};

/// Stream adapter turning a subscriber channel into SSE frames.
pub struct EventSource {
    /// Emitted once, before any event: `subscribed` or `resumed`.
    opening: Option<&'static str>,
    rx: mpsc::Receiver<Event>,
    _guard: UnsubscribeGuard,
}

impl EventSource {
    pub fn new(
        hub: Arc<EventHub>,
        topic: i64,
        client_id: Uuid,
        rx: mpsc::Receiver<Event>,
        resumed: bool,
    ) -> Self {
        Self {
            opening: Some(if resumed { "resumed" } else { "subscribed" }),
            rx,
            _guard: UnsubscribeGuard {
                hub,
                topic,
                client_id,
            },
        }
    }
}

impl Stream for EventSource {
    type Item = Result<sse::Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if let Some(name) = this.opening.take() {
            return Poll::Ready(Some(Ok(sse::Event::default().event(name))));
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                let frame = match serde_json::to_string(&event) {
                    Ok(json) => sse::Event::default().event("event").data(json),
                    Err(e) => {
                        warn!(error = %e, "failed to serialize event for delivery");
                        sse::Event::default().comment("dropped unserializable event")
                    }
                };
                Poll::Ready(Some(Ok(frame)))
            }
            // Channel closed: the hub shut down or the subscriber was
            // expired; end the response.
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Marks the subscriber offline when the SSE response is dropped.
struct UnsubscribeGuard {
    hub: Arc<EventHub>,
    topic: i64,
    client_id: Uuid,
}

impl Drop for UnsubscribeGuard {
    fn drop(&mut self) {
        let hub = Arc::clone(&self.hub);
        let topic = self.topic;
        let client_id = self.client_id;
        tokio::spawn(async move {
            hub.unsubscribe(topic, client_id).await;
        });
    }
}
