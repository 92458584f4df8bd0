//! Filesystem change-notification pipeline.
//!
//! Storage mutations are fanned out to per-folder topics on an [`EventHub`].
//! Each subscriber buffers incoming events, collapses them through the pure
//! rewrite rules in [`event::debounce_events`] after a short debounce window,
//! and either delivers them on its live channel or persists them through an
//! [`store::EventStore`] until the client reconnects.

pub mod emitter;
pub mod event;
pub mod hub;
pub mod store;
pub mod subscriber;

mod error;

pub use error::EventHubError;
pub use event::{debounce_events, Event, EventType};
pub use hub::{EventHub, EventHubOptions};
pub use subscriber::Subscriber;
