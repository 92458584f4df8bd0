//! Change events and the per-file merge rules applied before delivery.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Create,
    Modify,
    Rename,
    Delete,
}

/// A single filesystem change, as delivered to clients.
///
/// `file_id` is an opaque identifier that is stable across renames. `from` is
/// the path at emission time relative to the subscribed folder; `to` is only
/// meaningful for [`EventType::Rename`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub file_id: String,
    #[serde(default)]
    pub from: String,
    #[serde(default)]
    pub to: String,
}

impl Event {
    pub fn create(file_id: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Create,
            file_id: file_id.into(),
            from: from.into(),
            to: String::new(),
        }
    }

    pub fn modify(file_id: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Modify,
            file_id: file_id.into(),
            from: from.into(),
            to: String::new(),
        }
    }

    pub fn rename(
        file_id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        Self {
            event_type: EventType::Rename,
            file_id: file_id.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn delete(file_id: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            event_type: EventType::Delete,
            file_id: file_id.into(),
            from: from.into(),
            to: String::new(),
        }
    }
}

/// Accumulated state for one file while merging.
struct EventState {
    base_type: EventType,
    original_src: String,
    current_dst: String,
}

/// Collapse a time-ordered event sequence into its minimal equivalent.
///
/// Merge rules, applied per `file_id`:
/// - `Modify + Modify` keeps only the last `Modify`;
/// - `Create + Modify` folds into the `Create`;
/// - `Create + Rename(a->b)` becomes a `Create` at `b`;
/// - `Create + Delete` drops both (the object never needs to reach clients);
/// - `Modify + Delete` keeps only the `Delete`;
/// - `Rename(a->b) + Rename(b->c)` becomes `Rename(a->c)`, and a rename
///   there-and-back (`c == a`) drops out entirely;
/// - `Rename + Modify` folds into the rename;
/// - `Rename + Delete` keeps only the `Delete`;
/// - `Delete + Create` keeps the `Create` (restore from trash).
///
/// Output preserves the order in which each file first appeared. The function
/// is a fixed point: feeding its output back in returns it unchanged.
pub fn debounce_events(events: &[Event]) -> Vec<Event> {
    if events.is_empty() {
        return Vec::new();
    }

    let mut states: HashMap<&str, EventState> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();

    for e in events {
        let file_id = e.file_id.as_str();

        if !states.contains_key(file_id) {
            order.push(file_id);
            states.insert(
                file_id,
                EventState {
                    base_type: e.event_type,
                    original_src: e.from.clone(),
                    current_dst: e.to.clone(),
                },
            );
            continue;
        }

        let drop_entry = {
            let state = states.get_mut(file_id).expect("state present");
            apply(state, e)
        };

        if drop_entry {
            states.remove(file_id);
            order.retain(|id| *id != file_id);
        }
    }

    order
        .iter()
        .filter_map(|id| states.get(id).map(|state| to_event(id, state)))
        .collect()
}

/// Merge one incoming event into the accumulator. Returns true when the
/// entry cancels out and must be dropped.
fn apply(state: &mut EventState, e: &Event) -> bool {
    match e.event_type {
        EventType::Create => {
            // Delete + Create: restore from trash, keep as Create.
            if state.base_type == EventType::Delete {
                state.base_type = EventType::Create;
                state.original_src = e.from.clone();
                state.current_dst.clear();
            }
        }

        // Modify is absorbed by every base type: Create already implies
        // content, a later Modify supersedes an earlier one, and a Rename
        // carries the latest content. Modify after Delete should not happen
        // and is ignored.
        EventType::Modify => {}

        EventType::Rename => match state.base_type {
            EventType::Create => {
                // Create + Rename(a->b): a Create at b.
                state.original_src = e.to.clone();
                state.current_dst.clear();
            }
            EventType::Modify => {
                state.base_type = EventType::Rename;
                state.original_src = e.from.clone();
                state.current_dst = e.to.clone();
            }
            EventType::Rename => {
                if state.original_src == e.to {
                    // Rename there-and-back is a no-op.
                    return true;
                }
                state.current_dst = e.to.clone();
            }
            // Rename after Delete should not happen; ignore.
            EventType::Delete => {}
        },

        EventType::Delete => match state.base_type {
            EventType::Create => {
                // Ephemeral object, never surfaced.
                return true;
            }
            EventType::Modify | EventType::Rename => {
                state.base_type = EventType::Delete;
                state.original_src = e.from.clone();
                state.current_dst.clear();
            }
            // Duplicate Delete collapses silently.
            EventType::Delete => {}
        },
    }

    false
}

fn to_event(file_id: &str, state: &EventState) -> Event {
    match state.base_type {
        EventType::Create => Event::create(file_id, state.original_src.clone()),
        EventType::Modify => Event::modify(file_id, state.original_src.clone()),
        EventType::Rename => Event::rename(
            file_id,
            state.original_src.clone(),
            state.current_dst.clone(),
        ),
        EventType::Delete => Event::delete(file_id, state.original_src.clone()),
    }
}
