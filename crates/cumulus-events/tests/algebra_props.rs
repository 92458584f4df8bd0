use cumulus_events::{debounce_events, Event, EventType};

use proptest::prelude::*;

fn arb_event() -> impl Strategy<Value = Event> {
    let file_ids = prop_oneof![Just("1"), Just("2"), Just("3")];
    let paths = prop_oneof![Just("/a"), Just("/b"), Just("/c"), Just("/d")];
    let types = prop_oneof![
        Just(EventType::Create),
        Just(EventType::Modify),
        Just(EventType::Rename),
        Just(EventType::Delete),
    ];

    (types, file_ids, paths.clone(), paths).prop_map(|(event_type, file_id, from, to)| {
        match event_type {
            EventType::Rename => Event::rename(file_id, from, to),
            EventType::Create => Event::create(file_id, from),
            EventType::Modify => Event::modify(file_id, from),
            EventType::Delete => Event::delete(file_id, from),
        }
    })
}

proptest! {
    /// Feeding the output back in returns it unchanged.
    #[test]
    fn normalization_is_idempotent(events in proptest::collection::vec(arb_event(), 0..24)) {
        let once = debounce_events(&events);
        let twice = debounce_events(&once);
        prop_assert_eq!(once, twice);
    }

    /// The output never contains two events for the same file.
    #[test]
    fn at_most_one_event_per_file(events in proptest::collection::vec(arb_event(), 0..24)) {
        let out = debounce_events(&events);
        let mut seen = std::collections::HashSet::new();
        for event in &out {
            prop_assert!(seen.insert(event.file_id.clone()), "duplicate file in output");
        }
    }

    /// Output order follows first appearance in the input.
    #[test]
    fn output_order_follows_input(events in proptest::collection::vec(arb_event(), 0..24)) {
        let out = debounce_events(&events);
        let mut first_seen = Vec::new();
        for event in &events {
            if !first_seen.contains(&event.file_id) {
                first_seen.push(event.file_id.clone());
            }
        }
        let positions: Vec<usize> = out
            .iter()
            .map(|e| first_seen.iter().position(|id| id == &e.file_id).unwrap())
            .collect();
        let mut sorted = positions.clone();
        sorted.sort_unstable();
        prop_assert_eq!(positions, sorted);
    }

    /// A file whose history starts with Create and ends with Delete vanishes
    /// when nothing else interleaves for that file.
    #[test]
    fn ephemeral_files_produce_no_output(path in prop_oneof![Just("/a"), Just("/b")]) {
        let events = vec![
            Event::create("9", path),
            Event::modify("9", path),
            Event::delete("9", path),
        ];
        prop_assert!(debounce_events(&events).is_empty());
    }
}
