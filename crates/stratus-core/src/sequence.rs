//! In-batch deduplication and reorder detection.
//!
//! The persistent half of deduplication is the event log's unique index;
//! this module handles the half that must happen before the round-trip:
//! collapsing duplicate deliveries inside one batch and flagging events
//! that arrive behind an already-known later event of their version.

use std::collections::HashMap;

use crate::event::FlatEvent;

/// One batch event after in-batch sequencing.
#[derive(Debug, Clone)]
pub struct SequencedEvent {
    /// The surviving event.
    pub event: FlatEvent,
    /// Duplicate deliveries collapsed into this event within the batch.
    pub duplicates: i32,
    /// Whether a later event of the same `(bucket, key, version_id)` was
    /// already known when this one arrived.
    pub reordered: bool,
}

/// Collapses duplicate deliveries and flags out-of-order arrivals.
///
/// `known` is the set of already-persisted events for the batch's keys.
/// Arrival order within the batch is the vector order. The first delivery
/// of each dedup key survives; later identical deliveries only bump its
/// duplicate count.
#[must_use]
pub fn sequence_batch(incoming: Vec<FlatEvent>, known: &[FlatEvent]) -> Vec<SequencedEvent> {
    let mut surviving: Vec<SequencedEvent> = Vec::with_capacity(incoming.len());
    let mut index_of: HashMap<(String, String, String, Option<String>, crate::EventType), usize> =
        HashMap::new();

    for event in incoming {
        if let Some(&index) = index_of.get(&event.dedup_key()) {
            surviving[index].duplicates += 1;
            continue;
        }

        // Reordering is a statement about sequencers: unsequenced records
        // are never out of order, and only a strictly greater sequencer on
        // the same version counts as already-known-later.
        let later_known = event.sequencer.as_ref().is_some_and(|sequencer| {
            known
                .iter()
                .chain(surviving.iter().map(|s| &s.event))
                .filter(|other| {
                    other.bucket == event.bucket
                        && other.key == event.key
                        && other.version_id == event.version_id
                })
                .any(|other| other.sequencer.as_deref() > Some(sequencer.as_str()))
        });

        index_of.insert(event.dedup_key(), surviving.len());
        surviving.push(SequencedEvent {
            event,
            duplicates: 0,
            reordered: later_known,
        });
    }

    surviving
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventType;

    fn event(version: &str, sequencer: Option<&str>) -> FlatEvent {
        FlatEvent::new(EventType::Created)
            .with_bucket("bucket")
            .with_key("key")
            .with_version_id(version)
            .with_sequencer(sequencer.map(ToString::to_string))
    }

    #[test]
    fn duplicates_collapse_and_count() {
        let a = event("v1", Some("1"));
        let duplicate = a.clone();
        let sequenced = sequence_batch(vec![a, duplicate], &[]);
        assert_eq!(sequenced.len(), 1);
        assert_eq!(sequenced[0].duplicates, 1);
    }

    #[test]
    fn different_event_types_are_not_duplicates() {
        let created = event("v1", Some("1"));
        let deleted = FlatEvent::new(EventType::Deleted)
            .with_bucket("bucket")
            .with_key("key")
            .with_version_id("v1")
            .with_sequencer(Some("1".to_string()));
        let sequenced = sequence_batch(vec![created, deleted], &[]);
        assert_eq!(sequenced.len(), 2);
    }

    #[test]
    fn older_arrival_is_flagged_reordered() {
        let newer = event("v1", Some("B"));
        let older = event("v1", Some("A"));
        let sequenced = sequence_batch(vec![newer, older], &[]);
        assert!(!sequenced[0].reordered);
        assert!(sequenced[1].reordered);
    }

    #[test]
    fn reorder_detection_includes_persisted_events() {
        let known = vec![event("v1", Some("B"))];
        let sequenced = sequence_batch(vec![event("v1", Some("A"))], &known);
        assert!(sequenced[0].reordered);
    }

    #[test]
    fn other_versions_do_not_cause_reorder_flags() {
        let known = vec![event("v2", Some("B"))];
        let sequenced = sequence_batch(vec![event("v1", Some("A"))], &known);
        assert!(!sequenced[0].reordered);
    }
}
