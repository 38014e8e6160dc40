//! In-memory twin of the persisted tables, for testing.
//!
//! Runs the exact same sequencing and projection code as the transactional
//! writer against plain vectors, so invariants and scenarios can be
//! exercised without a database. Not suitable for production: no
//! persistence, no concurrency control.

use std::collections::BTreeSet;

use stratus_core::event::FlatEvent;
use stratus_core::sequence::sequence_batch;

use crate::ingester::IngestSummary;
use crate::projector::{ProjectionPlan, project};
use crate::rows::{HistoricalObjectRow, MetadataRow, ObjectRow};

/// One event row with its delivery counters.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    /// The event.
    pub event: FlatEvent,
    /// Deliveries that matched this row's dedup key.
    pub number_duplicate_events: i32,
    /// Whether this event arrived behind an already-known later event.
    pub number_reordered: i32,
}

/// The in-memory table set.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    /// Event log.
    pub events: Vec<StoredEvent>,
    /// Current-state registry.
    pub objects: Vec<ObjectRow>,
    /// Closed records.
    pub historicals: Vec<HistoricalObjectRow>,
    /// Metadata rows.
    pub metadata: Vec<MetadataRow>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ingests a batch exactly as the transactional writer would.
    pub fn ingest(&mut self, incoming: Vec<FlatEvent>) -> IngestSummary {
        if incoming.is_empty() {
            return IngestSummary::default();
        }

        let keys: BTreeSet<(String, String)> = incoming
            .iter()
            .map(|event| (event.bucket.clone(), event.key.clone()))
            .collect();
        let touches = |bucket: &str, key: &str| {
            keys.contains(&(bucket.to_string(), key.to_string()))
        };

        let existing: Vec<FlatEvent> = self
            .events
            .iter()
            .filter(|stored| touches(&stored.event.bucket, &stored.event.key))
            .map(|stored| stored.event.clone())
            .collect();

        let sequenced = sequence_batch(incoming, &existing);
        let mut duplicates: u64 = sequenced.iter().map(|s| s.duplicates as u64).sum();
        let mut reordered = 0usize;
        let mut ingested = 0usize;

        for item in sequenced {
            if let Some(stored) = self
                .events
                .iter_mut()
                .find(|stored| stored.event.dedup_key() == item.event.dedup_key())
            {
                stored.number_duplicate_events += 1 + item.duplicates;
                duplicates += 1;
                continue;
            }
            if item.reordered {
                reordered += 1;
            }
            ingested += 1;
            self.events.push(StoredEvent {
                event: item.event,
                number_duplicate_events: item.duplicates,
                number_reordered: i32::from(item.reordered),
            });
        }

        let log: Vec<FlatEvent> = self
            .events
            .iter()
            .filter(|stored| touches(&stored.event.bucket, &stored.event.key))
            .map(|stored| stored.event.clone())
            .collect();
        let objects: Vec<ObjectRow> = self
            .objects
            .iter()
            .filter(|row| touches(&row.bucket, &row.key))
            .cloned()
            .collect();
        let historicals: Vec<HistoricalObjectRow> = self
            .historicals
            .iter()
            .filter(|row| touches(&row.bucket, &row.key))
            .cloned()
            .collect();

        let plan = project(&objects, &historicals, &log);
        self.apply(&plan);

        IngestSummary {
            ingested,
            duplicates,
            reordered,
            minted: plan.minted,
        }
    }

    fn apply(&mut self, plan: &ProjectionPlan) {
        for row in &plan.historical_inserts {
            let exists = self.historicals.iter().any(|h| {
                h.bucket == row.bucket
                    && h.key == row.key
                    && h.version_id == row.version_id
                    && h.deleted == row.deleted
            });
            if !exists {
                self.historicals.push(row.clone());
            }
        }

        for (source, target) in &plan.metadata_copies {
            let already = self
                .metadata
                .iter()
                .any(|m| m.historical_object_id == Some(target.as_uuid()));
            if already {
                continue;
            }
            if let Some(snapshot) = self
                .metadata
                .iter()
                .find(|m| m.object_id == Some(source.as_uuid()))
                .cloned()
            {
                self.metadata.push(MetadataRow {
                    s3_metadata_id: uuid::Uuid::new_v4(),
                    object_id: None,
                    historical_object_id: Some(target.as_uuid()),
                    is_current_state: false,
                    ..snapshot
                });
            }
        }

        for removal in &plan.object_removals {
            self.objects
                .retain(|row| row.object_id != removal.object_id.as_uuid());
            self.metadata
                .retain(|m| m.object_id != Some(removal.object_id.as_uuid()));
        }

        for row in &plan.object_updates {
            if let Some(existing) = self
                .objects
                .iter_mut()
                .find(|o| o.object_id == row.object_id)
            {
                *existing = row.clone();
            }
        }
        self.objects.extend(plan.object_inserts.iter().cloned());

        for id in &plan.historical_deletes {
            self.historicals
                .retain(|h| h.historical_object_id != id.as_uuid());
            self.metadata
                .retain(|m| m.historical_object_id != Some(id.as_uuid()));
        }

        for row in &plan.metadata {
            let slot = self.metadata.iter_mut().find(|m| {
                (row.object_id.is_some() && m.object_id == row.object_id)
                    || (row.historical_object_id.is_some()
                        && m.historical_object_id == row.historical_object_id)
            });
            match slot {
                Some(existing) => {
                    let id = existing.s3_metadata_id;
                    *existing = row.clone();
                    existing.s3_metadata_id = id;
                }
                None => self.metadata.push(row.clone()),
            }
        }

        for (object_id, is_current) in &plan.metadata_current_updates {
            if let Some(existing) = self
                .metadata
                .iter_mut()
                .find(|m| m.object_id == Some(object_id.as_uuid()))
            {
                existing.is_current_state = *is_current;
            }
        }
    }

    /// The current-state row for a key, if any.
    #[must_use]
    pub fn current_object(&self, bucket: &str, key: &str) -> Option<&ObjectRow> {
        self.objects
            .iter()
            .find(|row| row.bucket == bucket && row.key == key && row.is_current_state)
    }

    /// All object rows for a key, ordered by version.
    #[must_use]
    pub fn objects_for(&self, bucket: &str, key: &str) -> Vec<&ObjectRow> {
        let mut rows: Vec<&ObjectRow> = self
            .objects
            .iter()
            .filter(|row| row.bucket == bucket && row.key == key)
            .collect();
        rows.sort_by(|a, b| a.version_id.cmp(&b.version_id));
        rows
    }

    /// All closed records for a key.
    #[must_use]
    pub fn historicals_for(&self, bucket: &str, key: &str) -> Vec<&HistoricalObjectRow> {
        self.historicals
            .iter()
            .filter(|row| row.bucket == bucket && row.key == key)
            .collect()
    }

    /// The metadata row owned by an object.
    #[must_use]
    pub fn metadata_for_object(&self, object_id: uuid::Uuid) -> Option<&MetadataRow> {
        self.metadata
            .iter()
            .find(|m| m.object_id == Some(object_id))
    }

    /// Total duplicate deliveries recorded in the event log.
    #[must_use]
    pub fn total_duplicate_events(&self) -> i64 {
        self.events
            .iter()
            .map(|stored| i64::from(stored.number_duplicate_events))
            .sum()
    }

    /// Total reordered arrivals recorded in the event log.
    #[must_use]
    pub fn total_reordered(&self) -> i64 {
        self.events
            .iter()
            .map(|stored| i64::from(stored.number_reordered))
            .sum()
    }
}
