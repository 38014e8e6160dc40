//! Pure state projection over the event log.
//!
//! Everything the writer persists beyond the raw event log is derived here,
//! deterministically, from the key-restricted log plus the rows already in
//! the database. The ingest writer, the in-memory twin used by tests, and
//! replay all share this code, which is what makes ingestion idempotent and
//! arrival-order insensitive.
//!
//! Two orderings are in play and they are intentionally different:
//!
//! - *Within* one `(bucket, key, version_id)`, events order by sequencer
//!   with a missing sequencer last (latest-known); see
//!   [`stratus_core::event::EventOrder`].
//! - *Across* versions of one key, candidates rank by their greatest
//!   non-null sequencer, so a version known only through unsequenced crawl
//!   records never outranks one the store has sequenced.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use stratus_core::event::{EventType, FlatEvent};
use stratus_core::id::{HistoricalObjectId, LineageId, ObjectId};

use crate::rows::{HistoricalObjectRow, MetadataRow, ObjectRow};

/// Lifecycle state of one `(bucket, key, version_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    /// No record of this version yet.
    Absent,
    /// The version exists and its bytes are directly fetchable.
    Live,
    /// The version is a delete marker.
    DeleteMarker,
    /// The version exists in an archive tier.
    Archived,
    /// The version exists in an archive tier with a completed restore.
    Restored,
    /// The version was permanently removed. Terminal.
    Gone,
}

impl VersionState {
    /// Whether the version currently exists as real bytes in the store.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Live | Self::Archived | Self::Restored)
    }
}

/// Applies one event to a version's state.
///
/// `Gone` is terminal: a permanent delete wins over anything that arrives
/// later in sequencer order, including restores. Events that only describe
/// an existing version (restores, storage-class changes, tagging) never
/// conjure a version out of `Absent` - only created-like events and delete
/// markers do.
#[must_use]
pub fn transition(state: VersionState, event: &FlatEvent) -> VersionState {
    use VersionState::{Absent, Archived, DeleteMarker, Gone, Live, Restored};

    if state == Gone {
        return Gone;
    }

    match event.event_type {
        EventType::Created | EventType::Crawl => {
            if event.is_delete_marker {
                DeleteMarker
            } else if event.storage_class.is_some_and(|class| class.is_archive()) {
                if event.restored { Restored } else { Archived }
            } else {
                Live
            }
        }
        EventType::CrawlRestored => Restored,
        EventType::Deleted => {
            if event.is_delete_marker {
                DeleteMarker
            } else {
                Gone
            }
        }
        EventType::DeletedLifecycle => Gone,
        EventType::Restored => match state {
            Absent => Absent,
            DeleteMarker => DeleteMarker,
            _ => Restored,
        },
        EventType::RestoreExpired => match state {
            Absent => Absent,
            DeleteMarker => DeleteMarker,
            _ => Archived,
        },
        EventType::StorageClassChanged => match state {
            Absent => Absent,
            DeleteMarker => DeleteMarker,
            previous => {
                if event.storage_class.is_some_and(|class| class.is_archive()) {
                    if previous == Restored { Restored } else { Archived }
                } else {
                    Live
                }
            }
        },
        EventType::TaggingCreated | EventType::TaggingDeleted => state,
    }
}

/// Cross-version rank of a candidate for current state.
///
/// Ordered by greatest non-null sequencer (`None` ranks below every present
/// sequencer), then timestamp, then a stable identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CandidateRank {
    sequencer: Option<String>,
    time: Option<DateTime<Utc>>,
    id: Uuid,
}

/// Everything the projection needs to know about one version of a key.
#[derive(Debug, Clone)]
pub struct VersionSummary {
    /// Lifecycle state after folding all events.
    pub state: VersionState,
    /// Cross-version rank.
    pub rank: CandidateRank,
    /// Type of the latest event (missing sequencers last).
    pub last_event_type: EventType,
    /// Whether the latest event is a delete marker.
    pub head_is_delete_marker: bool,
    /// First known creation time.
    pub created: Option<DateTime<Utc>>,
    /// Greatest non-null sequencer observed.
    pub ordering: Option<String>,
    /// Lineage adopted from the store side, if any event carried one.
    pub adopted_lineage: Option<LineageId>,
    /// Tag set from the most recent event carrying one, used when writing
    /// the lineage tag back without clobbering other tags.
    pub tags: Option<HashMap<String, String>>,
    /// Folded metadata snapshot.
    pub meta: MetaFold,
}

/// Folded enrichment fields for one version.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetaFold {
    /// Storage class from the latest event carrying one.
    pub storage_class: Option<stratus_core::StorageClass>,
    /// Last-modified from the latest event carrying one.
    pub last_modified_date: Option<DateTime<Utc>>,
    /// eTag from the latest event carrying one.
    pub e_tag: Option<String>,
    /// Expiration rule text.
    pub expiration: Option<String>,
    /// Whether a restore is currently completed.
    pub restored: bool,
    /// Archive tier from the latest enriched event.
    pub archive_status: Option<stratus_core::ArchiveStatus>,
    /// User metadata from the latest event carrying some.
    pub metadata: Option<HashMap<String, String>>,
    /// Tags from the latest event carrying some.
    pub tags: Option<HashMap<String, String>>,
}

impl MetaFold {
    fn apply(&mut self, event: &FlatEvent) {
        if let Some(class) = event.storage_class {
            self.storage_class = Some(class);
        }
        if let Some(modified) = event.last_modified_date {
            self.last_modified_date = Some(modified);
        }
        if let Some(e_tag) = &event.e_tag {
            self.e_tag = Some(e_tag.clone());
        }
        if let Some(expiration) = &event.expiration {
            self.expiration = Some(expiration.clone());
        }
        match event.event_type {
            EventType::Restored | EventType::CrawlRestored => self.restored = true,
            EventType::RestoreExpired => self.restored = false,
            _ if event.event_type.wants_enrichment() => self.restored = event.restored,
            _ => {}
        }
        if event.event_type.wants_enrichment() {
            // Enriched events are an authoritative snapshot of the archive
            // tier; a missing status means the object is not archived.
            self.archive_status = event.archive_status;
        }
        if let Some(metadata) = &event.metadata {
            self.metadata = Some(metadata.clone());
        }
        if let Some(tags) = &event.tags {
            self.tags = Some(tags.clone());
        }
    }
}

/// Folds one version's events (any order) into a summary.
///
/// `seed` carries the already-known object row for this version, if any,
/// so that versions whose earlier events have been pruned still resolve.
#[must_use]
pub fn fold_version(seed: Option<&ObjectRow>, events: &[&FlatEvent]) -> VersionSummary {
    let mut ordered: Vec<&FlatEvent> = events.to_vec();
    ordered.sort_by(|a, b| a.order().cmp(&b.order()));

    let mut state = if seed.is_some() {
        VersionState::Live
    } else {
        VersionState::Absent
    };
    let mut meta = MetaFold::default();
    let mut created = seed.and_then(|row| row.created);
    let mut ordering = seed.and_then(|row| row.ordering.clone());
    let mut adopted_lineage = None;
    let mut tags = None;
    let mut rank = CandidateRank {
        sequencer: seed.and_then(|row| row.ordering.clone()),
        time: seed.and_then(|row| row.created),
        id: seed.map_or_else(Uuid::nil, |row| row.object_id),
    };

    for event in &ordered {
        state = transition(state, event);
        meta.apply(event);

        if event.event_type.is_created_like() {
            created = match (created, event.event_time) {
                (Some(existing), Some(time)) => Some(existing.min(time)),
                (None, time) => time,
                (existing, None) => existing,
            };
        }
        if let Some(sequencer) = &event.sequencer {
            if ordering.as_deref() < Some(sequencer.as_str()) {
                ordering = Some(sequencer.clone());
                rank = CandidateRank {
                    sequencer: Some(sequencer.clone()),
                    time: event.event_time,
                    id: event.event_id.as_uuid(),
                };
            }
        } else if rank.sequencer.is_none() {
            rank = CandidateRank {
                sequencer: None,
                time: event.event_time.max(rank.time),
                id: event.event_id.as_uuid(),
            };
        }
        if let Some(lineage) = event.lineage_id {
            adopted_lineage = Some(lineage);
        }
        if let Some(event_tags) = &event.tags {
            tags = Some(event_tags.clone());
        }
    }

    let head = ordered.last();
    VersionSummary {
        state,
        rank,
        last_event_type: head.map_or(EventType::Created, |event| event.event_type),
        head_is_delete_marker: head.is_some_and(|event| event.is_delete_marker),
        created,
        ordering,
        adopted_lineage,
        tags,
        meta,
    }
}

/// Picks the current version among candidates, if any.
///
/// The winner is the candidate with the greatest rank among versions that
/// are present or delete markers; a winning delete marker disqualifies the
/// whole key.
#[must_use]
pub fn resolve_current<'a>(
    summaries: impl Iterator<Item = (&'a str, &'a VersionSummary)>,
) -> Option<&'a str> {
    let winner = summaries
        .filter(|(_, summary)| {
            summary.state.is_present() || summary.state == VersionState::DeleteMarker
        })
        .max_by(|(_, a), (_, b)| a.rank.cmp(&b.rank))?;

    if winner.1.state == VersionState::DeleteMarker {
        None
    } else {
        Some(winner.0)
    }
}

/// A lineage identifier minted during projection, to be written back to the
/// store as an object tag after the transaction commits.
#[derive(Debug, Clone, PartialEq)]
pub struct MintedLineage {
    /// The object row the lineage was assigned to.
    pub object_id: ObjectId,
    /// The freshly minted identifier.
    pub lineage_id: LineageId,
    /// Bucket of the tagged object.
    pub bucket: String,
    /// Key of the tagged object.
    pub key: String,
    /// Version of the tagged object.
    pub version_id: String,
    /// Tags already present on the object, to be preserved on write-back.
    pub existing_tags: Option<HashMap<String, String>>,
}

/// An object deletion, with the historical row that inherits its checksums
/// and attribute links.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectRemoval {
    /// The row to delete.
    pub object_id: ObjectId,
    /// Where its annotations move, when a closed record exists.
    pub transfer_to: Option<HistoricalObjectId>,
}

/// Row mutations derived from one projection pass.
#[derive(Debug, Clone, Default)]
pub struct ProjectionPlan {
    /// New object rows.
    pub object_inserts: Vec<ObjectRow>,
    /// Changed object rows (full-row update by primary key).
    pub object_updates: Vec<ObjectRow>,
    /// Removed object rows with their annotation transfer targets.
    pub object_removals: Vec<ObjectRemoval>,
    /// New closed records.
    pub historical_inserts: Vec<HistoricalObjectRow>,
    /// Closed records superseded by a revised replay.
    pub historical_deletes: Vec<HistoricalObjectId>,
    /// Desired metadata rows, recomputed from the log (owners whose
    /// versions have events in the retained log).
    pub metadata: Vec<MetadataRow>,
    /// Current-state flag fixes for metadata of objects whose events have
    /// been pruned; the rest of their metadata stands.
    pub metadata_current_updates: Vec<(ObjectId, bool)>,
    /// Metadata copies from a demoted object to the closed record that
    /// inherits its snapshot, for versions whose events have been pruned.
    pub metadata_copies: Vec<(ObjectId, HistoricalObjectId)>,
    /// Lineages minted in this pass.
    pub minted: Vec<MintedLineage>,
}

impl ProjectionPlan {
    /// Whether the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.object_inserts.is_empty()
            && self.object_updates.is_empty()
            && self.object_removals.is_empty()
            && self.historical_inserts.is_empty()
            && self.historical_deletes.is_empty()
            && self.metadata.is_empty()
            && self.metadata_current_updates.is_empty()
            && self.metadata_copies.is_empty()
            && self.minted.is_empty()
    }
}

/// Computes the mutations that bring the projection in line with the event
/// log for every `(bucket, key)` present in `events`.
///
/// `objects` and `historicals` are the rows already persisted for those
/// keys. Keys not named by any event are left untouched.
#[must_use]
pub fn project(
    objects: &[ObjectRow],
    historicals: &[HistoricalObjectRow],
    events: &[FlatEvent],
) -> ProjectionPlan {
    let mut by_key: BTreeMap<(String, String), Vec<&FlatEvent>> = BTreeMap::new();
    for event in events {
        by_key
            .entry((event.bucket.clone(), event.key.clone()))
            .or_default()
            .push(event);
    }

    let mut plan = ProjectionPlan::default();
    for ((bucket, key), key_events) in by_key {
        let key_objects: Vec<&ObjectRow> = objects
            .iter()
            .filter(|row| row.bucket == bucket && row.key == key)
            .collect();
        let key_historicals: Vec<&HistoricalObjectRow> = historicals
            .iter()
            .filter(|row| row.bucket == bucket && row.key == key)
            .collect();
        project_key(
            &bucket,
            &key,
            &key_objects,
            &key_historicals,
            &key_events,
            &mut plan,
        );
    }
    plan
}

#[allow(clippy::too_many_lines)]
fn project_key(
    bucket: &str,
    key: &str,
    objects: &[&ObjectRow],
    historicals: &[&HistoricalObjectRow],
    events: &[&FlatEvent],
    plan: &mut ProjectionPlan,
) {
    let existing_by_version: HashMap<&str, &ObjectRow> = objects
        .iter()
        .map(|row| (row.version_id.as_str(), *row))
        .collect();

    let mut events_by_version: BTreeMap<&str, Vec<&FlatEvent>> = BTreeMap::new();
    for event in events {
        events_by_version
            .entry(event.version_id.as_str())
            .or_default()
            .push(event);
    }

    // Replay the key's full timeline to reconstruct every closed tenure.
    // The timeline interleaves versions in candidate-rank order: unsequenced
    // records replay before the sequenced events that supersede them.
    let mut timeline: Vec<&FlatEvent> = events.to_vec();
    timeline.sort_by(|a, b| {
        (a.sequencer.as_deref(), a.event_time, a.event_id)
            .cmp(&(b.sequencer.as_deref(), b.event_time, b.event_id))
    });

    let mut arrived: BTreeMap<&str, Vec<&FlatEvent>> = BTreeMap::new();
    let mut summaries: BTreeMap<&str, VersionSummary> = BTreeMap::new();

    // Versions known only from rows (their events were pruned) are present
    // from the start of the replay.
    for (&version, &row) in &existing_by_version {
        if !events_by_version.contains_key(version) {
            summaries.insert(version, fold_version(Some(row), &[]));
        }
    }

    let lineage_of = |version: &str, summary: &VersionSummary| -> Option<Uuid> {
        existing_by_version
            .get(version)
            .and_then(|row| row.lineage_id)
            .or(summary.adopted_lineage.map(|lineage| lineage.as_uuid()))
    };

    let mut current: Option<String> =
        resolve_current(summaries.iter().map(|(v, s)| (*v, s))).map(ToString::to_string);
    let mut desired_historicals: Vec<(HistoricalObjectRow, MetaFold, EventType)> = Vec::new();

    for event in timeline.iter().copied() {
        let version = event.version_id.as_str();
        arrived.entry(version).or_default().push(event);
        let seed = existing_by_version.get(version).copied();
        let summary = fold_version(seed, arrived.get(version).map_or(&[], Vec::as_slice));
        summaries.insert(version, summary);

        let new_current =
            resolve_current(summaries.iter().map(|(v, s)| (*v, s))).map(ToString::to_string);
        if new_current != current {
            if let Some(closed) = current.take() {
                if let Some(summary) = summaries.get(closed.as_str()) {
                    push_tenure_close(
                        &mut desired_historicals,
                        bucket,
                        key,
                        &closed,
                        summary,
                        lineage_of(&closed, summary),
                        event.event_time,
                    );
                }
            }
            current = new_current;
        }
    }

    // A version that ends up permanently removed closes its record even if
    // it never held current state.
    for (&version, summary) in &summaries {
        let removed = summary.state == VersionState::Gone
            || (summary.state == VersionState::DeleteMarker
                && existing_by_version.contains_key(version));
        if !removed {
            continue;
        }
        let had_row = existing_by_version.contains_key(version);
        let had_creation = arrived
            .get(version)
            .is_some_and(|events| events.iter().any(|e| e.event_type.is_created_like()));
        if !had_row && !had_creation {
            continue;
        }
        let gone_at = arrived.get(version).and_then(|events| {
            events
                .iter()
                .filter(|e| {
                    matches!(
                        e.event_type,
                        EventType::Deleted | EventType::DeletedLifecycle
                    )
                })
                .filter_map(|e| e.event_time)
                .max()
        });
        push_tenure_close(
            &mut desired_historicals,
            bucket,
            key,
            version,
            summary,
            lineage_of(version, summary),
            gone_at,
        );
    }

    // Diff closed records against what is already persisted. Records whose
    // close predates the retained log are left alone: their events may have
    // been pruned.
    let min_time = events.iter().filter_map(|e| e.event_time).min();
    let mut surviving_historicals: Vec<HistoricalObjectRow> = Vec::new();
    for existing in historicals {
        let matched = desired_historicals.iter().position(|(row, _, _)| {
            row.version_id == existing.version_id && row.deleted == existing.deleted
        });
        match matched {
            Some(index) => {
                // Keep the persisted identity for an unchanged tenure.
                desired_historicals.remove(index);
                surviving_historicals.push((*existing).clone());
            }
            None => {
                let out_of_scope = !events_by_version.contains_key(existing.version_id.as_str())
                    || existing
                        .deleted
                        .zip(min_time)
                        .is_some_and(|(deleted, min)| deleted < min);
                if out_of_scope {
                    surviving_historicals.push((*existing).clone());
                } else {
                    plan.historical_deletes.push(existing.id());
                }
            }
        }
    }
    for (row, fold, last_type) in desired_historicals {
        if events_by_version.contains_key(row.version_id.as_str()) {
            plan.metadata.push(metadata_for_historical(
                row.historical_object_id,
                &fold,
                last_type,
            ));
        } else if let Some(source) = existing_by_version.get(row.version_id.as_str()) {
            // The snapshot for a pruned-log version comes from the demoted
            // object's persisted metadata.
            plan.metadata_copies.push((
                ObjectId::from_uuid(source.object_id),
                HistoricalObjectId::from_uuid(row.historical_object_id),
            ));
        }
        surviving_historicals.push(row.clone());
        plan.historical_inserts.push(row);
    }

    // Desired object rows: every version that still exists in the store.
    let current_version = current;
    for (&version, summary) in &summaries {
        let existing = existing_by_version.get(version).copied();
        let has_events = events_by_version.contains_key(version);
        let removed = summary.state == VersionState::Gone
            || (summary.state == VersionState::DeleteMarker && existing.is_some());

        if removed {
            if let Some(row) = existing {
                let transfer_to = surviving_historicals
                    .iter()
                    .filter(|h| h.version_id == version)
                    .max_by_key(|h| h.deleted)
                    .map(HistoricalObjectRow::id);
                plan.object_removals.push(ObjectRemoval {
                    object_id: row.id(),
                    transfer_to,
                });
            }
            continue;
        }

        let spawns_row = existing.is_some()
            || arrived
                .get(version)
                .is_some_and(|events| events.iter().any(|e| e.event_type.is_created_like()));
        if !spawns_row || !summary.state.is_present() {
            continue;
        }

        let is_current = current_version.as_deref() == Some(version);
        let (lineage_id, lineage_tag_applied, minted) = resolve_lineage(existing, summary);

        let object_id = existing.map_or_else(Uuid::new_v4, |row| row.object_id);
        let desired = ObjectRow {
            object_id,
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: version.to_string(),
            created: summary.created,
            ordering: summary.ordering.clone(),
            lineage_id: lineage_id.map(|lineage| lineage.as_uuid()),
            lineage_tag_applied,
            is_current_state: is_current,
        };

        if let Some(lineage) = minted {
            plan.minted.push(MintedLineage {
                object_id: ObjectId::from_uuid(object_id),
                lineage_id: lineage,
                bucket: bucket.to_string(),
                key: key.to_string(),
                version_id: version.to_string(),
                existing_tags: summary.tags.clone(),
            });
        }

        if has_events {
            plan.metadata.push(metadata_for_object(&desired, summary));
        } else if existing.is_some_and(|row| row.is_current_state != is_current) {
            plan.metadata_current_updates
                .push((ObjectId::from_uuid(object_id), is_current));
        }

        match existing {
            Some(row) if *row == desired => {}
            Some(_) => plan.object_updates.push(desired),
            None => plan.object_inserts.push(desired),
        }
    }
}

fn resolve_lineage(
    existing: Option<&ObjectRow>,
    summary: &VersionSummary,
) -> (Option<LineageId>, bool, Option<LineageId>) {
    // An already-assigned lineage is never rewritten.
    if let Some(row) = existing {
        if let Some(lineage) = row.lineage() {
            return (Some(lineage), row.lineage_tag_applied, None);
        }
    }
    // A tag found on the store side is adopted verbatim.
    if let Some(adopted) = summary.adopted_lineage {
        return (Some(adopted), true, None);
    }
    // A fresh object with no tag gets a newly minted lineage; the tag
    // write-back happens after commit.
    let minted = LineageId::generate();
    (Some(minted), false, Some(minted))
}

#[allow(clippy::too_many_arguments)]
fn push_tenure_close(
    desired: &mut Vec<(HistoricalObjectRow, MetaFold, EventType)>,
    bucket: &str,
    key: &str,
    version: &str,
    summary: &VersionSummary,
    lineage_id: Option<Uuid>,
    deleted: Option<DateTime<Utc>>,
) {
    let duplicate = desired
        .iter()
        .any(|(row, _, _)| row.version_id == version && row.deleted == deleted);
    if duplicate {
        return;
    }
    desired.push((
        HistoricalObjectRow {
            historical_object_id: Uuid::new_v4(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            version_id: version.to_string(),
            created: summary.created,
            deleted,
            ordering: summary.ordering.clone(),
            lineage_id,
        },
        summary.meta.clone(),
        summary.last_event_type,
    ));
}

fn metadata_for_object(row: &ObjectRow, summary: &VersionSummary) -> MetadataRow {
    MetadataRow {
        s3_metadata_id: Uuid::new_v4(),
        object_id: Some(row.object_id),
        historical_object_id: None,
        storage_class: summary.meta.storage_class,
        last_modified_date: summary.meta.last_modified_date,
        e_tag: summary.meta.e_tag.clone(),
        is_delete_marker: summary.head_is_delete_marker,
        expiration: summary.meta.expiration.clone(),
        restored: summary.meta.restored,
        archive_status: summary.meta.archive_status,
        metadata: summary.meta.metadata.clone(),
        tags: summary.meta.tags.clone(),
        last_event_type: summary.last_event_type,
        is_current_state: row.is_current_state,
    }
}

fn metadata_for_historical(
    historical_object_id: Uuid,
    fold: &MetaFold,
    last_event_type: EventType,
) -> MetadataRow {
    MetadataRow {
        s3_metadata_id: Uuid::new_v4(),
        object_id: None,
        historical_object_id: Some(historical_object_id),
        storage_class: fold.storage_class,
        last_modified_date: fold.last_modified_date,
        e_tag: fold.e_tag.clone(),
        is_delete_marker: false,
        expiration: fold.expiration.clone(),
        restored: fold.restored,
        archive_status: fold.archive_status,
        metadata: fold.metadata.clone(),
        tags: fold.tags.clone(),
        last_event_type,
        is_current_state: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::StorageClass;

    fn at(millis: i64) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(millis)
    }

    fn created(bucket: &str, key: &str, version: &str, sequencer: &str) -> FlatEvent {
        FlatEvent::new(EventType::Created)
            .with_bucket(bucket)
            .with_key(key)
            .with_version_id(version)
            .with_sequencer(Some(sequencer.to_string()))
            .with_event_time(at(1_000))
    }

    fn deleted(bucket: &str, key: &str, version: &str, sequencer: &str) -> FlatEvent {
        FlatEvent::new(EventType::Deleted)
            .with_bucket(bucket)
            .with_key(key)
            .with_version_id(version)
            .with_sequencer(Some(sequencer.to_string()))
            .with_event_time(at(2_000))
    }

    #[test]
    fn gone_is_terminal() {
        let delete = deleted("b", "k", "v1", "2");
        let restore = FlatEvent::new(EventType::Restored)
            .with_bucket("b")
            .with_key("k")
            .with_version_id("v1")
            .with_sequencer(Some("3".to_string()));

        let state = transition(VersionState::Live, &delete);
        assert_eq!(state, VersionState::Gone);
        assert_eq!(transition(state, &restore), VersionState::Gone);
    }

    #[test]
    fn restore_does_not_conjure_versions() {
        let restore = FlatEvent::new(EventType::Restored)
            .with_bucket("b")
            .with_key("k")
            .with_version_id("v1");
        assert_eq!(
            transition(VersionState::Absent, &restore),
            VersionState::Absent
        );
    }

    #[test]
    fn archive_storage_class_creates_archived_state() {
        let event =
            created("b", "k", "v1", "1").with_storage_class(Some(StorageClass::DeepArchive));
        assert_eq!(
            transition(VersionState::Absent, &event),
            VersionState::Archived
        );
    }

    #[test]
    fn fold_orders_by_sequencer_not_arrival() {
        let first = created("b", "k", "v1", "1");
        let second = deleted("b", "k", "v1", "2");
        // Delivered out of order.
        let summary = fold_version(None, &[&second, &first]);
        assert_eq!(summary.state, VersionState::Gone);
        assert_eq!(summary.ordering.as_deref(), Some("2"));
    }

    #[test]
    fn null_sequencer_is_latest_within_a_version() {
        let real = created("b", "k", "v1", "5").with_storage_class(Some(StorageClass::Standard));
        let crawl = FlatEvent::new(EventType::CrawlRestored)
            .with_bucket("b")
            .with_key("k")
            .with_version_id("v1")
            .with_sequencer(None)
            .with_event_time(at(9_000));

        let summary = fold_version(None, &[&crawl, &real]);
        // The unsequenced record is latest-known for state purposes...
        assert_eq!(summary.state, VersionState::Restored);
        assert_eq!(summary.last_event_type, EventType::CrawlRestored);
        // ...but the cross-version rank keeps the real sequencer.
        assert_eq!(summary.ordering.as_deref(), Some("5"));
    }

    #[test]
    fn resolve_prefers_greatest_sequencer() {
        let events_v1 = created("b", "k", "v1", "1");
        let events_v2 = created("b", "k", "v2", "2");
        let s1 = fold_version(None, &[&events_v1]);
        let s2 = fold_version(None, &[&events_v2]);
        let summaries = [("v1", &s1), ("v2", &s2)];
        assert_eq!(
            resolve_current(summaries.iter().map(|(v, s)| (*v, *s))),
            Some("v2")
        );
    }

    #[test]
    fn delete_marker_disqualifies_key() {
        let create = created("b", "k", "v1", "1");
        let marker = FlatEvent::new(EventType::Deleted)
            .with_bucket("b")
            .with_key("k")
            .with_version_id("v2")
            .with_sequencer(Some("2".to_string()))
            .with_is_delete_marker(true);
        let s1 = fold_version(None, &[&create]);
        let s2 = fold_version(None, &[&marker]);
        let summaries = [("v1", &s1), ("v2", &s2)];
        assert_eq!(
            resolve_current(summaries.iter().map(|(v, s)| (*v, *s))),
            None
        );
    }

    #[test]
    fn sequenced_version_outranks_crawl_seeded_version() {
        let crawl = FlatEvent::new(EventType::Crawl)
            .with_bucket("b")
            .with_key("k")
            .with_version_id("null")
            .with_event_time(at(10_000));
        let create = created("b", "k", "v1", "1");
        let s_crawl = fold_version(None, &[&crawl]);
        let s_real = fold_version(None, &[&create]);
        let summaries = [("null", &s_crawl), ("v1", &s_real)];
        assert_eq!(
            resolve_current(summaries.iter().map(|(v, s)| (*v, *s))),
            Some("v1")
        );
    }

    #[test]
    fn project_overwrite_demotes_and_closes_previous_version() {
        let e1 = created("b", "k", "v1", "1");
        let e2 = created("b", "k", "v2", "2").with_event_time(at(5_000));
        let plan = project(&[], &[], &[e1, e2]);

        assert_eq!(plan.object_inserts.len(), 2);
        let current: Vec<_> = plan
            .object_inserts
            .iter()
            .filter(|row| row.is_current_state)
            .collect();
        assert_eq!(current.len(), 1);
        assert_eq!(current[0].version_id, "v2");

        assert_eq!(plan.historical_inserts.len(), 1);
        let closed = &plan.historical_inserts[0];
        assert_eq!(closed.version_id, "v1");
        assert_eq!(closed.deleted, at(5_000));
    }

    #[test]
    fn project_is_arrival_order_insensitive() {
        let e1 = created("b", "k", "v1", "1");
        let e2 = created("b", "k", "v2", "2");
        let e3 = deleted("b", "k", "v2", "3");

        let forward = project(&[], &[], &[e1.clone(), e2.clone(), e3.clone()]);
        let backward = project(&[], &[], &[e3, e2, e1]);

        let flags = |plan: &ProjectionPlan| {
            let mut rows: Vec<_> = plan
                .object_inserts
                .iter()
                .map(|row| (row.version_id.clone(), row.is_current_state))
                .collect();
            rows.sort();
            rows
        };
        assert_eq!(flags(&forward), flags(&backward));
        assert_eq!(
            forward.historical_inserts.len(),
            backward.historical_inserts.len()
        );
    }

    #[test]
    fn permanent_delete_of_current_version_resurfaces_older() {
        let e1 = created("b", "k", "v1", "1");
        let e2 = created("b", "k", "v2", "2");
        let e3 = deleted("b", "k", "v2", "3");
        let plan = project(&[], &[], &[e1, e2, e3]);

        // v2 is gone entirely; v1 is current again.
        assert_eq!(plan.object_inserts.len(), 1);
        assert_eq!(plan.object_inserts[0].version_id, "v1");
        assert!(plan.object_inserts[0].is_current_state);
        assert!(plan.object_removals.is_empty());
    }

    #[test]
    fn minted_lineage_is_reported_once_per_new_object() {
        let e1 = created("b", "k", "v1", "1");
        let plan = project(&[], &[], &[e1]);
        assert_eq!(plan.minted.len(), 1);
        assert_eq!(
            plan.object_inserts[0].lineage_id,
            Some(plan.minted[0].lineage_id.as_uuid())
        );
        assert!(!plan.object_inserts[0].lineage_tag_applied);
    }

    #[test]
    fn adopted_lineage_is_not_minted() {
        let lineage = LineageId::generate();
        let e1 = created("b", "k", "v1", "1").with_lineage_id(Some(lineage));
        let plan = project(&[], &[], &[e1]);
        assert!(plan.minted.is_empty());
        assert_eq!(plan.object_inserts[0].lineage_id, Some(lineage.as_uuid()));
        assert!(plan.object_inserts[0].lineage_tag_applied);
    }

    #[test]
    fn existing_lineage_is_never_rewritten() {
        let existing_lineage = Uuid::new_v4();
        let existing = ObjectRow {
            object_id: Uuid::new_v4(),
            bucket: "b".to_string(),
            key: "k".to_string(),
            version_id: "v1".to_string(),
            created: at(500),
            ordering: Some("1".to_string()),
            lineage_id: Some(existing_lineage),
            lineage_tag_applied: true,
            is_current_state: true,
        };
        let other_lineage = LineageId::generate();
        let update = FlatEvent::new(EventType::Crawl)
            .with_bucket("b")
            .with_key("k")
            .with_version_id("v1")
            .with_lineage_id(Some(other_lineage));

        let plan = project(std::slice::from_ref(&existing), &[], &[update]);
        assert!(plan.minted.is_empty());
        for row in plan.object_inserts.iter().chain(&plan.object_updates) {
            assert_eq!(row.lineage_id, Some(existing_lineage));
        }
    }

    #[test]
    fn metadata_reflects_head_event() {
        let e1 = created("b", "k", "v1", "1")
            .with_storage_class(Some(StorageClass::Standard))
            .with_e_tag(Some("abc".to_string()));
        let plan = project(&[], &[], &[e1]);
        let meta = plan
            .metadata
            .iter()
            .find(|m| m.object_id.is_some())
            .unwrap();
        assert_eq!(meta.storage_class, Some(StorageClass::Standard));
        assert_eq!(meta.e_tag.as_deref(), Some("\"abc\""));
        assert!(meta.is_current_state);
        assert!(meta.is_accessible());
    }

    #[test]
    fn delete_marker_on_null_version_removes_existing_row() {
        let existing = ObjectRow {
            object_id: Uuid::new_v4(),
            bucket: "b".to_string(),
            key: "k".to_string(),
            version_id: "null".to_string(),
            created: at(100),
            ordering: Some("1".to_string()),
            lineage_id: None,
            lineage_tag_applied: false,
            is_current_state: true,
        };
        let marker = FlatEvent::new(EventType::Deleted)
            .with_bucket("b")
            .with_key("k")
            .with_version_id("null")
            .with_sequencer(Some("2".to_string()))
            .with_is_delete_marker(true)
            .with_event_time(at(3_000));

        let plan = project(std::slice::from_ref(&existing), &[], &[marker]);
        assert_eq!(plan.object_removals.len(), 1);
        assert!(plan.historical_inserts.iter().any(|h| h.deleted == at(3_000)));
    }
}
