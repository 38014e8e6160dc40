//! The transactional ingest writer.
//!
//! One call to [`Ingester::ingest`] is one database transaction covering
//! event-log appends, object/historical upserts and metadata upserts for
//! every `(bucket, key)` the batch touches. Replaying a batch is a no-op
//! thanks to the dedup index and the deterministic projection.

use std::collections::{BTreeSet, HashMap};

use metrics::counter;
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use stratus_core::event::FlatEvent;
use stratus_core::observability::{EVENTS_DUPLICATE, EVENTS_INGESTED, EVENTS_REORDERED};
use stratus_core::sequence::{SequencedEvent, sequence_batch};
use stratus_core::{Error, Result};

use crate::client::Client;
use crate::projector::{MintedLineage, ProjectionPlan, project};
use crate::rows::{HistoricalObjectRow, MetadataRow, ObjectRow, StoreEventRow, string_map_to_json};

const INSERT_EVENTS: &str = include_str!("../queries/insert_store_events.sql");
const SELECT_EVENTS: &str = include_str!("../queries/select_events_for_keys.sql");

/// Outcome of one ingest call.
#[derive(Debug, Default)]
pub struct IngestSummary {
    /// Events newly appended to the log.
    pub ingested: usize,
    /// Deliveries that matched an existing dedup key (in-batch collapses
    /// plus collisions with persisted rows).
    pub duplicates: u64,
    /// Newly appended events that arrived behind a later event.
    pub reordered: usize,
    /// Lineages minted in this batch; their tags must be written to the
    /// store after this call returns.
    pub minted: Vec<MintedLineage>,
}

#[derive(Debug, sqlx::FromRow)]
struct InsertOutcome {
    bucket: String,
    key: String,
    version_id: String,
    sequencer: Option<String>,
    event_type: String,
    inserted: bool,
}

type DedupKey = (String, String, String, Option<String>, String);

fn outcome_key(outcome: &InsertOutcome) -> DedupKey {
    (
        outcome.bucket.clone(),
        outcome.key.clone(),
        outcome.version_id.clone(),
        outcome.sequencer.clone(),
        outcome.event_type.clone(),
    )
}

fn event_key(event: &FlatEvent) -> DedupKey {
    (
        event.bucket.clone(),
        event.key.clone(),
        event.version_id.clone(),
        event.sequencer.clone(),
        event.event_type.as_str().to_string(),
    )
}

/// The transactional batch writer.
#[derive(Debug, Clone)]
pub struct Ingester {
    client: Client,
}

impl Ingester {
    /// Creates an ingester over a database client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// The underlying client.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Ingests one batch of events atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; the transaction rolls back
    /// and the caller must not acknowledge the source message.
    pub async fn ingest(&self, incoming: Vec<FlatEvent>) -> Result<IngestSummary> {
        if incoming.is_empty() {
            return Ok(IngestSummary::default());
        }

        let keys: BTreeSet<(String, String)> = incoming
            .iter()
            .map(|event| (event.bucket.clone(), event.key.clone()))
            .collect();
        let (buckets, key_names): (Vec<String>, Vec<String>) = keys.into_iter().unzip();

        let mut tx = self.client.transaction().await?;

        let existing_rows = sqlx::query_as::<_, StoreEventRow>(SELECT_EVENTS)
            .bind(&buckets)
            .bind(&key_names)
            .fetch_all(&mut *tx)
            .await?;
        let existing: Vec<FlatEvent> = existing_rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<_>>()?;

        let sequenced = sequence_batch(incoming, &existing);
        let in_batch_duplicates: u64 = sequenced.iter().map(|s| s.duplicates as u64).sum();

        let outcomes = insert_events(&mut tx, &sequenced).await?;
        let duplicate_by_key: HashMap<DedupKey, bool> = outcomes
            .iter()
            .map(|outcome| (outcome_key(outcome), !outcome.inserted))
            .collect();

        let mut new_events = Vec::new();
        let mut cross_duplicates = 0u64;
        let mut reordered = 0usize;
        for item in &sequenced {
            let was_duplicate = duplicate_by_key
                .get(&event_key(&item.event))
                .copied()
                .unwrap_or(false);
            if was_duplicate {
                cross_duplicates += 1;
            } else {
                if item.reordered {
                    reordered += 1;
                }
                new_events.push(item.event.clone());
            }
        }

        let ingested = new_events.len();
        let mut log = existing;
        log.extend(new_events);

        let objects = sqlx::query_as::<_, ObjectRow>(
            "select object_id, bucket, key, version_id, created, ordering, lineage_id,
                    lineage_tag_applied, is_current_state
             from object
             where (bucket, key) in (
                 select pairs.bucket, pairs.key
                 from unnest($1::text[], $2::text[]) as pairs (bucket, key)
             )
             for update",
        )
        .bind(&buckets)
        .bind(&key_names)
        .fetch_all(&mut *tx)
        .await?;

        let historicals = sqlx::query_as::<_, HistoricalObjectRow>(
            "select historical_object_id, bucket, key, version_id, created, deleted,
                    ordering, lineage_id
             from historical_object
             where (bucket, key) in (
                 select pairs.bucket, pairs.key
                 from unnest($1::text[], $2::text[]) as pairs (bucket, key)
             )",
        )
        .bind(&buckets)
        .bind(&key_names)
        .fetch_all(&mut *tx)
        .await?;

        let plan = project(&objects, &historicals, &log);
        apply_plan(&mut tx, &plan).await?;

        tx.commit().await?;

        let duplicates = in_batch_duplicates + cross_duplicates;
        counter!(EVENTS_INGESTED).increment(ingested as u64);
        counter!(EVENTS_DUPLICATE).increment(duplicates);
        counter!(EVENTS_REORDERED).increment(reordered as u64);
        tracing::debug!(
            ingested,
            duplicates,
            reordered,
            minted = plan.minted.len(),
            "batch ingested"
        );

        Ok(IngestSummary {
            ingested,
            duplicates,
            reordered,
            minted: plan.minted,
        })
    }
}

#[allow(clippy::too_many_lines)]
async fn insert_events(
    tx: &mut Transaction<'_, Postgres>,
    sequenced: &[SequencedEvent],
) -> Result<Vec<InsertOutcome>> {
    let mut event_ids = Vec::with_capacity(sequenced.len());
    let mut event_types = Vec::with_capacity(sequenced.len());
    let mut event_times = Vec::with_capacity(sequenced.len());
    let mut sequencers = Vec::with_capacity(sequenced.len());
    let mut buckets = Vec::with_capacity(sequenced.len());
    let mut keys = Vec::with_capacity(sequenced.len());
    let mut version_ids = Vec::with_capacity(sequenced.len());
    let mut sizes = Vec::with_capacity(sequenced.len());
    let mut e_tags = Vec::with_capacity(sequenced.len());
    let mut delete_markers = Vec::with_capacity(sequenced.len());
    let mut reasons = Vec::with_capacity(sequenced.len());
    let mut storage_classes = Vec::with_capacity(sequenced.len());
    let mut last_modified = Vec::with_capacity(sequenced.len());
    let mut expirations = Vec::with_capacity(sequenced.len());
    let mut restored_flags = Vec::with_capacity(sequenced.len());
    let mut archive_statuses = Vec::with_capacity(sequenced.len());
    let mut metadata_maps = Vec::with_capacity(sequenced.len());
    let mut tag_maps = Vec::with_capacity(sequenced.len());
    let mut lineage_ids = Vec::with_capacity(sequenced.len());
    let mut duplicate_counts = Vec::with_capacity(sequenced.len());
    let mut reordered_counts = Vec::with_capacity(sequenced.len());

    for item in sequenced {
        let event = &item.event;
        event_ids.push(event.event_id.as_uuid());
        event_types.push(event.event_type.as_str().to_string());
        event_times.push(event.event_time);
        sequencers.push(event.sequencer.clone());
        buckets.push(event.bucket.clone());
        keys.push(event.key.clone());
        version_ids.push(event.version_id.clone());
        sizes.push(event.size);
        e_tags.push(event.e_tag.clone());
        delete_markers.push(event.is_delete_marker);
        reasons.push(event.reason.clone());
        storage_classes.push(event.storage_class.map(|class| class.as_str().to_string()));
        last_modified.push(event.last_modified_date);
        expirations.push(event.expiration.clone());
        restored_flags.push(event.restored);
        archive_statuses.push(event.archive_status.map(|status| status.as_str().to_string()));
        metadata_maps.push(event.metadata.as_ref().map(string_map_to_json));
        tag_maps.push(event.tags.as_ref().map(string_map_to_json));
        lineage_ids.push(event.lineage_id.map(|lineage| lineage.as_uuid()));
        duplicate_counts.push(item.duplicates);
        reordered_counts.push(i32::from(item.reordered));
    }

    Ok(sqlx::query_as::<_, InsertOutcome>(INSERT_EVENTS)
        .bind(event_ids)
        .bind(event_types)
        .bind(event_times)
        .bind(sequencers)
        .bind(buckets)
        .bind(keys)
        .bind(version_ids)
        .bind(sizes)
        .bind(e_tags)
        .bind(delete_markers)
        .bind(reasons)
        .bind(storage_classes)
        .bind(last_modified)
        .bind(expirations)
        .bind(restored_flags)
        .bind(archive_statuses)
        .bind(metadata_maps)
        .bind(tag_maps)
        .bind(lineage_ids)
        .bind(duplicate_counts)
        .bind(reordered_counts)
        .fetch_all(&mut **tx)
        .await?)
}

async fn apply_plan(tx: &mut Transaction<'_, Postgres>, plan: &ProjectionPlan) -> Result<()> {
    for row in &plan.historical_inserts {
        sqlx::query(
            "insert into historical_object
                 (historical_object_id, bucket, key, version_id, created, deleted,
                  ordering, lineage_id)
             values ($1, $2, $3, $4, $5, $6, $7, $8)
             on conflict (bucket, key, version_id, deleted) do nothing",
        )
        .bind(row.historical_object_id)
        .bind(&row.bucket)
        .bind(&row.key)
        .bind(&row.version_id)
        .bind(row.created)
        .bind(row.deleted)
        .bind(&row.ordering)
        .bind(row.lineage_id)
        .execute(&mut **tx)
        .await?;
    }

    // Snapshot copies happen while the source object's metadata still
    // exists; the owning object may be removed right after.
    for (source, target) in &plan.metadata_copies {
        sqlx::query(
            "insert into s3_metadata
                 (s3_metadata_id, object_id, historical_object_id, storage_class,
                  last_modified_date, e_tag, is_delete_marker, expiration, restored,
                  archive_status, metadata, tags, last_event_type, is_current_state)
             select $3, null, $2, storage_class, last_modified_date, e_tag,
                    is_delete_marker, expiration, restored, archive_status, metadata,
                    tags, last_event_type, false
             from s3_metadata
             where object_id = $1
             on conflict (historical_object_id) where historical_object_id is not null
             do nothing",
        )
        .bind(source.as_uuid())
        .bind(target.as_uuid())
        .bind(Uuid::new_v4())
        .execute(&mut **tx)
        .await?;
    }

    for removal in &plan.object_removals {
        if let Some(target) = removal.transfer_to {
            sqlx::query(
                "update checksum
                 set historical_object_id = $2, object_id = null
                 where object_id = $1",
            )
            .bind(removal.object_id.as_uuid())
            .bind(target.as_uuid())
            .execute(&mut **tx)
            .await?;
            sqlx::query(
                "update object_attributes
                 set historical_object_id = $2, object_id = null
                 where object_id = $1",
            )
            .bind(removal.object_id.as_uuid())
            .bind(target.as_uuid())
            .execute(&mut **tx)
            .await?;
        }
        sqlx::query("delete from object where object_id = $1")
            .bind(removal.object_id.as_uuid())
            .execute(&mut **tx)
            .await?;
    }

    // Clear current-state flags before setting new ones so the partial
    // unique index never sees two current rows for one key.
    for row in plan
        .object_updates
        .iter()
        .filter(|row| !row.is_current_state)
    {
        update_object(tx, row).await?;
    }
    for row in &plan.object_inserts {
        sqlx::query(
            "insert into object
                 (object_id, bucket, key, version_id, created, ordering, lineage_id,
                  lineage_tag_applied, is_current_state)
             values ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(row.object_id)
        .bind(&row.bucket)
        .bind(&row.key)
        .bind(&row.version_id)
        .bind(row.created)
        .bind(&row.ordering)
        .bind(row.lineage_id)
        .bind(row.lineage_tag_applied)
        .bind(row.is_current_state)
        .execute(&mut **tx)
        .await?;
    }
    for row in plan
        .object_updates
        .iter()
        .filter(|row| row.is_current_state)
    {
        update_object(tx, row).await?;
    }

    for id in &plan.historical_deletes {
        sqlx::query("delete from historical_object where historical_object_id = $1")
            .bind(id.as_uuid())
            .execute(&mut **tx)
            .await?;
    }

    for row in &plan.metadata {
        upsert_metadata(tx, row).await?;
    }

    for (object_id, is_current) in &plan.metadata_current_updates {
        sqlx::query("update s3_metadata set is_current_state = $2 where object_id = $1")
            .bind(object_id.as_uuid())
            .bind(is_current)
            .execute(&mut **tx)
            .await?;
    }

    Ok(())
}

async fn update_object(tx: &mut Transaction<'_, Postgres>, row: &ObjectRow) -> Result<()> {
    sqlx::query(
        "update object
         set created = $2, ordering = $3, lineage_id = $4, lineage_tag_applied = $5,
             is_current_state = $6
         where object_id = $1",
    )
    .bind(row.object_id)
    .bind(row.created)
    .bind(&row.ordering)
    .bind(row.lineage_id)
    .bind(row.lineage_tag_applied)
    .bind(row.is_current_state)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

async fn upsert_metadata(tx: &mut Transaction<'_, Postgres>, row: &MetadataRow) -> Result<()> {
    let conflict_column = if row.object_id.is_some() {
        "object_id"
    } else if row.historical_object_id.is_some() {
        "historical_object_id"
    } else {
        return Err(Error::InvalidInput(
            "metadata row without an owner".to_string(),
        ));
    };
    let statement = format!(
        "insert into s3_metadata
             (s3_metadata_id, object_id, historical_object_id, storage_class,
              last_modified_date, e_tag, is_delete_marker, expiration, restored,
              archive_status, metadata, tags, last_event_type, is_current_state)
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
         on conflict ({conflict_column}) where {conflict_column} is not null
         do update set
             storage_class = excluded.storage_class,
             last_modified_date = excluded.last_modified_date,
             e_tag = excluded.e_tag,
             is_delete_marker = excluded.is_delete_marker,
             expiration = excluded.expiration,
             restored = excluded.restored,
             archive_status = excluded.archive_status,
             metadata = excluded.metadata,
             tags = excluded.tags,
             last_event_type = excluded.last_event_type,
             is_current_state = excluded.is_current_state",
    );

    sqlx::query(&statement)
        .bind(row.s3_metadata_id)
        .bind(row.object_id)
        .bind(row.historical_object_id)
        .bind(row.storage_class.map(|class| class.as_str().to_string()))
        .bind(row.last_modified_date)
        .bind(&row.e_tag)
        .bind(row.is_delete_marker)
        .bind(&row.expiration)
        .bind(row.restored)
        .bind(row.archive_status.map(|status| status.as_str().to_string()))
        .bind(row.metadata.as_ref().map(string_map_to_json))
        .bind(row.tags.as_ref().map(string_map_to_json))
        .bind(row.last_event_type.as_str())
        .bind(row.is_current_state)
        .execute(&mut **tx)
        .await?;
    Ok(())
}
