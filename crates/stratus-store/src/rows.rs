//! Row types mirroring the persisted schema.
//!
//! These are the boundary between sqlx and the projection logic: fetched
//! rows convert into [`FlatEvent`]s (and back) so the reducer never sees
//! database types.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use stratus_core::event::{ArchiveStatus, EventType, FlatEvent, StorageClass};
use stratus_core::id::{EventId, HistoricalObjectId, LineageId, ObjectId};
use stratus_core::{Error, Result};

/// One `store_event` row.
#[derive(Debug, Clone, FromRow)]
pub struct StoreEventRow {
    /// Primary key.
    pub event_id: Uuid,
    /// Event type discriminator.
    pub event_type: String,
    /// Source timestamp.
    pub event_time: Option<DateTime<Utc>>,
    /// Store ordering token.
    pub sequencer: Option<String>,
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Version identifier (`'null'` sentinel for non-versioned buckets).
    pub version_id: String,
    /// Object size in bytes.
    pub size: Option<i64>,
    /// Quoted eTag.
    pub e_tag: Option<String>,
    /// Whether the event created a delete marker.
    pub is_delete_marker: bool,
    /// Verbatim source reason.
    pub reason: Option<String>,
    /// Storage class at enrichment time.
    pub storage_class: Option<String>,
    /// Last-modified at enrichment time.
    pub last_modified_date: Option<DateTime<Utc>>,
    /// Expiration rule text.
    pub expiration: Option<String>,
    /// Whether a restore was completed at enrichment time.
    pub restored: bool,
    /// Intelligent-tiering archive tier.
    pub archive_status: Option<String>,
    /// User metadata map.
    pub metadata: Option<Value>,
    /// Object tag map.
    pub tags: Option<Value>,
    /// Lineage adopted from an existing tag.
    pub lineage_id: Option<Uuid>,
    /// Deliveries that matched this row's dedup key.
    pub number_duplicate_events: i32,
    /// Whether this event arrived behind an already-known later event.
    pub number_reordered: i32,
}

impl TryFrom<StoreEventRow> for FlatEvent {
    type Error = Error;

    fn try_from(row: StoreEventRow) -> Result<Self> {
        Ok(Self {
            event_id: EventId::from_uuid(row.event_id),
            event_type: row.event_type.parse()?,
            event_time: row.event_time,
            sequencer: row.sequencer,
            bucket: row.bucket,
            key: row.key,
            version_id: row.version_id,
            size: row.size,
            e_tag: row.e_tag,
            is_delete_marker: row.is_delete_marker,
            reason: row.reason,
            storage_class: row
                .storage_class
                .as_deref()
                .map(str::parse)
                .transpose()?,
            last_modified_date: row.last_modified_date,
            expiration: row.expiration,
            restored: row.restored,
            archive_status: row
                .archive_status
                .as_deref()
                .map(parse_archive_status)
                .transpose()?,
            metadata: row.metadata.map(json_to_string_map).transpose()?,
            tags: row.tags.map(json_to_string_map).transpose()?,
            lineage_id: row.lineage_id.map(LineageId::from_uuid),
        })
    }
}

fn parse_archive_status(value: &str) -> Result<ArchiveStatus> {
    match value {
        "ArchiveAccess" => Ok(ArchiveStatus::ArchiveAccess),
        "DeepArchiveAccess" => Ok(ArchiveStatus::DeepArchiveAccess),
        other => Err(Error::InvalidInput(format!(
            "unknown archive status '{other}'"
        ))),
    }
}

fn json_to_string_map(value: Value) -> Result<HashMap<String, String>> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::serialization("expected a JSON object for a tag/metadata map"))?;
    Ok(object
        .iter()
        .map(|(k, v)| {
            let rendered = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), rendered)
        })
        .collect())
}

/// Serializes a string map for a jsonb column.
#[must_use]
pub fn string_map_to_json(map: &HashMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

/// One `object` row.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct ObjectRow {
    /// Primary key.
    pub object_id: Uuid,
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Version identifier.
    pub version_id: String,
    /// When this version was first created.
    pub created: Option<DateTime<Utc>>,
    /// Ordering token carried from the head event's sequencer.
    pub ordering: Option<String>,
    /// Lineage identifier, if assigned.
    pub lineage_id: Option<Uuid>,
    /// Whether the lineage tag is known to exist on the store side.
    pub lineage_tag_applied: bool,
    /// Whether this row is what the store would currently report.
    pub is_current_state: bool,
}

impl ObjectRow {
    /// Typed primary key.
    #[must_use]
    pub fn id(&self) -> ObjectId {
        ObjectId::from_uuid(self.object_id)
    }

    /// Typed lineage identifier.
    #[must_use]
    pub fn lineage(&self) -> Option<LineageId> {
        self.lineage_id.map(LineageId::from_uuid)
    }
}

/// One `historical_object` row.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct HistoricalObjectRow {
    /// Primary key.
    pub historical_object_id: Uuid,
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Version identifier.
    pub version_id: String,
    /// When this version's current tenure began.
    pub created: Option<DateTime<Utc>>,
    /// When the tenure closed.
    pub deleted: Option<DateTime<Utc>>,
    /// Ordering token at close time.
    pub ordering: Option<String>,
    /// Lineage identifier, if assigned.
    pub lineage_id: Option<Uuid>,
}

impl HistoricalObjectRow {
    /// Typed primary key.
    #[must_use]
    pub fn id(&self) -> HistoricalObjectId {
        HistoricalObjectId::from_uuid(self.historical_object_id)
    }
}

/// One `s3_metadata` row, minus the generated accessibility column.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRow {
    /// Primary key.
    pub s3_metadata_id: Uuid,
    /// Owning object, exclusive with `historical_object_id`.
    pub object_id: Option<Uuid>,
    /// Owning historical object, exclusive with `object_id`.
    pub historical_object_id: Option<Uuid>,
    /// Storage class.
    pub storage_class: Option<StorageClass>,
    /// Last-modified timestamp.
    pub last_modified_date: Option<DateTime<Utc>>,
    /// Quoted eTag.
    pub e_tag: Option<String>,
    /// Whether the owning version is a delete marker.
    pub is_delete_marker: bool,
    /// Expiration rule text.
    pub expiration: Option<String>,
    /// Whether a restore is currently completed.
    pub restored: bool,
    /// Intelligent-tiering archive tier.
    pub archive_status: Option<ArchiveStatus>,
    /// User metadata map.
    pub metadata: Option<HashMap<String, String>>,
    /// Object tag map.
    pub tags: Option<HashMap<String, String>>,
    /// Type of the event this snapshot derives from.
    pub last_event_type: EventType,
    /// Copy of the owner's current-state flag, input to accessibility.
    pub is_current_state: bool,
}

impl MetadataRow {
    /// The accessibility flag the generated column will compute for this
    /// row. Mirrored here so the in-memory twin matches the schema.
    #[must_use]
    pub fn is_accessible(&self) -> bool {
        stratus_core::is_accessible(
            self.is_current_state,
            self.storage_class,
            self.last_event_type,
            self.archive_status,
        )
    }
}
