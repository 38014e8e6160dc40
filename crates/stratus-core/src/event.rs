//! The normalized event model shared by every ingestion path.
//!
//! A [`FlatEvent`] is the single record shape that the decoder, the
//! enricher, the inventory reader and the crawler all produce, and that the
//! ingest writer persists. It carries the store's ordering token (the
//! sequencer) plus optional enrichment fields filled in by a HEAD lookup.
//!
//! Ordering within one `(bucket, key, version_id)` is defined once, here:
//! the lexicographic order of the sequencer, with a missing sequencer
//! ordered *after* every present one (a record without a sequencer is
//! treated as latest-known), ties broken by event time ascending and then
//! event ID ascending.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::id::{EventId, LineageId};

/// Version identifier recorded for objects in buckets without versioning.
///
/// The store reports the literal string `"null"` for such objects, and using
/// the same sentinel keeps deduplication and grouping uniform across
/// versioned and non-versioned buckets.
#[must_use]
pub fn default_version_id() -> String {
    "null".to_string()
}

/// Normalizes an eTag to its quoted wire form.
///
/// HEAD responses return eTags wrapped in double quotes while inventory and
/// listing rows often carry them bare; every ingest path quotes so equality
/// comparisons are meaningful.
#[must_use]
pub fn quote_e_tag(e_tag: String) -> String {
    if e_tag.starts_with('"') && e_tag.ends_with('"') {
        e_tag
    } else {
        format!("\"{e_tag}\"")
    }
}

/// Percent-decodes an object key exactly once.
///
/// Event notifications and inventory rows deliver keys query-encoded, with
/// `+` standing in for a space.
#[must_use]
pub fn decode_key(key: &str) -> String {
    let plus_decoded = key.replace('+', " ");
    percent_decode_str(&plus_decoded)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .unwrap_or(plus_decoded)
}

/// The kind of change a store event reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    /// An object version was created (put, post, copy or multipart).
    Created,
    /// An object version was deleted, either permanently or by creating a
    /// delete marker (distinguished by [`FlatEvent::is_delete_marker`]).
    Deleted,
    /// An object was expired by a lifecycle rule. Terminal for the version.
    DeletedLifecycle,
    /// An archive restore completed.
    Restored,
    /// A completed restore expired again.
    RestoreExpired,
    /// The storage class changed (lifecycle transition or explicit copy).
    StorageClassChanged,
    /// Synthetic record produced by the crawler or the inventory reader.
    Crawl,
    /// Synthetic record for an object observed in restored state.
    CrawlRestored,
    /// Tags were added to an object.
    TaggingCreated,
    /// Tags were removed from an object.
    TaggingDeleted,
}

impl EventType {
    /// Whether this event establishes an object version (a created record or
    /// one of the synthetic crawl kinds).
    #[must_use]
    pub const fn is_created_like(&self) -> bool {
        matches!(self, Self::Created | Self::Crawl | Self::CrawlRestored)
    }

    /// Whether the enricher should issue a HEAD lookup for this event.
    #[must_use]
    pub const fn wants_enrichment(&self) -> bool {
        matches!(
            self,
            Self::Created
                | Self::Restored
                | Self::Crawl
                | Self::CrawlRestored
                | Self::StorageClassChanged
        )
    }

    /// Whether this event reports a completed archive restore.
    #[must_use]
    pub const fn is_restore_completed(&self) -> bool {
        matches!(self, Self::Restored | Self::CrawlRestored)
    }

    /// Stable database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Deleted => "Deleted",
            Self::DeletedLifecycle => "DeletedLifecycle",
            Self::Restored => "Restored",
            Self::RestoreExpired => "RestoreExpired",
            Self::StorageClassChanged => "StorageClassChanged",
            Self::Crawl => "Crawl",
            Self::CrawlRestored => "CrawlRestored",
            Self::TaggingCreated => "TaggingCreated",
            Self::TaggingDeleted => "TaggingDeleted",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Created" => Ok(Self::Created),
            "Deleted" => Ok(Self::Deleted),
            "DeletedLifecycle" => Ok(Self::DeletedLifecycle),
            "Restored" => Ok(Self::Restored),
            "RestoreExpired" => Ok(Self::RestoreExpired),
            "StorageClassChanged" => Ok(Self::StorageClassChanged),
            "Crawl" => Ok(Self::Crawl),
            "CrawlRestored" => Ok(Self::CrawlRestored),
            "TaggingCreated" => Ok(Self::TaggingCreated),
            "TaggingDeleted" => Ok(Self::TaggingDeleted),
            other => Err(Error::InvalidInput(format!("unknown event type '{other}'"))),
        }
    }
}

/// Storage classes the store can report. `None` everywhere means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum StorageClass {
    /// Frequent-access default tier.
    Standard,
    /// Infrequent access.
    StandardIa,
    /// Single-zone infrequent access.
    OnezoneIa,
    /// Automatic tiering.
    IntelligentTiering,
    /// Flexible-retrieval archive.
    Glacier,
    /// Instant-retrieval archive.
    GlacierIr,
    /// Deep archive.
    DeepArchive,
    /// On-premises outpost.
    Outposts,
    /// Legacy reduced redundancy.
    ReducedRedundancy,
    /// Snow family devices.
    Snow,
}

impl StorageClass {
    /// Parses the store's SCREAMING_SNAKE wire form, e.g. `STANDARD_IA`.
    #[must_use]
    pub fn from_aws(value: &str) -> Option<Self> {
        match value {
            "STANDARD" => Some(Self::Standard),
            "STANDARD_IA" => Some(Self::StandardIa),
            "ONEZONE_IA" => Some(Self::OnezoneIa),
            "INTELLIGENT_TIERING" => Some(Self::IntelligentTiering),
            "GLACIER" => Some(Self::Glacier),
            "GLACIER_IR" => Some(Self::GlacierIr),
            "DEEP_ARCHIVE" => Some(Self::DeepArchive),
            "OUTPOSTS" => Some(Self::Outposts),
            "REDUCED_REDUNDANCY" => Some(Self::ReducedRedundancy),
            "SNOW" => Some(Self::Snow),
            _ => None,
        }
    }

    /// Stable database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Standard => "Standard",
            Self::StandardIa => "StandardIa",
            Self::OnezoneIa => "OnezoneIa",
            Self::IntelligentTiering => "IntelligentTiering",
            Self::Glacier => "Glacier",
            Self::GlacierIr => "GlacierIr",
            Self::DeepArchive => "DeepArchive",
            Self::Outposts => "Outposts",
            Self::ReducedRedundancy => "ReducedRedundancy",
            Self::Snow => "Snow",
        }
    }

    /// Whether objects in this class need a restore before their bytes can
    /// be fetched. Instant-retrieval archive is excluded.
    #[must_use]
    pub const fn is_archive(&self) -> bool {
        matches!(self, Self::Glacier | Self::DeepArchive)
    }
}

impl fmt::Display for StorageClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageClass {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        match s {
            "Standard" => Ok(Self::Standard),
            "StandardIa" => Ok(Self::StandardIa),
            "OnezoneIa" => Ok(Self::OnezoneIa),
            "IntelligentTiering" => Ok(Self::IntelligentTiering),
            "Glacier" => Ok(Self::Glacier),
            "GlacierIr" => Ok(Self::GlacierIr),
            "DeepArchive" => Ok(Self::DeepArchive),
            "Outposts" => Ok(Self::Outposts),
            "ReducedRedundancy" => Ok(Self::ReducedRedundancy),
            "Snow" => Ok(Self::Snow),
            other => Err(Error::InvalidInput(format!(
                "unknown storage class '{other}'"
            ))),
        }
    }
}

/// Archive tier of an intelligent-tiering object, when archived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum ArchiveStatus {
    /// Archive access tier.
    ArchiveAccess,
    /// Deep archive access tier.
    DeepArchiveAccess,
}

impl ArchiveStatus {
    /// Parses the store's wire form.
    #[must_use]
    pub fn from_aws(value: &str) -> Option<Self> {
        match value {
            "ARCHIVE_ACCESS" => Some(Self::ArchiveAccess),
            "DEEP_ARCHIVE_ACCESS" => Some(Self::DeepArchiveAccess),
            _ => None,
        }
    }

    /// Stable database representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ArchiveAccess => "ArchiveAccess",
            Self::DeepArchiveAccess => "DeepArchiveAccess",
        }
    }
}

/// A normalized record for one store event, ready for ingestion.
///
/// Built with `with_*` setters so the decoder, enricher and synthetic
/// producers can each fill in the fields they know about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatEvent {
    /// Unique identifier assigned at decode time.
    pub event_id: EventId,
    /// The kind of change reported.
    pub event_type: EventType,
    /// When the store says the change happened.
    pub event_time: Option<DateTime<Utc>>,
    /// The store's ordering token. `None` for synthetic records.
    pub sequencer: Option<String>,
    /// Bucket name.
    pub bucket: String,
    /// Object key, percent-decoded.
    pub key: String,
    /// Version identifier, `"null"` for non-versioned buckets.
    pub version_id: String,
    /// Object size in bytes, if reported.
    pub size: Option<i64>,
    /// Quoted eTag, if reported.
    pub e_tag: Option<String>,
    /// Whether a delete event created a delete marker rather than removing
    /// a version.
    pub is_delete_marker: bool,
    /// The source's reason string, preserved verbatim.
    pub reason: Option<String>,

    // Enrichment fields, filled by a HEAD lookup when available.
    /// Storage class at enrichment time.
    pub storage_class: Option<StorageClass>,
    /// Last-modified timestamp at enrichment time.
    pub last_modified_date: Option<DateTime<Utc>>,
    /// Expiration rule text, if any.
    pub expiration: Option<String>,
    /// Whether an archive restore is currently completed.
    pub restored: bool,
    /// Intelligent-tiering archive tier, if archived.
    pub archive_status: Option<ArchiveStatus>,
    /// User metadata from the HEAD response.
    pub metadata: Option<HashMap<String, String>>,
    /// Object tags, including any lineage tag.
    pub tags: Option<HashMap<String, String>>,
    /// Lineage identifier adopted from an existing tag on the object.
    pub lineage_id: Option<LineageId>,
}

impl FlatEvent {
    /// Creates an event with a freshly generated ID and empty fields.
    #[must_use]
    pub fn new(event_type: EventType) -> Self {
        Self {
            event_id: EventId::generate(),
            event_type,
            event_time: None,
            sequencer: None,
            bucket: String::new(),
            key: String::new(),
            version_id: default_version_id(),
            size: None,
            e_tag: None,
            is_delete_marker: false,
            reason: None,
            storage_class: None,
            last_modified_date: None,
            expiration: None,
            restored: false,
            archive_status: None,
            metadata: None,
            tags: None,
            lineage_id: None,
        }
    }

    /// Sets the bucket.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Sets the key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    /// Sets the version ID.
    #[must_use]
    pub fn with_version_id(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = version_id.into();
        self
    }

    /// Sets the sequencer.
    #[must_use]
    pub fn with_sequencer(mut self, sequencer: Option<String>) -> Self {
        self.sequencer = sequencer;
        self
    }

    /// Sets the event time.
    #[must_use]
    pub fn with_event_time(mut self, event_time: Option<DateTime<Utc>>) -> Self {
        self.event_time = event_time;
        self
    }

    /// Sets the size.
    #[must_use]
    pub const fn with_size(mut self, size: Option<i64>) -> Self {
        self.size = size;
        self
    }

    /// Sets the eTag, normalizing to quoted form.
    #[must_use]
    pub fn with_e_tag(mut self, e_tag: Option<String>) -> Self {
        self.e_tag = e_tag.map(quote_e_tag);
        self
    }

    /// Marks the event as a delete-marker creation.
    #[must_use]
    pub const fn with_is_delete_marker(mut self, is_delete_marker: bool) -> Self {
        self.is_delete_marker = is_delete_marker;
        self
    }

    /// Sets the verbatim source reason.
    #[must_use]
    pub fn with_reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    /// Sets the storage class.
    #[must_use]
    pub const fn with_storage_class(mut self, storage_class: Option<StorageClass>) -> Self {
        self.storage_class = storage_class;
        self
    }

    /// Sets the last-modified timestamp.
    #[must_use]
    pub fn with_last_modified_date(mut self, last_modified_date: Option<DateTime<Utc>>) -> Self {
        self.last_modified_date = last_modified_date;
        self
    }

    /// Sets the restored flag.
    #[must_use]
    pub const fn with_restored(mut self, restored: bool) -> Self {
        self.restored = restored;
        self
    }

    /// Sets the archive status.
    #[must_use]
    pub const fn with_archive_status(mut self, archive_status: Option<ArchiveStatus>) -> Self {
        self.archive_status = archive_status;
        self
    }

    /// Sets the adopted lineage ID.
    #[must_use]
    pub const fn with_lineage_id(mut self, lineage_id: Option<LineageId>) -> Self {
        self.lineage_id = lineage_id;
        self
    }

    /// The in-batch deduplication key: two events agreeing on all five
    /// components are the same delivery.
    #[must_use]
    pub fn dedup_key(&self) -> (String, String, String, Option<String>, EventType) {
        (
            self.bucket.clone(),
            self.key.clone(),
            self.version_id.clone(),
            self.sequencer.clone(),
            self.event_type,
        )
    }

    /// The ordering key of this event within its `(bucket, key, version_id)`
    /// partition.
    #[must_use]
    pub fn order(&self) -> EventOrder<'_> {
        EventOrder {
            sequencer: self.sequencer.as_deref(),
            event_time: self.event_time,
            event_id: self.event_id,
        }
    }
}

/// The total order over events of one `(bucket, key, version_id)`.
///
/// A missing sequencer sorts after every present one: a record the store did
/// not sequence (crawl, inventory) is taken as the latest known state. Ties
/// break by event time ascending, then event ID ascending, so the order is
/// total and replay-stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventOrder<'a> {
    /// Sequencer token, if the store assigned one.
    pub sequencer: Option<&'a str>,
    /// Event timestamp.
    pub event_time: Option<DateTime<Utc>>,
    /// Event identifier, the final tie-break.
    pub event_id: EventId,
}

impl Ord for EventOrder<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_sequencer = match (self.sequencer, other.sequencer) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        by_sequencer
            .then_with(|| self.event_time.cmp(&other.event_time))
            .then_with(|| self.event_id.cmp(&other.event_id))
    }
}

impl PartialOrd for EventOrder<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Whether an object's bytes can currently be fetched without a restore.
///
/// Unknown storage class counts as accessible: absence of information is not
/// evidence of unavailability. Flexible-retrieval archive is never directly
/// accessible; deep archive only when the last event reports a completed
/// restore; intelligent tiering only while not archived.
#[must_use]
pub fn is_accessible(
    is_current_state: bool,
    storage_class: Option<StorageClass>,
    last_event_type: EventType,
    archive_status: Option<ArchiveStatus>,
) -> bool {
    if !is_current_state {
        return false;
    }
    match storage_class {
        None => true,
        Some(class) => {
            class != StorageClass::Glacier
                && (class != StorageClass::DeepArchive || last_event_type.is_restore_completed())
                && (class != StorageClass::IntelligentTiering || archive_status.is_none())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn order_of(sequencer: Option<&'static str>, millis: i64, id: u128) -> EventOrder<'static> {
        EventOrder {
            sequencer,
            event_time: DateTime::from_timestamp_millis(millis),
            event_id: EventId::from_uuid(Uuid::from_u128(id)),
        }
    }

    #[test]
    fn sequencer_order_is_lexicographic() {
        assert!(order_of(Some("0055AED6DCD90281E5"), 0, 1) < order_of(Some("0055AED6DCD90281E6"), 0, 1));
    }

    #[test]
    fn missing_sequencer_orders_last() {
        assert!(order_of(None, 0, 1) > order_of(Some("ffff"), 100, 2));
    }

    #[test]
    fn ties_break_by_time_then_id() {
        assert!(order_of(Some("a"), 1, 1) < order_of(Some("a"), 2, 1));
        assert!(order_of(Some("a"), 1, 1) < order_of(Some("a"), 1, 2));
    }

    #[test]
    fn e_tag_quoting_is_idempotent() {
        assert_eq!(quote_e_tag("abc123".to_string()), "\"abc123\"");
        assert_eq!(quote_e_tag("\"abc123\"".to_string()), "\"abc123\"");
    }

    #[test]
    fn keys_decode_once() {
        assert_eq!(decode_key("a%20b+c"), "a b c");
        assert_eq!(decode_key("plain/key.txt"), "plain/key.txt");
        // Already-decoded percent signs survive.
        assert_eq!(decode_key("100%25"), "100%");
    }

    #[test]
    fn unknown_storage_class_is_accessible() {
        assert!(is_accessible(true, None, EventType::Created, None));
    }

    #[test]
    fn glacier_is_never_accessible() {
        assert!(!is_accessible(
            true,
            Some(StorageClass::Glacier),
            EventType::Restored,
            None
        ));
    }

    #[test]
    fn deep_archive_requires_completed_restore() {
        assert!(!is_accessible(
            true,
            Some(StorageClass::DeepArchive),
            EventType::Created,
            None
        ));
        assert!(is_accessible(
            true,
            Some(StorageClass::DeepArchive),
            EventType::Restored,
            None
        ));
        assert!(is_accessible(
            true,
            Some(StorageClass::DeepArchive),
            EventType::CrawlRestored,
            None
        ));
    }

    #[test]
    fn intelligent_tiering_depends_on_archive_status() {
        assert!(is_accessible(
            true,
            Some(StorageClass::IntelligentTiering),
            EventType::Created,
            None
        ));
        assert!(!is_accessible(
            true,
            Some(StorageClass::IntelligentTiering),
            EventType::Created,
            Some(ArchiveStatus::DeepArchiveAccess)
        ));
    }

    #[test]
    fn non_current_rows_are_never_accessible() {
        assert!(!is_accessible(false, None, EventType::Created, None));
    }

    #[test]
    fn glacier_ir_is_accessible() {
        assert!(is_accessible(
            true,
            Some(StorageClass::GlacierIr),
            EventType::Created,
            None
        ));
    }
}
