//! Decoding raw notification payloads into normalized events.
//!
//! Two wire shapes are accepted: the event-bus shape (`detail-type` +
//! `detail.bucket`/`detail.object`) and the legacy notification shape
//! (`Records[].eventName` + `Records[].s3`). Both funnel through one fixed
//! mapping table that preserves the distinction between deleting an object
//! version and creating a delete marker.
//!
//! Per-record failures (missing bucket or key, unrecognized event name)
//! drop the record, bump a counter and keep the batch going.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Deserialize;

use stratus_core::event::{EventType, FlatEvent, decode_key, default_version_id};
use stratus_core::observability::RECORDS_MALFORMED;

/// The result of decoding one message body.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    /// Successfully decoded events, in delivery order.
    pub events: Vec<FlatEvent>,
    /// Records dropped as malformed or unrecognized.
    pub dropped: usize,
}

/// A crawl request delivered as a queue control message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CrawlRequest {
    /// Bucket to walk.
    pub bucket: String,
    /// Key prefix to walk under.
    #[serde(default)]
    pub prefix: Option<String>,
}

/// Tries to interpret a message body as a crawl control message.
#[must_use]
pub fn decode_control(body: &str) -> Option<CrawlRequest> {
    serde_json::from_str::<CrawlRequest>(body)
        .ok()
        .filter(|request| !request.bucket.is_empty())
}

/// Decodes a message body into events.
///
/// A body that is not JSON at all counts as one dropped record; inside a
/// parsed body, each record fails or succeeds individually.
#[must_use]
pub fn decode_message(body: &str) -> DecodedBatch {
    let mut batch = DecodedBatch::default();

    let message: RawMessage = match serde_json::from_str(body) {
        Ok(message) => message,
        Err(error) => {
            tracing::warn!(%error, "dropping undecodable message body");
            counter!(RECORDS_MALFORMED).increment(1);
            batch.dropped = 1;
            return batch;
        }
    };

    let records: Vec<RawRecord> = match message {
        RawMessage::Notification { records } => {
            records.into_iter().map(RawRecord::Legacy).collect()
        }
        RawMessage::Batch(events) => events.into_iter().map(RawRecord::Bus).collect(),
        RawMessage::Single(event) => vec![RawRecord::Bus(*event)],
    };

    for record in records {
        match decode_record(record) {
            Some(event) => batch.events.push(event),
            None => {
                counter!(RECORDS_MALFORMED).increment(1);
                batch.dropped += 1;
            }
        }
    }
    batch
}

/// Maps a source event name onto the engine's event type.
///
/// Returns the event type and whether the event created a delete marker.
/// Unrecognized names return `None` and the record is dropped.
#[must_use]
pub fn map_event_name(
    name: &str,
    reason: Option<&str>,
    deletion_type: Option<&str>,
) -> Option<(EventType, bool)> {
    let is_marker = deletion_type
        .is_some_and(|value| value.eq_ignore_ascii_case("Delete Marker Created"))
        || name.ends_with("DeleteMarkerCreated");
    let lifecycle = reason.is_some_and(|value| value.contains("Lifecycle"));

    match name {
        "Object Created" => Some((EventType::Created, false)),
        "Object Deleted" if lifecycle && !is_marker => Some((EventType::DeletedLifecycle, false)),
        "Object Deleted" => Some((EventType::Deleted, is_marker)),
        "Object Restore Completed" => Some((EventType::Restored, false)),
        "Object Restore Expired" => Some((EventType::RestoreExpired, false)),
        "Object Storage Class Changed" => Some((EventType::StorageClassChanged, false)),
        "Object Tags Added" => Some((EventType::TaggingCreated, false)),
        "Object Tags Deleted" => Some((EventType::TaggingDeleted, false)),
        name if name.starts_with("ObjectCreated:") => Some((EventType::Created, false)),
        "ObjectRemoved:Delete" => Some((EventType::Deleted, false)),
        "ObjectRemoved:DeleteMarkerCreated" => Some((EventType::Deleted, true)),
        name if name.starts_with("LifecycleExpiration:") => {
            Some((EventType::DeletedLifecycle, name.ends_with("DeleteMarkerCreated")))
        }
        "ObjectRestore:Completed" => Some((EventType::Restored, false)),
        "ObjectRestore:Delete" => Some((EventType::RestoreExpired, false)),
        "LifecycleTransition" => Some((EventType::StorageClassChanged, false)),
        "ObjectTagging:Put" => Some((EventType::TaggingCreated, false)),
        "ObjectTagging:Delete" => Some((EventType::TaggingDeleted, false)),
        _ => None,
    }
}

enum RawRecord {
    Bus(RawBusEvent),
    Legacy(RawLegacyRecord),
}

fn decode_record(record: RawRecord) -> Option<FlatEvent> {
    match record {
        RawRecord::Bus(event) => {
            let detail = event.detail?;
            let bucket = detail.bucket.and_then(|b| b.name)?;
            let object = detail.object?;
            let key = object.key?;
            let (event_type, is_delete_marker) = map_event_name(
                event.detail_type.as_deref()?,
                detail.reason.as_deref(),
                detail.deletion_type.as_deref(),
            )?;

            Some(
                FlatEvent::new(event_type)
                    .with_bucket(bucket)
                    .with_key(decode_key(&key))
                    .with_version_id(object.version_id.unwrap_or_else(default_version_id))
                    .with_sequencer(object.sequencer)
                    .with_event_time(event.time)
                    .with_size(object.size)
                    .with_e_tag(object.etag)
                    .with_is_delete_marker(is_delete_marker)
                    .with_reason(detail.reason),
            )
        }
        RawRecord::Legacy(record) => {
            let name = record.event_name?;
            let s3 = record.s3?;
            let bucket = s3.bucket.and_then(|b| b.name)?;
            let object = s3.object?;
            let key = object.key?;
            let (event_type, is_delete_marker) = map_event_name(&name, None, None)?;

            Some(
                FlatEvent::new(event_type)
                    .with_bucket(bucket)
                    .with_key(decode_key(&key))
                    .with_version_id(object.version_id.unwrap_or_else(default_version_id))
                    .with_sequencer(object.sequencer)
                    .with_event_time(record.event_time)
                    .with_size(object.size)
                    .with_e_tag(object.e_tag)
                    .with_is_delete_marker(is_delete_marker)
                    .with_reason(Some(name)),
            )
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawMessage {
    Notification {
        #[serde(rename = "Records")]
        records: Vec<RawLegacyRecord>,
    },
    Batch(Vec<RawBusEvent>),
    Single(Box<RawBusEvent>),
}

#[derive(Debug, Deserialize)]
struct RawBusEvent {
    #[serde(rename = "detail-type")]
    detail_type: Option<String>,
    time: Option<DateTime<Utc>>,
    detail: Option<RawDetail>,
}

#[derive(Debug, Deserialize)]
struct RawDetail {
    bucket: Option<RawBucket>,
    object: Option<RawObject>,
    reason: Option<String>,
    #[serde(rename = "deletion-type")]
    deletion_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawBucket {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawObject {
    key: Option<String>,
    size: Option<i64>,
    etag: Option<String>,
    #[serde(rename = "version-id")]
    version_id: Option<String>,
    sequencer: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLegacyRecord {
    #[serde(rename = "eventName")]
    event_name: Option<String>,
    #[serde(rename = "eventTime")]
    event_time: Option<DateTime<Utc>>,
    s3: Option<RawLegacyS3>,
}

#[derive(Debug, Deserialize)]
struct RawLegacyS3 {
    bucket: Option<RawBucket>,
    object: Option<RawLegacyObject>,
}

#[derive(Debug, Deserialize)]
struct RawLegacyObject {
    key: Option<String>,
    size: Option<i64>,
    #[serde(rename = "eTag")]
    e_tag: Option<String>,
    #[serde(rename = "versionId")]
    version_id: Option<String>,
    sequencer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const BUS_CREATED: &str = r#"{
        "version": "0",
        "detail-type": "Object Created",
        "source": "aws.s3",
        "time": "2024-05-22T01:30:00Z",
        "detail": {
            "bucket": {"name": "bucket"},
            "object": {
                "key": "folder/key%20one.txt",
                "size": 42,
                "etag": "d41d8cd98f00b204e9800998ecf8427e",
                "version-id": "3sL4kqtJlcpXroDTDm",
                "sequencer": "0055AED6DCD90281E5"
            },
            "reason": "PutObject"
        }
    }"#;

    #[test]
    fn decodes_bus_created_event() {
        let batch = decode_message(BUS_CREATED);
        assert_eq!(batch.dropped, 0);
        assert_eq!(batch.events.len(), 1);

        let event = &batch.events[0];
        assert_eq!(event.event_type, EventType::Created);
        assert_eq!(event.bucket, "bucket");
        assert_eq!(event.key, "folder/key one.txt");
        assert_eq!(event.version_id, "3sL4kqtJlcpXroDTDm");
        assert_eq!(event.sequencer.as_deref(), Some("0055AED6DCD90281E5"));
        assert_eq!(event.size, Some(42));
        assert_eq!(
            event.e_tag.as_deref(),
            Some("\"d41d8cd98f00b204e9800998ecf8427e\"")
        );
        assert_eq!(event.reason.as_deref(), Some("PutObject"));
        assert!(!event.is_delete_marker);
    }

    #[test]
    fn delete_marker_creation_is_distinguished() {
        let body = r#"{
            "detail-type": "Object Deleted",
            "time": "2024-05-22T01:30:00Z",
            "detail": {
                "bucket": {"name": "bucket"},
                "object": {"key": "key", "version-id": "marker-version", "sequencer": "01"},
                "reason": "DeleteObject",
                "deletion-type": "Delete Marker Created"
            }
        }"#;
        let batch = decode_message(body);
        let event = &batch.events[0];
        assert_eq!(event.event_type, EventType::Deleted);
        assert!(event.is_delete_marker);
    }

    #[test]
    fn lifecycle_deletes_map_to_their_own_type() {
        let body = r#"{
            "detail-type": "Object Deleted",
            "detail": {
                "bucket": {"name": "bucket"},
                "object": {"key": "key", "sequencer": "01"},
                "reason": "Lifecycle Expiration",
                "deletion-type": "Permanently Deleted"
            }
        }"#;
        let batch = decode_message(body);
        assert_eq!(batch.events[0].event_type, EventType::DeletedLifecycle);
    }

    #[test]
    fn missing_bucket_drops_record_but_not_batch() {
        let body = r#"[
            {"detail-type": "Object Created", "detail": {"object": {"key": "key"}}},
            {"detail-type": "Object Created",
             "detail": {"bucket": {"name": "bucket"}, "object": {"key": "key"}}}
        ]"#;
        let batch = decode_message(body);
        assert_eq!(batch.dropped, 1);
        assert_eq!(batch.events.len(), 1);
    }

    #[test]
    fn unknown_detail_type_is_dropped() {
        let body = r#"{
            "detail-type": "Object ACL Updated",
            "detail": {"bucket": {"name": "bucket"}, "object": {"key": "key"}}
        }"#;
        let batch = decode_message(body);
        assert_eq!(batch.dropped, 1);
        assert!(batch.events.is_empty());
    }

    #[test]
    fn legacy_records_decode() {
        let body = r#"{
            "Records": [{
                "eventName": "ObjectRemoved:DeleteMarkerCreated",
                "eventTime": "2024-05-22T01:30:00Z",
                "s3": {
                    "bucket": {"name": "bucket"},
                    "object": {"key": "key", "versionId": "v1", "sequencer": "0A"}
                }
            }]
        }"#;
        let batch = decode_message(body);
        let event = &batch.events[0];
        assert_eq!(event.event_type, EventType::Deleted);
        assert!(event.is_delete_marker);
        assert_eq!(event.version_id, "v1");
    }

    #[test]
    fn versionless_objects_use_the_null_sentinel() {
        let body = r#"{
            "detail-type": "Object Created",
            "detail": {"bucket": {"name": "bucket"}, "object": {"key": "key"}}
        }"#;
        let batch = decode_message(body);
        assert_eq!(batch.events[0].version_id, "null");
    }

    #[test]
    fn garbage_body_counts_as_one_drop() {
        let batch = decode_message("not json");
        assert_eq!(batch.dropped, 1);
        assert!(batch.events.is_empty());
    }

    #[test]
    fn control_messages_parse() {
        assert_eq!(
            decode_control(r#"{"bucket": "b", "prefix": "p/"}"#),
            Some(CrawlRequest {
                bucket: "b".to_string(),
                prefix: Some("p/".to_string()),
            })
        );
        assert!(decode_control(BUS_CREATED).is_none());
    }
}
