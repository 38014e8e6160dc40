//! Bulk snapshot ingestion.
//!
//! An inventory job reads a manifest, verifies each data file against its
//! MD5, streams rows out of the container (gzip-CSV, ORC or Parquet) and
//! feeds synthetic records into the pipeline in bounded batches. A corrupt
//! file fails alone; the job carries on and reports per-file outcomes.

pub mod format;
pub mod manifest;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::Instrument;

use stratus_core::event::{EventType, FlatEvent, StorageClass, decode_key, default_version_id};
use stratus_core::observability::{INVENTORY_FILES_SKIPPED, INVENTORY_ROWS, inventory_span};
use stratus_core::s3::Client;
use stratus_core::{Error, Result};

pub use format::{FileFormat, FormatReader, InventoryRecord};
pub use manifest::{Manifest, ManifestFile};

use chrono::{DateTime, Utc};

/// What happened to one data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    /// All rows were read and forwarded.
    Ingested {
        /// Rows forwarded.
        rows: u64,
    },
    /// The file was skipped; the rest of the job continued.
    Skipped {
        /// Why the file was skipped.
        reason: String,
    },
}

/// Per-file outcome of an inventory job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    /// Key of the data file.
    pub key: String,
    /// What happened to it.
    pub status: FileStatus,
}

/// The result of one inventory job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryJobSummary {
    /// Per-file outcomes, in manifest order.
    pub outcomes: Vec<FileOutcome>,
    /// Total rows forwarded.
    pub n_rows: u64,
}

impl InventoryJobSummary {
    /// Whether some files were skipped while others were ingested.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        let skipped = self
            .outcomes
            .iter()
            .any(|outcome| matches!(outcome.status, FileStatus::Skipped { .. }));
        let ingested = self
            .outcomes
            .iter()
            .any(|outcome| matches!(outcome.status, FileStatus::Ingested { .. }));
        skipped && ingested
    }
}

/// The inventory reader.
#[derive(Debug, Clone)]
pub struct InventoryReader {
    s3: Client,
    batch_size: usize,
}

impl InventoryReader {
    /// Creates a reader over a store client.
    #[must_use]
    pub fn new(s3: Client, batch_size: usize) -> Self {
        Self {
            s3,
            batch_size: batch_size.max(1),
        }
    }

    /// Fetches and parses a manifest from the store.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest cannot be fetched or parsed.
    pub async fn load_manifest(&self, bucket: &str, key: &str) -> Result<Manifest> {
        let output = self
            .s3
            .get_object(bucket, key)
            .await
            .map_err(|e| Error::from_sdk("GetObject", &e))?;
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| Error::inventory(key, format!("reading manifest body: {e}")))?
            .into_bytes();
        let body = std::str::from_utf8(&bytes)
            .map_err(|e| Error::inventory(key, format!("manifest is not UTF-8: {e}")))?;
        Manifest::from_json(body)
    }

    /// Runs a job over every file in the manifest, sending bounded batches
    /// of records into `sink`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the sink closes; file-level failures are
    /// reported in the summary instead.
    pub async fn run(
        &self,
        manifest: &Manifest,
        sink: &mpsc::Sender<Vec<FlatEvent>>,
    ) -> Result<InventoryJobSummary> {
        let mut summary = InventoryJobSummary::default();

        for file in &manifest.files {
            let span = inventory_span(manifest.data_bucket(), &file.key);

            let status = match self.run_file(manifest, file, sink).instrument(span).await {
                Ok(rows) => {
                    summary.n_rows += rows;
                    FileStatus::Ingested { rows }
                }
                Err(error @ Error::Cancelled { .. }) => return Err(error),
                Err(error) => {
                    counter!(INVENTORY_FILES_SKIPPED).increment(1);
                    tracing::warn!(%error, file = file.key, "skipping inventory file");
                    FileStatus::Skipped {
                        reason: error.to_string(),
                    }
                }
            };
            summary.outcomes.push(FileOutcome {
                key: file.key.clone(),
                status,
            });
        }

        tracing::info!(
            files = summary.outcomes.len(),
            rows = summary.n_rows,
            partial = summary.is_partial(),
            "inventory job complete"
        );
        Ok(summary)
    }

    async fn run_file(
        &self,
        manifest: &Manifest,
        file: &ManifestFile,
        sink: &mpsc::Sender<Vec<FlatEvent>>,
    ) -> Result<u64> {
        let format = FileFormat::detect(manifest.file_format.as_deref(), &file.key)
            .ok_or_else(|| Error::inventory(&file.key, "unrecognized container format"))?;

        let output = self
            .s3
            .get_object(manifest.data_bucket(), &file.key)
            .await
            .map_err(|e| Error::from_sdk("GetObject", &e))?;
        let file_time = output
            .last_modified
            .as_ref()
            .and_then(|modified| modified.to_millis().ok())
            .and_then(DateTime::from_timestamp_millis);
        let data = output
            .body
            .collect()
            .await
            .map_err(|e| Error::inventory(&file.key, format!("reading body: {e}")))?
            .into_bytes()
            .to_vec();

        verify_md5(&file.key, &data, &file.md5_checksum)?;

        let mut reader = FormatReader::open(
            format,
            &file.key,
            data,
            &manifest.file_schema,
            self.batch_size,
        )?;

        let mut rows = 0u64;
        while let Some(records) = reader.next_batch()? {
            let events: Vec<FlatEvent> = records
                .into_iter()
                .filter_map(|record| record_to_event(manifest, record, file_time))
                .collect();
            rows += events.len() as u64;
            counter!(INVENTORY_ROWS).increment(events.len() as u64);
            if !events.is_empty() {
                sink.send(events)
                    .await
                    .map_err(|_| Error::cancelled("inventory sink closed"))?;
            }
        }
        Ok(rows)
    }
}

fn verify_md5(file: &str, data: &[u8], expected: &str) -> Result<()> {
    let actual = format!("{:x}", md5::compute(data));
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(Error::inventory(
            file,
            format!("MD5 mismatch: manifest says {expected}, file is {actual}"),
        ))
    }
}

/// Projects one inventory row into a synthetic crawl record.
///
/// Rows without a key are unusable and dropped. Delete-marker rows keep
/// their marker flag so the projection can disqualify the key.
fn record_to_event(
    manifest: &Manifest,
    record: InventoryRecord,
    file_time: Option<DateTime<Utc>>,
) -> Option<FlatEvent> {
    let key = record.key?;
    let restored = record
        .restore_status
        .as_deref()
        .is_some_and(|status| status.eq_ignore_ascii_case("restored"));
    let event_type = if restored {
        EventType::CrawlRestored
    } else {
        EventType::Crawl
    };

    Some(
        FlatEvent::new(event_type)
            .with_bucket(
                record
                    .bucket
                    .unwrap_or_else(|| manifest.source_bucket.clone()),
            )
            .with_key(decode_key(&key))
            .with_version_id(
                record
                    .version_id
                    .filter(|version| !version.is_empty())
                    .unwrap_or_else(default_version_id),
            )
            .with_sequencer(None)
            .with_event_time(file_time.or(record.last_modified))
            .with_size(record.size)
            .with_e_tag(record.e_tag)
            .with_is_delete_marker(record.is_delete_marker)
            .with_storage_class(
                record
                    .storage_class
                    .as_deref()
                    .and_then(StorageClass::from_aws),
            )
            .with_restored(restored)
            .with_last_modified_date(record.last_modified),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> Manifest {
        Manifest::from_json(
            r#"{
                "sourceBucket": "data",
                "destinationBucket": "inventory",
                "fileFormat": "CSV",
                "fileSchema": ["Bucket", "Key", "VersionId", "IsDeleteMarker"],
                "files": []
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn md5_verification_accepts_matching_case_insensitively() {
        let data = b"hello world";
        let digest = format!("{:X}", md5::compute(data));
        assert!(verify_md5("f", data, &digest).is_ok());
        assert!(verify_md5("f", data, "00000000000000000000000000000000").is_err());
    }

    #[test]
    fn rows_become_crawl_records() {
        let record = InventoryRecord {
            bucket: Some("data".to_string()),
            key: Some("a%20b".to_string()),
            version_id: Some("v1".to_string()),
            size: Some(10),
            ..InventoryRecord::default()
        };
        let event = record_to_event(&manifest(), record, None).unwrap();
        assert_eq!(event.event_type, EventType::Crawl);
        assert_eq!(event.key, "a b");
        assert_eq!(event.version_id, "v1");
        assert!(event.sequencer.is_none());
    }

    #[test]
    fn missing_bucket_falls_back_to_source_bucket() {
        let record = InventoryRecord {
            key: Some("k".to_string()),
            ..InventoryRecord::default()
        };
        let event = record_to_event(&manifest(), record, None).unwrap();
        assert_eq!(event.bucket, "data");
        assert_eq!(event.version_id, "null");
    }

    #[test]
    fn keyless_rows_are_dropped() {
        assert!(record_to_event(&manifest(), InventoryRecord::default(), None).is_none());
    }

    #[test]
    fn restored_rows_map_to_crawl_restored() {
        let record = InventoryRecord {
            key: Some("k".to_string()),
            restore_status: Some("RESTORED".to_string()),
            ..InventoryRecord::default()
        };
        let event = record_to_event(&manifest(), record, None).unwrap();
        assert_eq!(event.event_type, EventType::CrawlRestored);
    }
}
