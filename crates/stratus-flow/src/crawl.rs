//! Crawling a bucket prefix into synthetic events.
//!
//! The crawler walks a versioned listing and emits one `Crawl` record per
//! latest version, as if the records had arrived from a bulk snapshot.
//! Listing is an anti-entropy tool here: the normal path is the event
//! stream, and crawl records only fill in objects the tracker has never
//! seen. They carry no sequencer, so they can never supersede sequenced
//! knowledge.

use aws_sdk_s3::types::ObjectVersion;
use chrono::Utc;
use metrics::counter;
use tracing::Instrument;

use stratus_core::event::{EventType, FlatEvent, StorageClass, default_version_id};
use stratus_core::observability::{CRAWL_OBJECTS, crawl_span};
use stratus_core::s3::Client;
use stratus_core::{Error, Result};

/// Totals reported after a crawl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    /// Objects emitted.
    pub n_objects: u64,
    /// Their total size in bytes.
    pub n_bytes: u64,
}

/// The prefix crawler.
#[derive(Debug, Clone)]
pub struct Crawler {
    s3: Client,
}

impl Crawler {
    /// Creates a crawler over a store client.
    #[must_use]
    pub fn new(s3: Client) -> Self {
        Self { s3 }
    }

    /// Walks `bucket` under `prefix` and produces the records to ingest,
    /// with a `{n_objects, n_bytes}` summary.
    ///
    /// Only latest versions are emitted: non-current versions are history
    /// the event stream has either already reported or never will.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing fails.
    pub async fn crawl(
        &self,
        bucket: &str,
        prefix: Option<String>,
    ) -> Result<(Vec<FlatEvent>, CrawlSummary)> {
        let span = crawl_span(bucket, prefix.as_deref().unwrap_or(""));
        self.crawl_inner(bucket, prefix).instrument(span).await
    }

    async fn crawl_inner(
        &self,
        bucket: &str,
        prefix: Option<String>,
    ) -> Result<(Vec<FlatEvent>, CrawlSummary)> {
        let listing = self
            .s3
            .list_object_versions(bucket, prefix)
            .await
            .map_err(|e| Error::from_sdk("ListObjectVersions", &e))?;

        let mut summary = CrawlSummary::default();
        let events: Vec<FlatEvent> = listing
            .versions
            .unwrap_or_default()
            .into_iter()
            .filter(|version| version.is_latest.is_some_and(|latest| latest))
            .map(|version| {
                let event = crawl_event(bucket, version);
                summary.n_objects += 1;
                summary.n_bytes += event.size.unwrap_or(0).max(0).unsigned_abs();
                event
            })
            .collect();

        counter!(CRAWL_OBJECTS).increment(summary.n_objects);
        tracing::info!(
            n_objects = summary.n_objects,
            n_bytes = summary.n_bytes,
            "crawl listing complete"
        );
        Ok((events, summary))
    }
}

fn crawl_event(bucket: &str, version: ObjectVersion) -> FlatEvent {
    let ObjectVersion {
        key,
        version_id,
        size,
        e_tag,
        last_modified,
        storage_class,
        restore_status,
        ..
    } = version;

    // A version with a completed (unexpired) restore is observed in
    // restored state.
    let restored = restore_status
        .as_ref()
        .and_then(|status| status.restore_expiry_date())
        .is_some();
    let event_type = if restored {
        EventType::CrawlRestored
    } else {
        EventType::Crawl
    };

    FlatEvent::new(event_type)
        .with_bucket(bucket)
        .with_key(key.unwrap_or_default())
        .with_version_id(version_id.unwrap_or_else(default_version_id))
        .with_sequencer(None)
        .with_size(size)
        .with_e_tag(e_tag)
        .with_storage_class(
            storage_class
                .as_ref()
                .map(|class| class.as_str())
                .and_then(StorageClass::from_aws),
        )
        .with_restored(restored)
        .with_event_time(
            last_modified
                .and_then(|modified| modified.to_millis().ok())
                .and_then(chrono::DateTime::from_timestamp_millis)
                .or_else(|| Some(Utc::now())),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::list_object_versions::ListObjectVersionsOutput;
    use aws_sdk_s3::types::RestoreStatus;
    use aws_smithy_mocks::{RuleMode, mock, mock_client};
    use aws_smithy_types::DateTime;

    fn listing_client(output: ListObjectVersionsOutput) -> Client {
        let rule = mock!(aws_sdk_s3::Client::list_object_versions)
            .then_output(move || output.clone());
        Client::new(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&rule]))
    }

    #[tokio::test]
    async fn only_latest_versions_are_emitted() {
        let output = ListObjectVersionsOutput::builder()
            .versions(
                ObjectVersion::builder()
                    .key("key")
                    .version_id("v2")
                    .size(20)
                    .is_latest(true)
                    .e_tag("abc")
                    .build(),
            )
            .versions(
                ObjectVersion::builder()
                    .key("key")
                    .version_id("v1")
                    .size(10)
                    .is_latest(false)
                    .build(),
            )
            .build();
        let crawler = Crawler::new(listing_client(output));

        let (events, summary) = crawler.crawl("bucket", None).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::Crawl);
        assert_eq!(events[0].version_id, "v2");
        assert_eq!(events[0].e_tag.as_deref(), Some("\"abc\""));
        assert!(events[0].sequencer.is_none());
        assert_eq!(summary, CrawlSummary { n_objects: 1, n_bytes: 20 });
    }

    #[tokio::test]
    async fn restored_versions_map_to_crawl_restored() {
        let output = ListObjectVersionsOutput::builder()
            .versions(
                ObjectVersion::builder()
                    .key("key")
                    .is_latest(true)
                    .restore_status(
                        RestoreStatus::builder()
                            .is_restore_in_progress(false)
                            .restore_expiry_date(DateTime::from_secs(4_000_000_000))
                            .build(),
                    )
                    .build(),
            )
            .build();
        let crawler = Crawler::new(listing_client(output));

        let (events, _) = crawler.crawl("bucket", None).await.unwrap();
        assert_eq!(events[0].event_type, EventType::CrawlRestored);
        assert!(events[0].restored);
    }

    #[tokio::test]
    async fn empty_listing_reports_zero() {
        let crawler = Crawler::new(listing_client(ListObjectVersionsOutput::builder().build()));
        let (events, summary) = crawler.crawl("bucket", Some("p/".to_string())).await.unwrap();
        assert!(events.is_empty());
        assert_eq!(summary, CrawlSummary::default());
    }
}
