//! Best-effort metadata enrichment.
//!
//! For events that establish or change an object, a HEAD lookup and a tag
//! fetch fill in storage class, archive state, restore state and any
//! pre-existing lineage tag. Enrichment never blocks ingestion: permission
//! and not-found failures degrade to missing metadata, transient failures
//! retry with jittered exponential backoff until the attempt budget runs
//! out, and every call carries a timeout.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use chrono::NaiveDate;
use futures::StreamExt;
use metrics::counter;
use tokio::sync::Semaphore;

use stratus_core::event::{ArchiveStatus, FlatEvent, StorageClass, quote_e_tag};
use stratus_core::observability::ENRICHMENT_FAILED;
use stratus_core::s3::Client;
use stratus_core::{Config, LineageId};

/// Concurrent in-flight lookups per enrichment pass.
const CONCURRENCY: usize = 16;

/// Base delay for the retry backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Cap on a single backoff delay.
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// How a failed store call should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    /// Permission or existence problem: give up quietly, metadata stays
    /// missing.
    Quiet,
    /// Possibly transient: worth another attempt.
    Transient,
}

fn classify<E>(error: &SdkError<E>) -> FailureKind
where
    E: ProvideErrorMetadata,
{
    match error {
        SdkError::ServiceError(_) => match error.code() {
            Some("AccessDenied" | "NoSuchKey" | "NoSuchVersion" | "NotFound" | "MethodNotAllowed") => {
                FailureKind::Quiet
            }
            // HEAD failures carry no body, so a missing code on a service
            // error is a not-found.
            None => FailureKind::Quiet,
            _ => FailureKind::Transient,
        },
        _ => FailureKind::Transient,
    }
}

/// The metadata enricher.
#[derive(Debug)]
pub struct Enricher {
    s3: Client,
    tag_key: String,
    max_attempts: u32,
    timeout: Duration,
    budget: Arc<Semaphore>,
    // (bucket, day) pairs already warned about, so permission problems log
    // once per bucket per day.
    warned: Mutex<HashMap<String, NaiveDate>>,
}

impl Enricher {
    /// Creates an enricher over a store client.
    #[must_use]
    pub fn new(s3: Client, config: &Config) -> Self {
        Self {
            s3,
            tag_key: config.tag_key_name.clone(),
            max_attempts: config.max_enrichment_attempts.max(1),
            timeout: config.enrichment_timeout,
            budget: Arc::new(Semaphore::new(CONCURRENCY)),
            warned: Mutex::new(HashMap::new()),
        }
    }

    /// Enriches a batch, preserving delivery order.
    ///
    /// Events whose type does not warrant a lookup pass through untouched.
    pub async fn enrich_all(&self, events: Vec<FlatEvent>) -> Vec<FlatEvent> {
        futures::stream::iter(events)
            .map(|event| self.enrich_one(event))
            .buffered(CONCURRENCY)
            .collect()
            .await
    }

    /// Enriches one event in place, best effort.
    pub async fn enrich_one(&self, mut event: FlatEvent) -> FlatEvent {
        if !event.event_type.wants_enrichment() {
            return event;
        }
        // The semaphore is the request budget; a closed semaphore cannot
        // happen because we never close it.
        let Ok(_permit) = self.budget.acquire().await else {
            return event;
        };

        self.apply_head(&mut event).await;
        self.apply_tagging(&mut event).await;
        event
    }

    async fn apply_head(&self, event: &mut FlatEvent) {
        let head = self
            .retrying("HeadObject", &event.bucket, || {
                self.s3
                    .head_object(&event.bucket, &event.key, &event.version_id)
            })
            .await;
        let Some(head) = head else { return };

        event.storage_class = head
            .storage_class()
            .map(|class| class.as_str())
            .and_then(StorageClass::from_aws)
            // HEAD omits the storage class for standard-tier objects.
            .or(Some(StorageClass::Standard));
        event.archive_status = head
            .archive_status()
            .map(|status| status.as_str())
            .and_then(ArchiveStatus::from_aws);
        event.restored = head
            .restore()
            .is_some_and(|restore| restore.contains(r#"ongoing-request="false""#));
        event.expiration = head.expiration().map(ToString::to_string);
        event.last_modified_date = head
            .last_modified()
            .and_then(|modified| modified.to_millis().ok())
            .and_then(chrono::DateTime::from_timestamp_millis);
        if event.e_tag.is_none() {
            event.e_tag = head.e_tag().map(|tag| quote_e_tag(tag.to_string()));
        }
        if event.size.is_none() {
            event.size = head.content_length();
        }
        if let Some(metadata) = head.metadata() {
            if !metadata.is_empty() {
                event.metadata = Some(metadata.clone());
            }
        }
    }

    async fn apply_tagging(&self, event: &mut FlatEvent) {
        let tagging = self
            .retrying("GetObjectTagging", &event.bucket, || {
                self.s3
                    .get_object_tagging(&event.bucket, &event.key, &event.version_id)
            })
            .await;
        let Some(tagging) = tagging else { return };

        let tags: HashMap<String, String> = tagging
            .tag_set()
            .iter()
            .map(|tag| (tag.key().to_string(), tag.value().to_string()))
            .collect();

        event.lineage_id = tags
            .get(&self.tag_key)
            .and_then(|value| value.parse::<LineageId>().ok());
        event.tags = Some(tags);
    }

    /// Runs a store call with timeout, bounded retries and jittered
    /// backoff. Returns `None` when the result is to be treated as
    /// missing metadata.
    async fn retrying<T, E, F, Fut>(&self, operation: &'static str, bucket: &str, call: F) -> Option<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, SdkError<E>>>,
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let mut backoff = BACKOFF_BASE;
        for attempt in 1..=self.max_attempts {
            match tokio::time::timeout(self.timeout, call()).await {
                Ok(Ok(output)) => return Some(output),
                Ok(Err(error)) => {
                    if classify(&error) == FailureKind::Quiet {
                        self.warn_once(bucket, operation, &error);
                        return None;
                    }
                    if attempt == self.max_attempts {
                        break;
                    }
                    tracing::debug!(
                        operation,
                        bucket,
                        attempt,
                        error = %stratus_core::Error::from_sdk(operation, &error),
                        "transient store error, backing off"
                    );
                }
                Err(_elapsed) => {
                    if attempt == self.max_attempts {
                        break;
                    }
                    tracing::debug!(operation, bucket, attempt, "store call timed out");
                }
            }

            let jitter = Duration::from_millis(rand::random_range(0..100));
            tokio::time::sleep(backoff.min(BACKOFF_MAX) + jitter).await;
            backoff = backoff.saturating_mul(2);
        }

        counter!(ENRICHMENT_FAILED).increment(1);
        tracing::warn!(operation, bucket, "enrichment gave up, metadata stays missing");
        None
    }

    fn warn_once<E>(&self, bucket: &str, operation: &'static str, error: &SdkError<E>)
    where
        E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
    {
        let today = chrono::Utc::now().date_naive();
        let mut warned = self.warned.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if warned.get(bucket) == Some(&today) {
            return;
        }
        warned.insert(bucket.to_string(), today);
        tracing::warn!(
            bucket,
            operation,
            error = %stratus_core::Error::from_sdk(operation, error),
            "store denied metadata lookup; records will persist without metadata"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::operation::get_object_tagging::GetObjectTaggingOutput;
    use aws_sdk_s3::operation::head_object::HeadObjectOutput;
    use aws_sdk_s3::types::Tag;
    use aws_smithy_mocks::{RuleMode, mock, mock_client};
    use stratus_core::event::EventType;

    fn test_config() -> Config {
        let mut config = Config::for_endpoint("postgresql://localhost/test");
        config.max_enrichment_attempts = 1;
        config
    }

    fn created_event() -> FlatEvent {
        FlatEvent::new(EventType::Created)
            .with_bucket("bucket")
            .with_key("key")
            .with_version_id("v1")
            .with_sequencer(Some("1".to_string()))
    }

    #[tokio::test]
    async fn head_and_tags_populate_the_event() {
        let lineage = LineageId::generate();
        let head = mock!(aws_sdk_s3::Client::head_object).then_output(|| {
            HeadObjectOutput::builder()
                .storage_class(aws_sdk_s3::types::StorageClass::StandardIa)
                .e_tag("\"abc\"")
                .content_length(10)
                .build()
        });
        let lineage_string = lineage.to_string();
        let tagging = mock!(aws_sdk_s3::Client::get_object_tagging).then_output(move || {
            GetObjectTaggingOutput::builder()
                .tag_set(
                    Tag::builder()
                        .key("umccr-org:OrcaBusFileManagerIngestId")
                        .value(lineage_string.clone())
                        .build()
                        .unwrap(),
                )
                .build()
                .unwrap()
        });
        let client = Client::new(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&head, &tagging]));
        let enricher = Enricher::new(client, &test_config());

        let event = enricher.enrich_one(created_event()).await;

        assert_eq!(event.storage_class, Some(StorageClass::StandardIa));
        assert_eq!(event.e_tag.as_deref(), Some("\"abc\""));
        assert_eq!(event.size, Some(10));
        assert_eq!(event.lineage_id, Some(lineage));
        assert!(event.tags.is_some());
    }

    #[tokio::test]
    async fn deleted_events_skip_enrichment() {
        // No rules at all: any request would panic the mock client.
        let head = mock!(aws_sdk_s3::Client::head_object)
            .then_output(|| HeadObjectOutput::builder().build());
        let client = Client::new(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&head]));
        let enricher = Enricher::new(client, &test_config());

        let event = FlatEvent::new(EventType::Deleted)
            .with_bucket("bucket")
            .with_key("key");
        let event = enricher.enrich_one(event).await;
        assert!(event.storage_class.is_none());
    }

    #[tokio::test]
    async fn batch_order_is_preserved() {
        let head = mock!(aws_sdk_s3::Client::head_object)
            .then_output(|| HeadObjectOutput::builder().build());
        let tagging = mock!(aws_sdk_s3::Client::get_object_tagging)
            .then_output(|| GetObjectTaggingOutput::builder().set_tag_set(Some(Vec::new())).build().unwrap());
        let client = Client::new(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&head, &tagging]));
        let enricher = Enricher::new(client, &test_config());

        let events: Vec<FlatEvent> = (0..5)
            .map(|index| {
                created_event()
                    .with_key(format!("key-{index}"))
                    .with_sequencer(Some(index.to_string()))
            })
            .collect();
        let keys_in: Vec<String> = events.iter().map(|e| e.key.clone()).collect();

        let enriched = enricher.enrich_all(events).await;
        let keys_out: Vec<String> = enriched.iter().map(|e| e.key.clone()).collect();
        assert_eq!(keys_in, keys_out);
    }
}
