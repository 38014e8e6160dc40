//! A thin, mockable wrapper around the object store client.
//!
//! Every call site in the engine goes through this type so tests can inject
//! a mocked client. Operations are limited to what the tracker needs: HEAD,
//! ranged GET for inventory files, paginated version listing, and object
//! tagging in both directions.

use aws_sdk_s3 as s3;
use aws_sdk_s3::operation::get_object::{GetObjectError, GetObjectOutput};
use aws_sdk_s3::operation::get_object_tagging::{GetObjectTaggingError, GetObjectTaggingOutput};
use aws_sdk_s3::operation::head_object::{HeadObjectError, HeadObjectOutput};
use aws_sdk_s3::operation::list_object_versions::{
    ListObjectVersionsError, ListObjectVersionsOutput,
};
use aws_sdk_s3::operation::put_object_tagging::{PutObjectTaggingError, PutObjectTaggingOutput};
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::ChecksumMode::Enabled;
use aws_sdk_s3::types::{OptionalObjectAttributes, Tagging};

use crate::event::default_version_id;

/// Iteration cap for paginated version listings, so a livelocked marker can
/// never spin the crawler forever.
pub const MAX_LIST_ITERATIONS: usize = 1_000_000;

/// Result type carrying the SDK's operation-specific errors.
pub type Result<T, E> = std::result::Result<T, SdkError<E>>;

/// A wrapper around the object store client which can be mocked.
#[derive(Debug, Clone)]
pub struct Client {
    inner: s3::Client,
}

impl Client {
    /// Wraps an existing store client.
    #[must_use]
    pub fn new(inner: s3::Client) -> Self {
        Self { inner }
    }

    /// Creates a client from the ambient AWS configuration.
    pub async fn with_defaults() -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(s3::Client::new(&config))
    }

    /// Translates the engine's `"null"` sentinel back into an absent version
    /// qualifier for the store.
    fn version_qualifier(version_id: &str) -> Option<String> {
        if version_id == default_version_id() {
            None
        } else {
            Some(version_id.to_string())
        }
    }

    /// Executes `HeadObject` for one object version, requesting checksums.
    pub async fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<HeadObjectOutput, HeadObjectError> {
        self.inner
            .head_object()
            .checksum_mode(Enabled)
            .bucket(bucket)
            .key(key)
            .set_version_id(Self::version_qualifier(version_id))
            .send()
            .await
    }

    /// Executes `GetObject` for one object version.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<GetObjectOutput, GetObjectError> {
        self.inner
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
    }

    /// Executes `ListObjectVersions` under a prefix, following pagination
    /// markers until the listing is complete.
    pub async fn list_object_versions(
        &self,
        bucket: &str,
        prefix: Option<String>,
    ) -> Result<ListObjectVersionsOutput, ListObjectVersionsError> {
        let list = |key_marker, version_id_marker| async {
            self.inner
                .list_object_versions()
                .bucket(bucket)
                .set_prefix(prefix.clone())
                .set_key_marker(key_marker)
                .set_version_id_marker(version_id_marker)
                .optional_object_attributes(OptionalObjectAttributes::RestoreStatus)
                .send()
                .await
        };

        let mut result = list(None, None).await?;

        for _ in 0..MAX_LIST_ITERATIONS {
            if !result.is_truncated().is_some_and(|truncated| truncated) {
                break;
            }

            let mut next = list(
                result.next_key_marker.clone(),
                result.next_version_id_marker.clone(),
            )
            .await?;

            next.versions
                .get_or_insert_default()
                .extend(result.versions.unwrap_or_default());
            next.delete_markers
                .get_or_insert_default()
                .extend(result.delete_markers.unwrap_or_default());

            result = next;
        }

        Ok(result)
    }

    /// Executes `GetObjectTagging` for one object version.
    pub async fn get_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
    ) -> Result<GetObjectTaggingOutput, GetObjectTaggingError> {
        self.inner
            .get_object_tagging()
            .bucket(bucket)
            .key(key)
            .set_version_id(Self::version_qualifier(version_id))
            .send()
            .await
    }

    /// Executes `PutObjectTagging` for one object version.
    ///
    /// The store replaces the whole tag set on this call, so callers must
    /// pass every tag the object should keep, not only the new one.
    pub async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        tagging: Tagging,
    ) -> Result<PutObjectTaggingOutput, PutObjectTaggingError> {
        self.inner
            .put_object_tagging()
            .bucket(bucket)
            .key(key)
            .set_version_id(Self::version_qualifier(version_id))
            .tagging(tagging)
            .send()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aws_sdk_s3::types::ObjectVersion;
    use aws_smithy_mocks::{RuleMode, mock, mock_client};

    #[test]
    fn null_sentinel_maps_to_absent_qualifier() {
        assert_eq!(Client::version_qualifier("null"), None);
        assert_eq!(
            Client::version_qualifier("3sL4kqtJlcpXroDTDm"),
            Some("3sL4kqtJlcpXroDTDm".to_string())
        );
    }

    #[tokio::test]
    async fn list_object_versions_follows_markers() {
        let first = mock!(s3::Client::list_object_versions)
            .match_requests(|req| req.key_marker().is_none())
            .then_output(|| {
                ListObjectVersionsOutput::builder()
                    .versions(ObjectVersion::builder().key("a").build())
                    .is_truncated(true)
                    .next_key_marker("a")
                    .build()
            });
        let second = mock!(s3::Client::list_object_versions)
            .match_requests(|req| req.key_marker() == Some("a"))
            .then_output(|| {
                ListObjectVersionsOutput::builder()
                    .versions(ObjectVersion::builder().key("b").build())
                    .is_truncated(false)
                    .build()
            });
        let client = Client::new(mock_client!(aws_sdk_s3, RuleMode::MatchAny, [&first, &second]));

        let result = client
            .list_object_versions("bucket", Some("prefix".to_string()))
            .await
            .unwrap();

        let keys: Vec<_> = result
            .versions()
            .iter()
            .filter_map(|v| v.key())
            .collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"a") && keys.contains(&"b"));
    }
}
