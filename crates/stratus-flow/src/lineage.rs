//! Lineage tag write-back and reconciliation.
//!
//! A lineage identifier minted during ingestion must end up on the store
//! side as an object tag, so that copies of the object carry their history
//! with them. Tag writes happen strictly after the ingest transaction
//! commits; a failed write leaves `lineage_tag_applied = false` on the row
//! and the reconcile pass retries it later.
//!
//! The engine never rewrites a lineage tag that already exists on an
//! object: if reconciliation finds one, the local row adopts it instead.

use std::collections::HashMap;

use aws_sdk_s3::types::{Tag, Tagging};
use metrics::counter;

use stratus_core::observability::LINEAGE_TAG_DEFERRED;
use stratus_core::s3::Client;
use stratus_core::{Error, LineageId, Result};
use stratus_store::projector::MintedLineage;
use stratus_store::{Client as StoreClient, PendingLineageTag};

/// The move tracker's tag write path.
#[derive(Debug, Clone)]
pub struct MoveTracker {
    s3: Client,
    store: StoreClient,
    tag_key: String,
}

impl MoveTracker {
    /// Creates a move tracker.
    #[must_use]
    pub fn new(s3: Client, store: StoreClient, tag_key: impl Into<String>) -> Self {
        Self {
            s3,
            store,
            tag_key: tag_key.into(),
        }
    }

    /// Writes tags for lineages minted by a committed batch.
    ///
    /// Failures are logged and deferred to [`MoveTracker::reconcile`]; this
    /// call never fails the batch.
    pub async fn apply_minted(&self, minted: &[MintedLineage]) {
        for entry in minted {
            let tags = entry.existing_tags.clone().unwrap_or_default();
            let result = self
                .write_tag(
                    &entry.bucket,
                    &entry.key,
                    &entry.version_id,
                    &tags,
                    entry.lineage_id,
                )
                .await;
            match result {
                Ok(()) => {
                    if let Err(error) = self.store.mark_lineage_applied(entry.object_id).await {
                        tracing::warn!(%error, object_id = %entry.object_id, "tag written but not recorded");
                    }
                }
                Err(error) => {
                    counter!(LINEAGE_TAG_DEFERRED).increment(1);
                    tracing::warn!(
                        %error,
                        bucket = entry.bucket,
                        key = entry.key,
                        "lineage tag write failed, deferred to reconciliation"
                    );
                }
            }
        }
    }

    /// Retries deferred tag writes.
    ///
    /// Fetches fresh tags for each pending object first: a tag that
    /// appeared in the meantime is adopted rather than overwritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the pending-rows query fails. Individual tag
    /// failures stay pending.
    pub async fn reconcile(&self, limit: i64) -> Result<usize> {
        let pending = self.store.pending_lineage_tags(limit).await?;
        let mut applied = 0;

        for row in &pending {
            match self.reconcile_one(row).await {
                Ok(()) => applied += 1,
                Err(error) => {
                    tracing::debug!(
                        %error,
                        bucket = row.bucket,
                        key = row.key,
                        "lineage tag still pending"
                    );
                }
            }
        }

        if !pending.is_empty() {
            tracing::info!(pending = pending.len(), applied, "lineage reconciliation pass");
        }
        Ok(applied)
    }

    async fn reconcile_one(&self, row: &PendingLineageTag) -> Result<()> {
        let object_id = stratus_core::ObjectId::from_uuid(row.object_id);

        let tagging = self
            .s3
            .get_object_tagging(&row.bucket, &row.key, &row.version_id)
            .await
            .map_err(|e| Error::from_sdk("GetObjectTagging", &e))?;
        let tags: HashMap<String, String> = tagging
            .tag_set()
            .iter()
            .map(|tag| (tag.key().to_string(), tag.value().to_string()))
            .collect();

        if let Some(found) = tags.get(&self.tag_key) {
            // Someone tagged the object first; the tag is authoritative.
            if let Ok(lineage) = found.parse::<LineageId>() {
                self.store.adopt_lineage(object_id, lineage).await?;
                return Ok(());
            }
        }

        self.write_tag(
            &row.bucket,
            &row.key,
            &row.version_id,
            &tags,
            LineageId::from_uuid(row.lineage_id),
        )
        .await?;
        self.store.mark_lineage_applied(object_id).await
    }

    /// Writes the lineage tag, preserving every other tag on the object
    /// (the store replaces whole tag sets).
    async fn write_tag(
        &self,
        bucket: &str,
        key: &str,
        version_id: &str,
        existing: &HashMap<String, String>,
        lineage: LineageId,
    ) -> Result<()> {
        let mut builder = Tagging::builder();
        for (tag_key, value) in existing {
            if tag_key == &self.tag_key {
                continue;
            }
            builder = builder.tag_set(
                Tag::builder()
                    .key(tag_key)
                    .value(value)
                    .build()
                    .map_err(|e| Error::storage("PutObjectTagging", e.to_string()))?,
            );
        }
        builder = builder.tag_set(
            Tag::builder()
                .key(&self.tag_key)
                .value(lineage.to_string())
                .build()
                .map_err(|e| Error::storage("PutObjectTagging", e.to_string()))?,
        );
        let tagging = builder
            .build()
            .map_err(|e| Error::storage("PutObjectTagging", e.to_string()))?;

        self.s3
            .put_object_tagging(bucket, key, version_id, tagging)
            .await
            .map_err(|e| Error::from_sdk("PutObjectTagging", &e))?;
        Ok(())
    }
}
