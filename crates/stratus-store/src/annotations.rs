//! User-supplied annotations: attribute payloads and checksums.
//!
//! Both operations are idempotent and only ever touch the record the caller
//! names. Patching a now-historical record requires its historical ID; the
//! engine never redirects an annotation from a current row to history.
//!
//! Attribute patches follow RFC 7396 merge-patch: nested objects merge,
//! `null` deletes a key, and arrays are replaced whole.

use serde_json::Value;
use uuid::Uuid;

use stratus_core::id::{HistoricalObjectId, ObjectId};
use stratus_core::{Error, Result};

use crate::client::Client;

/// The record an annotation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnnotationTarget {
    /// A row in the current-state table.
    Object(ObjectId),
    /// A closed record in the history table.
    Historical(HistoricalObjectId),
}

impl AnnotationTarget {
    const fn column(self) -> &'static str {
        match self {
            Self::Object(_) => "object_id",
            Self::Historical(_) => "historical_object_id",
        }
    }

    fn id(self) -> Uuid {
        match self {
            Self::Object(id) => id.as_uuid(),
            Self::Historical(id) => id.as_uuid(),
        }
    }
}

/// Applies an RFC 7396 merge-patch to a JSON document.
#[must_use]
pub fn merge_patch(target: Value, patch: &Value) -> Value {
    match patch {
        Value::Object(patch_map) => {
            let mut merged = match target {
                Value::Object(map) => map,
                _ => serde_json::Map::new(),
            };
            for (key, value) in patch_map {
                if value.is_null() {
                    merged.remove(key);
                } else {
                    let existing = merged.remove(key).unwrap_or(Value::Null);
                    merged.insert(key.clone(), merge_patch(existing, value));
                }
            }
            Value::Object(merged)
        }
        other => other.clone(),
    }
}

/// The annotation write path.
#[derive(Debug, Clone)]
pub struct Annotations {
    client: Client,
}

impl Annotations {
    /// Creates the annotation store over a database client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Merge-patches the attribute payload attached to a record.
    ///
    /// Identical payloads are shared between records: the patched document
    /// is deduplicated against existing payloads before linking, and
    /// payload rows that lose their last link are removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the target does not exist or a statement fails.
    pub async fn patch_attributes(&self, target: AnnotationTarget, patch: &Value) -> Result<Value> {
        let column = target.column();
        let mut tx = self.client.transaction().await?;

        let exists: Option<(Uuid,)> = sqlx::query_as(&format!(
            "select {column} from {} where {column} = $1",
            match target {
                AnnotationTarget::Object(_) => "object",
                AnnotationTarget::Historical(_) => "historical_object",
            }
        ))
        .bind(target.id())
        .fetch_optional(&mut *tx)
        .await?;
        if exists.is_none() {
            return Err(Error::not_found("annotation target", target.id()));
        }

        let current: Option<(Value,)> = sqlx::query_as(&format!(
            "select a.payload
             from attributes a
             join object_attributes oa on oa.attributes_id = a.attributes_id
             where oa.{column} = $1"
        ))
        .bind(target.id())
        .fetch_optional(&mut *tx)
        .await?;

        let merged = merge_patch(
            current.map_or(Value::Object(serde_json::Map::new()), |(payload,)| payload),
            patch,
        );

        // Share an existing identical payload, or persist a new one.
        let shared: Option<(Uuid,)> =
            sqlx::query_as("select attributes_id from attributes where payload = $1 limit 1")
                .bind(&merged)
                .fetch_optional(&mut *tx)
                .await?;
        let attributes_id = match shared {
            Some((id,)) => id,
            None => {
                let id = Uuid::new_v4();
                sqlx::query("insert into attributes (attributes_id, payload) values ($1, $2)")
                    .bind(id)
                    .bind(&merged)
                    .execute(&mut *tx)
                    .await?;
                id
            }
        };

        sqlx::query(&format!(
            "delete from object_attributes where {column} = $1"
        ))
        .bind(target.id())
        .execute(&mut *tx)
        .await?;
        sqlx::query(&format!(
            "insert into object_attributes ({column}, attributes_id) values ($1, $2)"
        ))
        .bind(target.id())
        .bind(attributes_id)
        .execute(&mut *tx)
        .await?;

        // Payloads with no remaining links are garbage.
        sqlx::query(
            "delete from attributes
             where not exists (
                 select 1 from object_attributes oa
                 where oa.attributes_id = attributes.attributes_id
             )",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(merged)
    }

    /// Upserts a named checksum on a record.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub async fn set_checksum(
        &self,
        target: AnnotationTarget,
        name: &str,
        value: &str,
    ) -> Result<()> {
        let column = target.column();
        sqlx::query(&format!(
            "insert into checksum (checksum_id, {column}, name, value)
             values ($1, $2, $3, $4)
             on conflict ({column}, name) where {column} is not null
             do update set value = excluded.value"
        ))
        .bind(Uuid::new_v4())
        .bind(target.id())
        .bind(name)
        .bind(value)
        .execute(self.client.pool())
        .await?;
        Ok(())
    }
}
