//! Database client and pool management.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use stratus_core::id::{LineageId, ObjectId};
use stratus_core::{Config, Result};

/// A handle to the tracker database.
///
/// Cheap to clone; all clones share one bounded connection pool.
#[derive(Debug, Clone)]
pub struct Client {
    pool: PgPool,
}

/// An object whose lineage tag still needs to be written to the store.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PendingLineageTag {
    /// Owning object row.
    pub object_id: Uuid,
    /// The lineage to write.
    pub lineage_id: Uuid,
    /// Bucket of the tagged object.
    pub bucket: String,
    /// Key of the tagged object.
    pub key: String,
    /// Version of the tagged object.
    pub version_id: String,
}

impl Client {
    /// Connects a bounded pool to the configured database.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_db_connections)
            .connect(&config.database_url())
            .await?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Starts a new transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if a connection cannot be acquired.
    pub async fn transaction(&self) -> Result<Transaction<'_, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Applies embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Objects whose lineage was recorded locally but whose tag write-back
    /// has not succeeded yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn pending_lineage_tags(&self, limit: i64) -> Result<Vec<PendingLineageTag>> {
        Ok(sqlx::query_as::<_, PendingLineageTag>(
            "select object_id, lineage_id, bucket, key, version_id
             from object
             where lineage_id is not null and not lineage_tag_applied
             order by bucket, key
             limit $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    /// Records that the lineage tag is now present on the store side.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn mark_lineage_applied(&self, object_id: ObjectId) -> Result<()> {
        sqlx::query("update object set lineage_tag_applied = true where object_id = $1")
            .bind(object_id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replaces a locally minted lineage with one found on the store side.
    /// The tag is authoritative and is never rewritten by the engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn adopt_lineage(&self, object_id: ObjectId, lineage_id: LineageId) -> Result<()> {
        sqlx::query(
            "update object
             set lineage_id = $2, lineage_tag_applied = true
             where object_id = $1",
        )
        .bind(object_id.as_uuid())
        .bind(lineage_id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every record, current or historical, sharing a lineage.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn objects_by_lineage(&self, lineage_id: LineageId) -> Result<Vec<Uuid>> {
        let current: Vec<(Uuid,)> =
            sqlx::query_as("select object_id from object where lineage_id = $1")
                .bind(lineage_id.as_uuid())
                .fetch_all(&self.pool)
                .await?;
        let historical: Vec<(Uuid,)> = sqlx::query_as(
            "select historical_object_id from historical_object where lineage_id = $1",
        )
        .bind(lineage_id.as_uuid())
        .fetch_all(&self.pool)
        .await?;
        Ok(current
            .into_iter()
            .chain(historical)
            .map(|(id,)| id)
            .collect())
    }
}
