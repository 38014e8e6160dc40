//! Event-log pruning.
//!
//! The event log is ephemeral: rows older than a cutoff can be deleted
//! without affecting the projection, which the ingest writer only ever
//! recomputes for closures newer than the retained log.

use chrono::{DateTime, Utc};

use stratus_core::Result;

use crate::client::Client;

/// Deletes event rows older than the cutoff.
///
/// Returns the number of rows removed. Rows without an event time are kept:
/// their age is unknown.
///
/// # Errors
///
/// Returns an error if the delete fails.
pub async fn prune_events(client: &Client, cutoff: DateTime<Utc>) -> Result<u64> {
    let result = sqlx::query("delete from store_event where event_time < $1")
        .bind(cutoff)
        .execute(client.pool())
        .await?;
    let pruned = result.rows_affected();
    tracing::info!(pruned, %cutoff, "event log pruned");
    Ok(pruned)
}
