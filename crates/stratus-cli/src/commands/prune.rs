//! The `stratus prune` command: trim the ephemeral event log.

use chrono::{Duration, Utc};
use clap::Args;

use stratus_core::Config;
use stratus_store::{Client, prune_events};

/// Arguments for `stratus prune`.
#[derive(Debug, Args)]
pub struct PruneArgs {
    /// Delete events older than this many days.
    #[arg(long, default_value_t = 90)]
    pub older_than_days: i64,
}

/// Prunes the event log. The projection is unaffected.
///
/// # Errors
///
/// Returns an error if the connection or the delete fails.
pub async fn execute(args: PruneArgs, config: &Config) -> anyhow::Result<()> {
    let client = Client::connect(config).await?;
    let cutoff = Utc::now() - Duration::days(args.older_than_days.max(0));
    let pruned = prune_events(&client, cutoff).await?;
    println!("{}", serde_json::json!({"pruned": pruned}));
    Ok(())
}
