//! The `stratus inventory` command: ingest a bulk snapshot.

use clap::Args;

use stratus_core::Config;
use stratus_flow::InventoryReader;
use stratus_flow::inventory::FileStatus;

use super::Engine;

/// Arguments for `stratus inventory`.
#[derive(Debug, Args)]
pub struct InventoryArgs {
    /// Bucket holding the manifest.
    #[arg(long)]
    pub manifest_bucket: String,

    /// Key of the manifest JSON.
    #[arg(long)]
    pub manifest_key: String,

    /// Partition workers.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,
}

/// Reads the manifest and ingests every verifiable data file.
///
/// # Errors
///
/// Returns an error if the manifest cannot be read or the pipeline fails;
/// individual file failures are reported in the printed summary instead.
pub async fn execute(args: InventoryArgs, config: &Config) -> anyhow::Result<()> {
    let engine = Engine::connect(config).await?;
    let reader = InventoryReader::new(engine.s3.clone(), config.batch_size);
    let pipeline = engine.pipeline(args.workers, config.batch_size);

    let manifest = reader
        .load_manifest(&args.manifest_bucket, &args.manifest_key)
        .await?;
    let sink = pipeline.batch_sender();
    let summary = reader.run(&manifest, &sink).await?;
    drop(sink);
    pipeline.shutdown().await?;

    for outcome in &summary.outcomes {
        match &outcome.status {
            FileStatus::Ingested { rows } => {
                println!("{}: {rows} rows", outcome.key);
            }
            FileStatus::Skipped { reason } => {
                println!("{}: skipped ({reason})", outcome.key);
            }
        }
    }
    println!(
        "{}",
        serde_json::json!({"nRows": summary.n_rows, "partial": summary.is_partial()})
    );
    Ok(())
}
