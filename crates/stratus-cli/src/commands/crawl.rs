//! The `stratus crawl` command: walk a prefix into the tracker.

use clap::Args;

use stratus_core::Config;
use stratus_flow::Crawler;

use super::Engine;

/// Arguments for `stratus crawl`.
#[derive(Debug, Args)]
pub struct CrawlArgs {
    /// Bucket to walk.
    #[arg(long)]
    pub bucket: String,

    /// Key prefix to walk under.
    #[arg(long)]
    pub prefix: Option<String>,

    /// Partition workers.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,
}

/// Crawls the prefix and ingests the records.
///
/// # Errors
///
/// Returns an error if listing or ingestion fails.
pub async fn execute(args: CrawlArgs, config: &Config) -> anyhow::Result<()> {
    let engine = Engine::connect(config).await?;
    let crawler = Crawler::new(engine.s3.clone());
    let pipeline = engine.pipeline(args.workers, config.batch_size);

    let (records, summary) = crawler.crawl(&args.bucket, args.prefix.clone()).await?;
    for record in records {
        pipeline.dispatch(record).await?;
    }
    pipeline.shutdown().await?;

    println!(
        "{}",
        serde_json::json!({"nObjects": summary.n_objects, "nBytes": summary.n_bytes})
    );
    Ok(())
}
