//! The `stratus run` command: continuous queue consumption.

use std::time::Duration;

use clap::Args;

use stratus_core::Config;
use stratus_core::sqs::QueueClient;
use stratus_flow::{Crawler, QueueConsumer};

use super::Engine;

/// Arguments for `stratus run`.
#[derive(Debug, Args)]
pub struct RunArgs {
    /// Partition workers for crawl records produced by control messages.
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Wall-clock budget per queue message, in seconds.
    #[arg(long, default_value_t = 300)]
    pub message_timeout_secs: u64,

    /// Interval between lineage tag reconciliation passes, in seconds.
    #[arg(long, default_value_t = 600)]
    pub reconcile_interval_secs: u64,
}

/// Runs the consumer until interrupted.
///
/// # Errors
///
/// Returns an error if the queue is unconfigured or consumption fails
/// hard.
pub async fn execute(args: RunArgs, config: &Config) -> anyhow::Result<()> {
    let queue_url = config
        .store_event_source_endpoint
        .clone()
        .ok_or_else(|| anyhow::anyhow!("STRATUS_STORE_EVENT_SOURCE_ENDPOINT is required"))?;

    let engine = Engine::connect(config).await?;
    let queue = QueueClient::with_defaults(queue_url).await;
    let crawler = Crawler::new(engine.s3.clone());
    let pipeline = engine.pipeline(args.workers, config.batch_size);

    let consumer = QueueConsumer::new(
        queue,
        engine.enricher.clone(),
        engine.ingester.clone(),
        engine.move_tracker.clone(),
        crawler,
        pipeline,
        Duration::from_secs(args.message_timeout_secs),
    );

    // Deferred lineage tags get retried in the background.
    let move_tracker = engine.move_tracker.clone();
    let reconcile_interval = Duration::from_secs(args.reconcile_interval_secs.max(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(reconcile_interval);
        loop {
            ticker.tick().await;
            if let Err(error) = move_tracker.reconcile(1_000).await {
                tracing::warn!(%error, "lineage reconciliation pass failed");
            }
        }
    });

    tracing::info!("consuming the event queue; ctrl-c stops");
    tokio::select! {
        result = consumer.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping consumption");
        }
    }
    Ok(())
}
