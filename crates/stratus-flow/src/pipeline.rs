//! Partitioned ingestion and the queue consumption loop.
//!
//! Two entry points feed the writer:
//!
//! - [`QueueConsumer`] turns one queue message into one enrichment pass,
//!   one transaction and one acknowledgement. The message is deleted only
//!   after commit; everything else is left to redelivery, which is safe
//!   under deduplication.
//! - [`Pipeline`] serializes high-volume synthetic streams (crawl,
//!   inventory) per `(bucket, key)`: records are routed to a fixed worker
//!   by key hash over bounded channels, and each worker batches and writes
//!   its own partitions. Cross-key ordering is not guaranteed and nothing
//!   relies on it.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::Instrument;

use stratus_core::event::FlatEvent;
use stratus_core::observability::ingest_span;
use stratus_core::sqs::QueueClient;
use stratus_core::{Error, Result};
use stratus_store::Ingester;

use crate::crawl::Crawler;
use crate::decode::{decode_control, decode_message};
use crate::enrich::Enricher;
use crate::lineage::MoveTracker;

/// How long a worker waits for more records before flushing a short batch.
const LINGER: Duration = Duration::from_millis(500);

/// Per-worker channel capacity; the bound is the backpressure.
const CHANNEL_CAPACITY: usize = 1_024;

/// A worker pool that serializes ingestion per `(bucket, key)`.
pub struct Pipeline {
    senders: Vec<mpsc::Sender<FlatEvent>>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Starts `workers` partition workers writing through `ingester`.
    #[must_use]
    pub fn start(
        ingester: Ingester,
        enricher: Arc<Enricher>,
        move_tracker: Arc<MoveTracker>,
        workers: usize,
        batch_size: usize,
    ) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);

        for index in 0..workers {
            let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
            senders.push(sender);
            handles.push(tokio::spawn(worker_loop(
                index,
                receiver,
                ingester.clone(),
                Arc::clone(&enricher),
                Arc::clone(&move_tracker),
                batch_size.max(1),
            )));
        }

        Self { senders, handles }
    }

    /// Routes one record to its partition worker, awaiting channel
    /// capacity.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipeline has shut down.
    pub async fn dispatch(&self, event: FlatEvent) -> Result<()> {
        let mut hasher = DefaultHasher::new();
        (&event.bucket, &event.key).hash(&mut hasher);
        #[allow(clippy::cast_possible_truncation)]
        let index = (hasher.finish() % self.senders.len() as u64) as usize;
        self.senders[index]
            .send(event)
            .await
            .map_err(|_| Error::cancelled("pipeline worker stopped"))
    }

    /// A sender feeding the pipeline, hashed per record. Useful as an
    /// inventory sink.
    #[must_use]
    pub fn batch_sender(&self) -> mpsc::Sender<Vec<FlatEvent>> {
        let (sender, mut receiver) = mpsc::channel::<Vec<FlatEvent>>(4);
        let senders = self.senders.clone();
        tokio::spawn(async move {
            while let Some(batch) = receiver.recv().await {
                for event in batch {
                    let mut hasher = DefaultHasher::new();
                    (&event.bucket, &event.key).hash(&mut hasher);
                    #[allow(clippy::cast_possible_truncation)]
                    let index = (hasher.finish() % senders.len() as u64) as usize;
                    if senders[index].send(event).await.is_err() {
                        return;
                    }
                }
            }
        });
        sender
    }

    /// Flushes remaining records and stops the workers.
    ///
    /// # Errors
    ///
    /// Returns an error if a worker panicked.
    pub async fn shutdown(self) -> Result<()> {
        drop(self.senders);
        for handle in self.handles {
            handle
                .await
                .map_err(|e| Error::cancelled(format!("pipeline worker panicked: {e}")))?;
        }
        Ok(())
    }
}

async fn worker_loop(
    index: usize,
    mut receiver: mpsc::Receiver<FlatEvent>,
    ingester: Ingester,
    enricher: Arc<Enricher>,
    move_tracker: Arc<MoveTracker>,
    batch_size: usize,
) {
    loop {
        let Some(first) = receiver.recv().await else {
            return;
        };
        let mut batch = vec![first];

        // Fill the batch until full or the stream goes quiet.
        while batch.len() < batch_size {
            match tokio::time::timeout(LINGER, receiver.recv()).await {
                Ok(Some(event)) => batch.push(event),
                Ok(None) | Err(_) => break,
            }
        }

        let size = batch.len();
        let enriched = enricher.enrich_all(batch).await;
        match ingester.ingest(enriched).await {
            Ok(summary) => move_tracker.apply_minted(&summary.minted).await,
            Err(error) => {
                // Synthetic streams have no redelivery; the next crawl or
                // inventory run re-derives the same records.
                tracing::error!(%error, worker = index, records = size, "partition batch failed");
            }
        }
    }
}

/// The event stream consumer: one message, one transaction, one ack.
pub struct QueueConsumer {
    queue: QueueClient,
    enricher: Arc<Enricher>,
    ingester: Ingester,
    move_tracker: Arc<MoveTracker>,
    crawler: Crawler,
    pipeline: Pipeline,
    /// Wall-clock budget for one message; on expiry the message is not
    /// acknowledged and will be redelivered.
    message_timeout: Duration,
}

impl QueueConsumer {
    /// Creates a consumer.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: QueueClient,
        enricher: Arc<Enricher>,
        ingester: Ingester,
        move_tracker: Arc<MoveTracker>,
        crawler: Crawler,
        pipeline: Pipeline,
        message_timeout: Duration,
    ) -> Self {
        Self {
            queue,
            enricher,
            ingester,
            move_tracker,
            crawler,
            pipeline,
            message_timeout,
        }
    }

    /// Receives and processes one poll's worth of messages.
    ///
    /// Returns how many messages were acknowledged.
    ///
    /// # Errors
    ///
    /// Returns an error if receiving fails. Per-message failures are
    /// logged and left unacknowledged.
    pub async fn run_once(&self) -> Result<usize> {
        let messages = self.queue.receive().await?;
        let mut acknowledged = 0;

        for message in messages {
            let Some(body) = message.body() else { continue };
            let Some(receipt) = message.receipt_handle() else {
                continue;
            };

            let outcome = tokio::time::timeout(self.message_timeout, self.process(body)).await;
            match outcome {
                Ok(Ok(())) => {
                    self.queue.acknowledge(receipt).await?;
                    acknowledged += 1;
                }
                Ok(Err(error)) => {
                    tracing::error!(%error, "message failed, leaving for redelivery");
                }
                Err(_elapsed) => {
                    tracing::warn!("message exceeded its deadline, leaving for redelivery");
                }
            }
        }
        Ok(acknowledged)
    }

    /// Runs the consumption loop until the receive call fails hard.
    ///
    /// # Errors
    ///
    /// Returns the receive error that stopped the loop.
    pub async fn run(&self) -> Result<()> {
        loop {
            self.run_once().await?;
        }
    }

    async fn process(&self, body: &str) -> Result<()> {
        // Control messages share the queue with event notifications.
        if let Some(request) = decode_control(body) {
            let (records, summary) = self
                .crawler
                .crawl(&request.bucket, request.prefix.clone())
                .await?;
            for record in records {
                self.pipeline.dispatch(record).await?;
            }
            tracing::info!(
                bucket = request.bucket,
                n_objects = summary.n_objects,
                "crawl control message processed"
            );
            return Ok(());
        }

        let batch = decode_message(body);
        if batch.events.is_empty() {
            return Ok(());
        }
        let span = ingest_span("queue", batch.events.len());

        async {
            let enriched = self.enricher.enrich_all(batch.events).await;
            let summary = self.ingester.ingest(enriched).await?;
            // Tag writes are post-commit on purpose: they are retried
            // independently and never hold up the acknowledgement.
            self.move_tracker.apply_minted(&summary.minted).await;
            Ok(())
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_hash_is_stable_per_key() {
        let hash = |bucket: &str, key: &str| {
            let mut hasher = DefaultHasher::new();
            (&bucket.to_string(), &key.to_string()).hash(&mut hasher);
            hasher.finish() % 8
        };
        assert_eq!(hash("b", "k"), hash("b", "k"));
    }
}
