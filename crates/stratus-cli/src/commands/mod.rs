//! CLI command implementations.

pub mod crawl;
pub mod inventory;
pub mod migrate;
pub mod prune;
pub mod run;

use std::sync::Arc;

use stratus_core::Config;
use stratus_core::s3::Client as S3Client;
use stratus_flow::{Enricher, MoveTracker, Pipeline};
use stratus_store::{Client as StoreClient, Ingester};

/// Shared wiring for the ingestion commands.
pub(crate) struct Engine {
    pub s3: S3Client,
    pub ingester: Ingester,
    pub enricher: Arc<Enricher>,
    pub move_tracker: Arc<MoveTracker>,
}

impl Engine {
    pub(crate) async fn connect(config: &Config) -> anyhow::Result<Self> {
        let s3 = S3Client::with_defaults().await;
        let store = StoreClient::connect(config).await?;
        let ingester = Ingester::new(store.clone());
        let enricher = Arc::new(Enricher::new(s3.clone(), config));
        let move_tracker = Arc::new(MoveTracker::new(
            s3.clone(),
            store.clone(),
            config.tag_key_name.clone(),
        ));
        Ok(Self {
            s3,
            ingester,
            enricher,
            move_tracker,
        })
    }

    pub(crate) fn pipeline(&self, workers: usize, batch_size: usize) -> Pipeline {
        Pipeline::start(
            self.ingester.clone(),
            Arc::clone(&self.enricher),
            Arc::clone(&self.move_tracker),
            workers,
            batch_size,
        )
    }
}
