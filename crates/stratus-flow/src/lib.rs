//! # stratus-flow
//!
//! The ingestion pipeline for the stratus object tracker.
//!
//! Raw notifications flow through a fixed sequence of stages:
//!
//! 1. [`decode`] - raw payloads become normalized [`stratus_core::FlatEvent`]s
//! 2. [`enrich`] - best-effort HEAD and tag lookups fill in storage class,
//!    archive state and any pre-existing lineage tag
//! 3. in-batch sequencing (`stratus_core::sequence`) - duplicates collapse,
//!    out-of-order arrivals are flagged
//! 4. the transactional writer (`stratus_store::Ingester`) persists the
//!    batch and projects current state
//! 5. [`lineage`] - minted lineage tags are written back after commit
//!
//! [`crawl`] and [`inventory`] inject synthetic records at stage 3; they
//! already carry their ordering metadata (none). [`pipeline`] wires the
//! stages together: a queue consumer for the event stream and a
//! worker-per-key-hash pool for bulk streams.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod crawl;
pub mod decode;
pub mod enrich;
pub mod inventory;
pub mod lineage;
pub mod pipeline;

pub use crawl::{CrawlSummary, Crawler};
pub use decode::{CrawlRequest, DecodedBatch, decode_control, decode_message};
pub use enrich::Enricher;
pub use inventory::{InventoryJobSummary, InventoryReader, Manifest};
pub use lineage::MoveTracker;
pub use pipeline::{Pipeline, QueueConsumer};
