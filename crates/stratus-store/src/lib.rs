//! # stratus-store
//!
//! Postgres persistence and state projection for the stratus object
//! tracker.
//!
//! The design splits persistence into a deterministic core and a thin SQL
//! shell:
//!
//! - [`projector`] derives every projected row - current state, closed
//!   records, metadata, accessibility inputs - as a pure function of the
//!   key-restricted event log
//! - [`ingester`] wraps one batch in one transaction: append events with
//!   deduplication, run the projection, apply the resulting row mutations
//! - [`annotations`] is the separate write path for caller-supplied
//!   attributes and checksums
//! - [`memory`] is an in-memory twin of the tables running the same
//!   projection, used by tests
//!
//! Schema lives in `migrations/` and is applied with [`Client::migrate`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod annotations;
pub mod client;
pub mod ingester;
pub mod memory;
pub mod projector;
pub mod prune;
pub mod rows;

pub use annotations::{AnnotationTarget, Annotations, merge_patch};
pub use client::{Client, PendingLineageTag};
pub use ingester::{IngestSummary, Ingester};
pub use memory::InMemoryStore;
pub use projector::{MintedLineage, ProjectionPlan, VersionState, project};
pub use prune::prune_events;
