//! # stratus-core
//!
//! Core abstractions for the stratus object tracker.
//!
//! This crate provides the foundational types used across all components:
//!
//! - **Event Model**: The normalized [`event::FlatEvent`] record and the
//!   per-version ordering every other component relies on
//! - **Identifiers**: Strongly-typed IDs for events, objects and lineages
//! - **Store Clients**: Mockable wrappers over the object store and the
//!   event source queue
//! - **Error Types**: Shared error definitions and result types
//! - **Configuration & Observability**: Environment-driven config, tracing
//!   initialization and the engine's counter names
//!
//! ## Crate Boundary
//!
//! `stratus-core` is the only crate allowed to define shared primitives.
//! The persistence layer (`stratus-store`) and the pipeline
//! (`stratus-flow`) both build on the contracts defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod observability;
pub mod s3;
pub mod sequence;
pub mod sqs;

pub use config::Config;
pub use error::{Error, Result};
pub use event::{
    ArchiveStatus, EventOrder, EventType, FlatEvent, StorageClass, decode_key, default_version_id,
    is_accessible, quote_e_tag,
};
pub use id::{EventId, HistoricalObjectId, LineageId, ObjectId};
pub use observability::{LogFormat, init_logging};
