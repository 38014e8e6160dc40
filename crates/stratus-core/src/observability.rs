//! Logging and metrics plumbing.
//!
//! Structured logging with consistent spans across the pipeline, plus the
//! counter names every component records against.

use std::sync::Once;

use metrics::describe_counter;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Safe to call multiple times; subsequent calls are no-ops. The filter
/// comes from `RUST_LOG`, falling back to the given level and then `info`.
pub fn init_logging(format: LogFormat, fallback_level: Option<&str>) {
    INIT.call_once(|| {
        let fallback = fallback_level.unwrap_or("info").to_string();
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

        match format {
            LogFormat::Json => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().json())
                    .init();
            }
            LogFormat::Pretty => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(fmt::layer().pretty())
                    .init();
            }
        }
    });
}

/// Events accepted into the event log.
pub const EVENTS_INGESTED: &str = "stratus_events_ingested_total";

/// Deliveries that matched an existing dedup key.
pub const EVENTS_DUPLICATE: &str = "stratus_events_duplicate_total";

/// Events that arrived behind an already-known later event.
pub const EVENTS_REORDERED: &str = "stratus_events_reordered_total";

/// Records dropped because they could not be decoded.
pub const RECORDS_MALFORMED: &str = "stratus_records_malformed_total";

/// Metadata lookups that exhausted their retry budget.
pub const ENRICHMENT_FAILED: &str = "stratus_enrichment_failed_total";

/// Lineage tag writes that failed and were left for reconciliation.
pub const LINEAGE_TAG_DEFERRED: &str = "stratus_lineage_tag_deferred_total";

/// Rows read from inventory data files.
pub const INVENTORY_ROWS: &str = "stratus_inventory_rows_total";

/// Inventory data files skipped for failed checksum verification.
pub const INVENTORY_FILES_SKIPPED: &str = "stratus_inventory_files_skipped_total";

/// Objects emitted by crawl operations.
pub const CRAWL_OBJECTS: &str = "stratus_crawl_objects_total";

/// Registers descriptions for all engine counters.
///
/// Call once at startup after installing the metrics recorder.
pub fn describe_counters() {
    describe_counter!(EVENTS_INGESTED, "Events accepted into the event log");
    describe_counter!(EVENTS_DUPLICATE, "Deliveries matching an existing dedup key");
    describe_counter!(EVENTS_REORDERED, "Events arriving behind a later event");
    describe_counter!(RECORDS_MALFORMED, "Records dropped as undecodable");
    describe_counter!(ENRICHMENT_FAILED, "Metadata lookups that gave up");
    describe_counter!(
        LINEAGE_TAG_DEFERRED,
        "Lineage tag writes deferred to reconciliation"
    );
    describe_counter!(INVENTORY_ROWS, "Rows read from inventory data files");
    describe_counter!(
        INVENTORY_FILES_SKIPPED,
        "Inventory files skipped on checksum mismatch"
    );
    describe_counter!(CRAWL_OBJECTS, "Objects emitted by crawl operations");
}

/// Span for one ingest batch.
#[must_use]
pub fn ingest_span(source: &str, records: usize) -> Span {
    tracing::info_span!("ingest", source = source, records = records)
}

/// Span for a crawl of one bucket prefix.
#[must_use]
pub fn crawl_span(bucket: &str, prefix: &str) -> Span {
    tracing::info_span!("crawl", bucket = bucket, prefix = prefix)
}

/// Span for one inventory data file.
#[must_use]
pub fn inventory_span(bucket: &str, file: &str) -> Span {
    tracing::info_span!("inventory", bucket = bucket, file = file)
}
