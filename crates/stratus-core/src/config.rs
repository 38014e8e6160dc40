//! Engine configuration.
//!
//! All options load from environment variables with sensible defaults; the
//! CLI layers its own flags on top via clap's `env` support. Only the
//! database endpoint is required.

use std::env;
use std::time::Duration;

use crate::error::{Error, Result};

/// Tag key under which the lineage identifier is stored on the object side.
pub const DEFAULT_LINEAGE_TAG_KEY: &str = "umccr-org:OrcaBusFileManagerIngestId";

/// Default number of enrichment attempts before degrading to NULL metadata.
pub const DEFAULT_MAX_ENRICHMENT_ATTEMPTS: u32 = 3;

/// Default per-call enrichment timeout.
pub const DEFAULT_ENRICHMENT_TIMEOUT_MS: u64 = 10_000;

/// Default number of records handed to the writer per transaction.
pub const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Default database connection pool size.
pub const DEFAULT_MAX_DB_CONNECTIONS: u32 = 10;

/// Runtime configuration for the engine.
#[derive(Debug, Clone)]
pub struct Config {
    /// Queue URL the event stream is consumed from.
    pub store_event_source_endpoint: Option<String>,
    /// Database connection string.
    pub db_endpoint: String,
    /// Database user, overriding any user in the connection string.
    pub db_user: Option<String>,
    /// Object tag key carrying the lineage identifier.
    pub tag_key_name: String,
    /// Bounded retry budget for metadata lookups.
    pub max_enrichment_attempts: u32,
    /// Per-call timeout for metadata lookups.
    pub enrichment_timeout: Duration,
    /// Records per ingest transaction.
    pub batch_size: usize,
    /// Log level filter, e.g. `info` or `stratus_flow=debug`.
    pub log_level: Option<String>,
    /// Maximum database pool connections.
    pub max_db_connections: u32,
}

impl Config {
    /// Loads configuration from `STRATUS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `STRATUS_DB_ENDPOINT` is missing or a numeric
    /// option fails to parse.
    pub fn from_env() -> Result<Self> {
        let db_endpoint = env::var("STRATUS_DB_ENDPOINT")
            .map_err(|_| Error::configuration("STRATUS_DB_ENDPOINT is required"))?;

        Ok(Self {
            store_event_source_endpoint: env::var("STRATUS_STORE_EVENT_SOURCE_ENDPOINT").ok(),
            db_endpoint,
            db_user: env::var("STRATUS_DB_USER").ok(),
            tag_key_name: env::var("STRATUS_TAG_KEY_NAME")
                .unwrap_or_else(|_| DEFAULT_LINEAGE_TAG_KEY.to_string()),
            max_enrichment_attempts: parse_var(
                "STRATUS_MAX_ENRICHMENT_ATTEMPTS",
                DEFAULT_MAX_ENRICHMENT_ATTEMPTS,
            )?,
            enrichment_timeout: Duration::from_millis(parse_var(
                "STRATUS_ENRICHMENT_TIMEOUT_MS",
                DEFAULT_ENRICHMENT_TIMEOUT_MS,
            )?),
            batch_size: parse_var("STRATUS_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            log_level: env::var("STRATUS_LOG_LEVEL").ok(),
            max_db_connections: parse_var(
                "STRATUS_MAX_DB_CONNECTIONS",
                DEFAULT_MAX_DB_CONNECTIONS,
            )?,
        })
    }

    /// Builds a configuration with defaults around the given database
    /// endpoint. Useful for tests and tools.
    #[must_use]
    pub fn for_endpoint(db_endpoint: impl Into<String>) -> Self {
        Self {
            store_event_source_endpoint: None,
            db_endpoint: db_endpoint.into(),
            db_user: None,
            tag_key_name: DEFAULT_LINEAGE_TAG_KEY.to_string(),
            max_enrichment_attempts: DEFAULT_MAX_ENRICHMENT_ATTEMPTS,
            enrichment_timeout: Duration::from_millis(DEFAULT_ENRICHMENT_TIMEOUT_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            log_level: None,
            max_db_connections: DEFAULT_MAX_DB_CONNECTIONS,
        }
    }

    /// The connection string with the configured user applied.
    #[must_use]
    pub fn database_url(&self) -> String {
        match &self.db_user {
            Some(user) => apply_user(&self.db_endpoint, user),
            None => self.db_endpoint.clone(),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::configuration(format!("{name}: {e}"))),
        Err(_) => Ok(default),
    }
}

/// Replaces (or inserts) the userinfo portion of a connection URL.
fn apply_user(endpoint: &str, user: &str) -> String {
    let Some((scheme, rest)) = endpoint.split_once("://") else {
        return endpoint.to_string();
    };
    let host_part = match rest.split_once('@') {
        Some((_, host)) => host,
        None => rest,
    };
    format!("{scheme}://{user}@{host_part}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_is_applied_to_endpoint() {
        assert_eq!(
            apply_user("postgresql://localhost:5432/stratus", "ingest"),
            "postgresql://ingest@localhost:5432/stratus"
        );
        assert_eq!(
            apply_user("postgresql://old@localhost/stratus", "ingest"),
            "postgresql://ingest@localhost/stratus"
        );
    }

    #[test]
    fn defaults_are_applied() {
        let config = Config::for_endpoint("postgresql://localhost/stratus");
        assert_eq!(config.tag_key_name, DEFAULT_LINEAGE_TAG_KEY);
        assert_eq!(config.max_enrichment_attempts, 3);
        assert_eq!(config.batch_size, 1_000);
    }
}
