//! # stratus-cli
//!
//! Command-line interface for the stratus object tracker.
//!
//! ## Commands
//!
//! - `stratus run` - Consume the event queue and ingest continuously
//! - `stratus crawl` - Walk a bucket prefix into the tracker
//! - `stratus inventory` - Ingest a bulk snapshot manifest
//! - `stratus migrate` - Apply database migrations
//!
//! ## Configuration
//!
//! Options come from `STRATUS_*` environment variables or flags:
//!
//! - `STRATUS_DB_ENDPOINT` - Database connection string (required)
//! - `STRATUS_STORE_EVENT_SOURCE_ENDPOINT` - Event queue URL
//! - `STRATUS_TAG_KEY_NAME` - Object tag key carrying the lineage ID

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI output goes to stdout intentionally
#![allow(clippy::print_stdout)]

pub mod commands;

use clap::{Parser, Subcommand};

use stratus_core::{Config, Result};

/// Stratus - object tracker command-line interface.
#[derive(Debug, Parser)]
#[command(name = "stratus")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Database connection string.
    #[arg(long, env = "STRATUS_DB_ENDPOINT")]
    pub db_endpoint: String,

    /// Database user overriding the connection string's.
    #[arg(long, env = "STRATUS_DB_USER")]
    pub db_user: Option<String>,

    /// Event queue URL.
    #[arg(long, env = "STRATUS_STORE_EVENT_SOURCE_ENDPOINT")]
    pub queue_url: Option<String>,

    /// Object tag key carrying the lineage identifier.
    #[arg(long, env = "STRATUS_TAG_KEY_NAME")]
    pub tag_key_name: Option<String>,

    /// Log level filter when RUST_LOG is not set.
    #[arg(long, env = "STRATUS_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit JSON logs instead of pretty ones.
    #[arg(long, default_value_t = false)]
    pub json_logs: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// The effective engine configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric environment option fails to parse.
    pub fn config(&self) -> Result<Config> {
        let mut config = Config::for_endpoint(self.db_endpoint.clone());
        config.db_user.clone_from(&self.db_user);
        config
            .store_event_source_endpoint
            .clone_from(&self.queue_url);
        if let Some(tag_key) = &self.tag_key_name {
            config.tag_key_name.clone_from(tag_key);
        }
        config.log_level.clone_from(&self.log_level);

        // Numeric tuning still comes from the environment.
        if let Ok(env_config) = Config::from_env() {
            config.max_enrichment_attempts = env_config.max_enrichment_attempts;
            config.enrichment_timeout = env_config.enrichment_timeout;
            config.batch_size = env_config.batch_size;
            config.max_db_connections = env_config.max_db_connections;
        }
        Ok(config)
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Consume the event queue and ingest continuously.
    Run(commands::run::RunArgs),
    /// Walk a bucket prefix into the tracker.
    Crawl(commands::crawl::CrawlArgs),
    /// Ingest a bulk snapshot manifest.
    Inventory(commands::inventory::InventoryArgs),
    /// Apply database migrations.
    Migrate,
    /// Trim the ephemeral event log.
    Prune(commands::prune::PruneArgs),
}
