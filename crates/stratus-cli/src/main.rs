//! The `stratus` binary entry point.

use anyhow::Result;
use clap::Parser;

use stratus_cli::{Cli, Commands};
use stratus_core::observability::{LogFormat, init_logging};

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.config()?;

    let format = if cli.json_logs {
        LogFormat::Json
    } else {
        LogFormat::Pretty
    };
    init_logging(format, config.log_level.as_deref());
    stratus_core::observability::describe_counters();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        match cli.command {
            Commands::Run(args) => stratus_cli::commands::run::execute(args, &config).await,
            Commands::Crawl(args) => stratus_cli::commands::crawl::execute(args, &config).await,
            Commands::Inventory(args) => {
                stratus_cli::commands::inventory::execute(args, &config).await
            }
            Commands::Migrate => stratus_cli::commands::migrate::execute(&config).await,
            Commands::Prune(args) => stratus_cli::commands::prune::execute(args, &config).await,
        }
    })
}
