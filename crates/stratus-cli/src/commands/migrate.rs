//! The `stratus migrate` command: apply database migrations.

use stratus_core::Config;
use stratus_store::Client;

/// Applies embedded migrations to the configured database.
///
/// # Errors
///
/// Returns an error if the connection or a migration fails.
pub async fn execute(config: &Config) -> anyhow::Result<()> {
    let client = Client::connect(config).await?;
    client.migrate().await?;
    println!("migrations applied");
    Ok(())
}
