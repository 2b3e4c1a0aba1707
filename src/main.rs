// src/main.rs
//! Keystore CLI entry point.
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use wallet_keystore::cli::{self, Cli};
use wallet_keystore::keystore::Keystore;
use wallet_keystore::storage::SqliteStorage;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_logging()?;

    let config = args.load_config().context("failed to load configuration")?;
    info!("Starting keystore-cli v{}", env!("CARGO_PKG_VERSION"));

    let storage = SqliteStorage::new_with_url(&config.storage.database_url)
        .await
        .context("failed to open keystore database")?;
    let keystore = Keystore::new(Arc::new(storage), config);

    let output = cli::run(args.command, &keystore).await?;
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,sqlx=warn"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
