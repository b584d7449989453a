//! Lakehouse Sink - Main Entry Point
//!
//! Loads stdin messages into lakehouse tables; stdout carries only state payloads.

use lakehouse_sink::{LakehouseSinkConfig, LakehouseSinkConnector};
use tokio::io::BufReader;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing; stdout is reserved for state messages
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("Starting Lakehouse Sink");

    // Load configuration
    let config = LakehouseSinkConfig::load()?;

    tracing::info!(
        "Configuration loaded successfully: storage_backend={:?}, batch_size_rows={:?}, flush_all_streams={}",
        config.staging.storage_backend,
        config.batch_size_rows,
        config.flush_all_streams
    );

    let mut connector = LakehouseSinkConnector::from_config(config).await?;

    connector.run(BufReader::new(tokio::io::stdin())).await?;

    tracing::info!(
        "Lakehouse Sink stopped after {} flush pass(es)",
        connector.flush_passes()
    );
    Ok(())
}
