mod app;
mod config;
mod error;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::app::FileWorker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let config = config::WorkerAppConfig::load().context("Failed to load config")?;
    info!(
        worker_id = %config.worker.id,
        max_concurrent = config.worker.max_concurrent_file_operations,
        "Starting file worker"
    );

    let worker = FileWorker::start(&config)
        .await
        .context("Failed to start file worker")?;

    let shutdown = CancellationToken::new();
    let engine = tokio::spawn(worker.run(shutdown.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, draining in-flight operations");
    shutdown.cancel();

    engine
        .await
        .context("File worker task panicked")?
        .context("File worker failed")?;
    Ok(())
}
