//! datafile-gateway — syncs binary data files from a logging device to a
//! datastore server.
//!
//! The device's files are downloaded with CRC verification, uploaded over
//! HTTP, and erased from the device only once the server confirms storage.
//! All sync state lives in filename suffixes inside the data directory, so
//! a crash at any point is repaired by re-reading the directory at startup.

#![warn(clippy::all)]

mod checksum;
mod cli;
mod config;
mod device;
mod download;
mod engine;
mod retry;
mod shutdown;
mod stats;
mod store;
mod upload;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use device::local::LocalDirectoryDevice;
use device::LoggingDevice;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_filter())),
        )
        .init();

    let config = config::Config::from_cli(cli)?;
    tracing::info!(
        server = %config.server_host,
        device = %config.device_nickname,
        data_directory = %config.data_directory.display(),
        "starting datafile-gateway"
    );

    let device: Arc<dyn LoggingDevice> =
        Arc::new(LocalDirectoryDevice::new(&config.device_directory));

    let shutdown_token = shutdown::install_signal_handler();

    let engine = engine::SyncEngine::new(&config, device)?;
    engine.run(shutdown_token).await?;

    tracing::info!("datafile-gateway stopped");
    Ok(())
}
