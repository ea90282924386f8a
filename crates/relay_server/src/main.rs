//! Relay worker - main entry point
//!
//! A horizontally scalable connection-routing worker with configurable
//! routing policy and graceful shutdown handling.

use anyhow::Result;
use clap::Parser;
use std::time::Instant;
use tracing::info;

use relay_server::{
    config::{self, Args},
    logging, shutdown, RelayServer, ServerConfig,
};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let startup_start = Instant::now();

    let args = Args::parse();

    let config = config::load_config(&args)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))?;

    logging::setup_logging(&args, &config)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Starting relay worker");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {}", args.config.display());

    let server_config = ServerConfig::from_config(&config);
    info!("Worker id: {}", server_config.worker_id);
    info!("Listen address: {}", server_config.listen_addr);
    info!("Max connections: {}", server_config.max_connections);
    info!("Default instance prefix: {}", server_config.policy.default_instance);

    let server = RelayServer::start(server_config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start server: {}", e))?;

    let shutdown_receiver = shutdown::setup_shutdown_handler().await;

    info!("Startup complete in {:.2?}", startup_start.elapsed());

    // Block until a termination signal arrives.
    let _ = shutdown_receiver.await;

    server.shutdown().await;
    info!("Goodbye");
    Ok(())
}
