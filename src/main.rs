//! shedding-server: a load-shedding TCP server
//!
//! Serves a line-based request protocol with JSON responses:
//! - `GET /v1/api` simulates a computation and reports how long it took
//! - `GET /health` reports cumulative request totals
//!
//! Features:
//! - One task per admitted connection, with keep-alive
//! - Immediate 503 rejection once live workers exceed the ceiling
//! - Per-connection idle timeout
//! - Configuration via CLI arguments, environment or TOML file
//! - Optional log file alongside stderr

mod admission;
mod config;
mod handlers;
mod logging;
mod protocol;
mod router;
mod server;
mod session;
mod stats;

use config::Config;
use server::Server;
use tracing::{info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    logging::init(&config)?;

    info!(
        host = %config.host,
        port = config.port,
        max_workers = config.max_workers,
        timeout_secs = config.timeout.as_secs(),
        buffer_size = config.buffer_size,
        "Starting shedding-server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(config))?;

    info!("Server has completed");
    Ok(())
}

/// Bind, serve until Ctrl-C, then stop accepting.
async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let server = Server::bind(config).await?;
    info!(address = %server.local_addr()?, "Server listening");

    let handle = server.shutdown_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received");
                handle.shutdown();
            }
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
    });

    server.run().await?;
    Ok(())
}
