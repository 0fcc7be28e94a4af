//! Quarry daemon - Main Entry Point
//! `QUARRY_ROLE=server` runs the control API and scheduler, `worker` runs queue workers

mod app;
mod config;
mod logging;

use anyhow::Result;
use config::{DaemonConfig, Role};
use quarry_core::application::shutdown_channel;
use std::time::Duration;
use tracing::info;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging first so configuration errors are reported
    let _log_guard = logging::init_logging()?;

    info!("Quarry v{} starting...", quarry_core::VERSION);

    // 2. Configuration
    let cfg = DaemonConfig::load()?;
    info!(role = ?cfg.role, mode = %cfg.mode, db_path = %cfg.db_path().display(), "Configuration loaded");

    // 3. Start the role
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let running = match cfg.role {
        Role::Server => app::run_server(&cfg, shutdown_rx).await?,
        Role::Worker => app::run_worker(&cfg, shutdown_rx).await?,
    };

    info!("Press Ctrl+C to shutdown");

    // 4. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 5. Graceful shutdown: in-flight jobs finish their current step, leases cover the rest
    shutdown_tx.shutdown();
    running.join(SHUTDOWN_GRACE).await;

    info!("Shutdown complete.");
    Ok(())
}
