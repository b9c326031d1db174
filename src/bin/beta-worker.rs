//! # Beta Worker Server
//!
//! Runs the dispatch workers and the dead-letter consumer until Ctrl+C or
//! SIGTERM.
//!
//! ```bash
//! # Defaults: pgmq at postgresql://localhost:5432/beta_worker, simulated upstreams
//! cargo run --bin beta-worker
//!
//! # Everything in-process, no database
//! BETA_WORKER__SUBSTRATE=in_memory cargo run --bin beta-worker
//! ```

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use beta_worker::logging;
use beta_worker::worker::WorkerSystem;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %logging::get_environment(),
        build_mode = if cfg!(debug_assertions) { "debug" } else { "release" },
        "Starting beta worker"
    );

    let mut system = WorkerSystem::bootstrap()
        .await
        .context("failed to bootstrap worker")?;

    info!(
        config = %system.config().sanitized(),
        "Configuration loaded"
    );

    system.start();
    info!("Worker started, press Ctrl+C to shut down gracefully");

    shutdown_signal().await;

    info!("Shutdown signal received, waiting for in-flight tasks");
    match system.stop().await {
        Some(stats) => info!(stats = ?stats, "Worker stopped"),
        None => error!("Worker was not running at shutdown"),
    }

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
