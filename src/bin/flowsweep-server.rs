//! Main entry point for the flowsweep maintenance server.
//!
//! Runs all three sweepers with configuration from environment variables,
//! wired to the in-memory backend for single-node and development use.

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowsweep::{
    spawn_expiry_sweeper, spawn_reconciler, spawn_timeout_sweeper, Config, MemoryBackend,
    MemoryEventQueue, MemoryLockService, SweeperMetrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting flowsweep server");

    let config = Config::from_env()?;
    info!(?config, "Loaded configuration");

    let backend = MemoryBackend::new();
    let locks = MemoryLockService::new();
    let queue = MemoryEventQueue::new();
    let metrics = Arc::new(SweeperMetrics::new());

    let (expiry_handle, expiry_shutdown) = spawn_expiry_sweeper(
        backend.clone(),
        locks.clone(),
        config.expiry_sweeper(),
        Arc::clone(&metrics),
    );
    let (timeout_handle, timeout_shutdown) = spawn_timeout_sweeper(
        backend.clone(),
        queue,
        locks.clone(),
        config.timeout_sweeper(),
        Arc::clone(&metrics),
    );
    let (reconciler_handle, reconciler_shutdown) = spawn_reconciler(
        backend,
        locks,
        config.reconciler(),
        Arc::clone(&metrics),
    );

    info!("Flowsweep server started, press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    let _ = expiry_shutdown.send(true);
    let _ = timeout_shutdown.send(true);
    let _ = reconciler_shutdown.send(true);
    let _ = tokio::join!(expiry_handle, timeout_handle, reconciler_handle);

    info!(snapshot = ?metrics.snapshot(), "Final sweep counters");
    Ok(())
}
