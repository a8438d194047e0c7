//! Background count reconciler.
//!
//! This task squashes incremental run counters into per-flow aggregates and
//! repairs cached runs-started stats that drifted from the authoritative
//! store. Checking for drift and repairing it are separate steps so that only
//! this periodic pass, never a fast-path reader, can trigger a recompute.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::backends::{BackendResult, RunCountBackend, RunStoreBackend, StatsCacheBackend};
use crate::locks::{LockNames, LockService};
use crate::metrics::SweeperMetrics;
use crate::model::{FlowId, StatKind};

/// Configuration for the count reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// How often to run a reconcile pass.
    pub interval: Duration,
    /// TTL on the squash overlap-guard lock.
    pub lock_ttl: Duration,
    /// Name of the squash overlap-guard lock.
    pub squash_lock_name: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            lock_ttl: Duration::from_secs(900),
            squash_lock_name: LockNames::default().squash_run_counts,
        }
    }
}

/// Background count reconciler task.
pub struct ReconcilerTask<B, L> {
    backend: B,
    locks: L,
    config: ReconcilerConfig,
    metrics: Arc<SweeperMetrics>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<B, L> ReconcilerTask<B, L>
where
    B: RunStoreBackend + RunCountBackend + StatsCacheBackend + Clone + Send + Sync + 'static,
    L: LockService + Clone + Send + Sync + 'static,
{
    pub fn new(
        backend: B,
        locks: L,
        config: ReconcilerConfig,
        metrics: Arc<SweeperMetrics>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            backend,
            locks,
            config,
            metrics,
            shutdown_rx,
        }
    }

    /// Run the reconciler loop.
    pub async fn run(mut self) {
        info!(
            interval_ms = self.config.interval.as_millis(),
            lock = %self.config.squash_lock_name,
            "count reconciler started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("count reconciler shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(err) = self.sweep().await {
                        error!(error = ?err, "reconcile pass failed");
                    }
                }
            }
        }
    }

    /// One full reconcile pass: squash counters, then check every flow's
    /// cached stat and repair the ones that drifted.
    pub async fn sweep(&self) -> BackendResult<()> {
        self.squash().await?;

        let stale = self.check_stats_accuracy().await?;
        for flow in stale {
            // One flow failing to recompute must not starve the rest.
            if let Err(err) = self.recompute_stats(flow).await {
                error!(flow = %flow, error = ?err, "failed to rebuild run stats cache");
            }
        }
        Ok(())
    }

    /// Collapse pending run-counter increments under the squash guard lock.
    pub async fn squash(&self) -> BackendResult<()> {
        if !self.locks.is_free(&self.config.squash_lock_name).await {
            debug!(
                lock = %self.config.squash_lock_name,
                "squash already running elsewhere; skipping"
            );
            return Ok(());
        }
        let _guard = self
            .locks
            .lock(&self.config.squash_lock_name, self.config.lock_ttl)
            .await;

        let summary = self.backend.squash_counts().await?;
        self.metrics
            .add_counter_rows_squashed(summary.rows_collapsed as u64);
        if summary.rows_collapsed > 0 {
            debug!(
                flows = summary.flows_squashed,
                rows = summary.rows_collapsed,
                "squashed run counters"
            );
        }
        Ok(())
    }

    /// Compare the cached runs-started stat against the authoritative count
    /// for every flow and return the flows whose cache has drifted.
    ///
    /// Drift is an anomaly under correct operation, so it is logged as an
    /// error and counted; the repair itself is a separate step.
    pub async fn check_stats_accuracy(&self) -> BackendResult<Vec<FlowId>> {
        let mut stale = Vec::new();
        for flow in self.backend.list_flows().await? {
            let cached = self
                .backend
                .get_cached_stat(flow, StatKind::RunsStarted)
                .await?
                .unwrap_or(0);
            let actual = self.backend.count_runs_started(flow).await?;
            if cached != actual {
                self.metrics.add_cache_mismatches(1);
                error!(
                    flow = %flow,
                    cached,
                    actual,
                    "run stats cache drifted from authoritative count; scheduling recompute"
                );
                stale.push(flow);
            }
        }
        Ok(stale)
    }

    /// Overwrite the cached stat from the authoritative count.
    ///
    /// The mismatch is re-checked right before the write, so a slow recompute
    /// does not clobber a cache that another writer already brought back in
    /// line.
    pub async fn recompute_stats(&self, flow: FlowId) -> BackendResult<()> {
        let cached = self
            .backend
            .get_cached_stat(flow, StatKind::RunsStarted)
            .await?
            .unwrap_or(0);
        let actual = self.backend.count_runs_started(flow).await?;
        if cached == actual {
            return Ok(());
        }

        self.backend
            .set_cached_stat(flow, StatKind::RunsStarted, actual)
            .await?;
        self.metrics.add_cache_recomputes(1);
        info!(flow = %flow, value = actual, "rebuilt run stats cache");
        Ok(())
    }
}

/// Convenience function to spawn a count reconciler task.
pub fn spawn_reconciler<B, L>(
    backend: B,
    locks: L,
    config: ReconcilerConfig,
    metrics: Arc<SweeperMetrics>,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>)
where
    B: RunStoreBackend + RunCountBackend + StatsCacheBackend + Clone + Send + Sync + 'static,
    L: LockService + Clone + Send + Sync + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = ReconcilerTask::new(backend, locks, config, metrics, shutdown_rx);
    let handle = tokio::spawn(task.run());
    (handle, shutdown_tx)
}
