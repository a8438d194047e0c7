//! Background run-expiry sweeper.
//!
//! This task periodically exits live runs whose expiry deadline has passed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::backends::{BackendResult, RunStoreBackend};
use crate::locks::{LockNames, LockService};
use crate::metrics::SweeperMetrics;
use crate::model::{ExitType, RunId};

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct ExpirySweeperConfig {
    /// How often to run an expiry sweep.
    pub interval: Duration,
    /// TTL on the overlap-guard lock.
    pub lock_ttl: Duration,
    /// Name of the overlap-guard lock.
    pub lock_name: String,
}

impl Default for ExpirySweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(900),
            lock_name: LockNames::default().check_flows,
        }
    }
}

/// Background run-expiry sweeper task.
pub struct ExpirySweeper<B, L> {
    backend: B,
    locks: L,
    config: ExpirySweeperConfig,
    metrics: Arc<SweeperMetrics>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<B, L> ExpirySweeper<B, L>
where
    B: RunStoreBackend + Clone + Send + Sync + 'static,
    L: LockService + Clone + Send + Sync + 'static,
{
    pub fn new(
        backend: B,
        locks: L,
        config: ExpirySweeperConfig,
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

    /// Run the expiry sweeper loop.
    pub async fn run(mut self) {
        info!(
            interval_ms = self.config.interval.as_millis(),
            lock = %self.config.lock_name,
            "expiry sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("expiry sweeper shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(err) = self.sweep().await {
                        error!(error = ?err, "expiry sweep failed");
                    }
                }
            }
        }
    }

    /// Exit all runs currently past their expiry deadline.
    ///
    /// Skips the whole pass when another process holds the guard lock; the
    /// matched runs stay eligible for the next sweep. The bulk exit itself is
    /// idempotent, so a crash mid-sweep or a brief overlap across a lock TTL
    /// boundary cannot double-transition a run.
    pub async fn sweep(&self) -> BackendResult<()> {
        if !self.locks.is_free(&self.config.lock_name).await {
            debug!(
                lock = %self.config.lock_name,
                "expiry sweep already running elsewhere; skipping"
            );
            return Ok(());
        }
        let _guard = self
            .locks
            .lock(&self.config.lock_name, self.config.lock_ttl)
            .await;

        let now = Utc::now();
        let due = self.backend.select_due_for_expiry(now).await?;
        if due.is_empty() {
            return Ok(());
        }

        debug!(count = due.len(), "found runs past their expiry deadline");

        let ids: Vec<RunId> = due.iter().map(|run| run.id).collect();
        let exited = self.backend.bulk_exit(&ids, ExitType::Expired, now).await?;
        self.metrics.add_runs_expired(exited as u64);

        if exited > 0 {
            info!(exited, "expired flow runs");
        }
        Ok(())
    }
}

/// Convenience function to spawn an expiry sweeper task.
pub fn spawn_expiry_sweeper<B, L>(
    backend: B,
    locks: L,
    config: ExpirySweeperConfig,
    metrics: Arc<SweeperMetrics>,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>)
where
    B: RunStoreBackend + Clone + Send + Sync + 'static,
    L: LockService + Clone + Send + Sync + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = ExpirySweeper::new(backend, locks, config, metrics, shutdown_rx);
    let handle = tokio::spawn(task.run());
    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::locks::MemoryLockService;
    use crate::model::{FlowId, OrgId, RunRef};

    /// Stub store that records the calls the sweeper makes.
    #[derive(Clone, Default)]
    struct StubRunStore {
        due: Arc<Mutex<Vec<RunRef>>>,
        observed_exits: Arc<Mutex<Vec<(Vec<RunId>, ExitType)>>>,
    }

    #[async_trait]
    impl RunStoreBackend for StubRunStore {
        async fn select_due_for_expiry(&self, _now: DateTime<Utc>) -> BackendResult<Vec<RunRef>> {
            Ok(self.due.lock().expect("due poisoned").clone())
        }

        async fn select_due_for_timeout(&self, _now: DateTime<Utc>) -> BackendResult<Vec<RunRef>> {
            Ok(Vec::new())
        }

        async fn bulk_exit(
            &self,
            runs: &[RunId],
            exit_type: ExitType,
            _now: DateTime<Utc>,
        ) -> BackendResult<usize> {
            self.observed_exits
                .lock()
                .expect("exits poisoned")
                .push((runs.to_vec(), exit_type));
            Ok(runs.len())
        }

        async fn count_runs_started(&self, _flow: FlowId) -> BackendResult<i64> {
            Ok(0)
        }

        async fn list_flows(&self) -> BackendResult<Vec<FlowId>> {
            Ok(Vec::new())
        }
    }

    fn sweeper(backend: StubRunStore, locks: MemoryLockService) -> ExpirySweeper<StubRunStore, MemoryLockService> {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        ExpirySweeper::new(
            backend,
            locks,
            ExpirySweeperConfig::default(),
            Arc::new(SweeperMetrics::new()),
            shutdown_rx,
        )
    }

    #[tokio::test]
    async fn sweep_bulk_exits_selected_runs_as_expired() {
        let backend = StubRunStore::default();
        let due: Vec<RunRef> = (0..3)
            .map(|_| RunRef {
                id: RunId::new(),
                org: OrgId::new(),
                timeout_on: None,
            })
            .collect();
        *backend.due.lock().unwrap() = due.clone();

        let task = sweeper(backend.clone(), MemoryLockService::new());
        task.sweep().await.expect("sweep");

        let exits = backend.observed_exits.lock().unwrap();
        assert_eq!(exits.len(), 1);
        let (ids, exit_type) = &exits[0];
        assert_eq!(*exit_type, ExitType::Expired);
        assert_eq!(ids.len(), 3);
        for run in &due {
            assert!(ids.contains(&run.id));
        }
        assert_eq!(task.metrics.snapshot().runs_expired, 3);
    }

    #[tokio::test]
    async fn sweep_with_nothing_due_never_touches_the_store() {
        let backend = StubRunStore::default();
        let task = sweeper(backend.clone(), MemoryLockService::new());

        task.sweep().await.expect("sweep");
        assert!(backend.observed_exits.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sweep_is_a_noop_while_another_holder_has_the_lock() {
        let backend = StubRunStore::default();
        *backend.due.lock().unwrap() = vec![RunRef {
            id: RunId::new(),
            org: OrgId::new(),
            timeout_on: None,
        }];

        let locks = MemoryLockService::new();
        let task = sweeper(backend.clone(), locks.clone());
        locks.hold_for_test(&task.config.lock_name, Duration::from_secs(60));

        task.sweep().await.expect("sweep");
        assert!(backend.observed_exits.lock().unwrap().is_empty());

        // Sweeper must not have left the foreign lock released.
        assert!(!locks.is_free(&task.config.lock_name).await);
    }
}
