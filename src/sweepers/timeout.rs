//! Background run-timeout sweeper.
//!
//! This task finds live runs past their timeout deadline and hands each one
//! to the event dispatch queue for resumption. Run state is never mutated
//! here; the downstream handler clears or advances the deadline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::backends::{BackendResult, RunStoreBackend};
use crate::events::{EventPayload, EventQueue, HANDLER_QUEUE, HANDLE_EVENT_TASK};
use crate::locks::{LockNames, LockService};
use crate::metrics::SweeperMetrics;

/// Configuration for the timeout sweeper.
#[derive(Debug, Clone)]
pub struct TimeoutSweeperConfig {
    /// How often to run a timeout sweep.
    pub interval: Duration,
    /// TTL on the overlap-guard lock.
    pub lock_ttl: Duration,
    /// Name of the overlap-guard lock.
    pub lock_name: String,
}

impl Default for TimeoutSweeperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(900),
            lock_name: LockNames::default().check_flow_timeouts,
        }
    }
}

/// Background run-timeout sweeper task.
pub struct TimeoutSweeper<B, Q, L> {
    backend: B,
    queue: Q,
    locks: L,
    config: TimeoutSweeperConfig,
    metrics: Arc<SweeperMetrics>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<B, Q, L> TimeoutSweeper<B, Q, L>
where
    B: RunStoreBackend + Clone + Send + Sync + 'static,
    Q: EventQueue + Clone + Send + Sync + 'static,
    L: LockService + Clone + Send + Sync + 'static,
{
    pub fn new(
        backend: B,
        queue: Q,
        locks: L,
        config: TimeoutSweeperConfig,
        metrics: Arc<SweeperMetrics>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            backend,
            queue,
            locks,
            config,
            metrics,
            shutdown_rx,
        }
    }

    /// Run the timeout sweeper loop.
    pub async fn run(mut self) {
        info!(
            interval_ms = self.config.interval.as_millis(),
            lock = %self.config.lock_name,
            "timeout sweeper started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("timeout sweeper shutting down");
                        break;
                    }
                }
                _ = tokio::time::sleep(self.config.interval) => {
                    if let Err(err) = self.sweep().await {
                        error!(error = ?err, "timeout sweep failed");
                    }
                }
            }
        }
    }

    /// Publish one timeout event for every run past its timeout deadline.
    ///
    /// A failed publish must not take down the batch: the run's deadline is
    /// unchanged, so it is re-selected and retried on the next sweep.
    pub async fn sweep(&self) -> BackendResult<()> {
        if !self.locks.is_free(&self.config.lock_name).await {
            debug!(
                lock = %self.config.lock_name,
                "timeout sweep already running elsewhere; skipping"
            );
            return Ok(());
        }
        let _guard = self
            .locks
            .lock(&self.config.lock_name, self.config.lock_ttl)
            .await;

        let now = Utc::now();
        let due = self.backend.select_due_for_timeout(now).await?;
        if due.is_empty() {
            return Ok(());
        }

        debug!(count = due.len(), "found runs past their timeout deadline");

        let mut dispatched = 0u64;
        for run in due {
            // The selection guarantees a deadline; a cleared one means the
            // run advanced between select and publish.
            let Some(timeout_on) = run.timeout_on else {
                continue;
            };
            let payload = EventPayload::Timeout {
                run: run.id,
                timeout_on,
            };
            match self
                .queue
                .push(run.org, HANDLER_QUEUE, HANDLE_EVENT_TASK, &payload)
                .await
            {
                Ok(()) => dispatched += 1,
                Err(err) => {
                    self.metrics.add_timeout_publish_failures(1);
                    error!(
                        run = %run.id,
                        org = %run.org,
                        error = ?err,
                        "failed to publish timeout event"
                    );
                }
            }
        }

        self.metrics.add_timeout_events_dispatched(dispatched);
        if dispatched > 0 {
            info!(dispatched, "dispatched run timeout events");
        }
        Ok(())
    }
}

/// Convenience function to spawn a timeout sweeper task.
pub fn spawn_timeout_sweeper<B, Q, L>(
    backend: B,
    queue: Q,
    locks: L,
    config: TimeoutSweeperConfig,
    metrics: Arc<SweeperMetrics>,
) -> (tokio::task::JoinHandle<()>, watch::Sender<bool>)
where
    B: RunStoreBackend + Clone + Send + Sync + 'static,
    Q: EventQueue + Clone + Send + Sync + 'static,
    L: LockService + Clone + Send + Sync + 'static,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = TimeoutSweeper::new(backend, queue, locks, config, metrics, shutdown_rx);
    let handle = tokio::spawn(task.run());
    (handle, shutdown_tx)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::events::MemoryEventQueue;
    use crate::locks::MemoryLockService;
    use crate::model::{ExitType, FlowId, OrgId, RunId, RunRef};

    #[derive(Clone, Default)]
    struct StubRunStore {
        due: Arc<Mutex<Vec<RunRef>>>,
    }

    #[async_trait]
    impl RunStoreBackend for StubRunStore {
        async fn select_due_for_expiry(&self, _now: DateTime<Utc>) -> BackendResult<Vec<RunRef>> {
            Ok(Vec::new())
        }

        async fn select_due_for_timeout(&self, _now: DateTime<Utc>) -> BackendResult<Vec<RunRef>> {
            Ok(self.due.lock().expect("due poisoned").clone())
        }

        async fn bulk_exit(
            &self,
            _runs: &[RunId],
            _exit_type: ExitType,
            _now: DateTime<Utc>,
        ) -> BackendResult<usize> {
            panic!("timeout sweeper must not mutate run state");
        }

        async fn count_runs_started(&self, _flow: FlowId) -> BackendResult<i64> {
            Ok(0)
        }

        async fn list_flows(&self) -> BackendResult<Vec<FlowId>> {
            Ok(Vec::new())
        }
    }

    fn sweeper<Q>(
        backend: StubRunStore,
        queue: Q,
        locks: MemoryLockService,
    ) -> TimeoutSweeper<StubRunStore, Q, MemoryLockService>
    where
        Q: EventQueue + Clone + Send + Sync + 'static,
    {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        TimeoutSweeper::new(
            backend,
            queue,
            locks,
            TimeoutSweeperConfig::default(),
            Arc::new(SweeperMetrics::new()),
            shutdown_rx,
        )
    }

    #[tokio::test]
    async fn sweep_publishes_one_event_per_due_run() {
        let backend = StubRunStore::default();
        let timeout_on = Utc::now();
        let due: Vec<RunRef> = (0..2)
            .map(|_| RunRef {
                id: RunId::new(),
                org: OrgId::new(),
                timeout_on: Some(timeout_on),
            })
            .collect();
        *backend.due.lock().unwrap() = due.clone();

        let queue = MemoryEventQueue::new();
        let task = sweeper(backend, queue.clone(), MemoryLockService::new());
        task.sweep().await.expect("sweep");

        let pushed = queue.pushed();
        assert_eq!(pushed.len(), 2);
        for (event, run) in pushed.iter().zip(&due) {
            assert_eq!(event.org, run.org);
            assert_eq!(event.queue, HANDLER_QUEUE);
            assert_eq!(event.task_type, HANDLE_EVENT_TASK);
            assert_eq!(
                event.payload,
                EventPayload::Timeout {
                    run: run.id,
                    timeout_on
                }
            );
        }
        assert_eq!(task.metrics.snapshot().timeout_events_dispatched, 2);
    }

    #[tokio::test]
    async fn sweep_skips_runs_whose_deadline_cleared_mid_flight() {
        let backend = StubRunStore::default();
        *backend.due.lock().unwrap() = vec![RunRef {
            id: RunId::new(),
            org: OrgId::new(),
            timeout_on: None,
        }];

        let queue = MemoryEventQueue::new();
        let task = sweeper(backend, queue.clone(), MemoryLockService::new());
        task.sweep().await.expect("sweep");

        assert!(queue.pushed().is_empty());
    }

    #[tokio::test]
    async fn sweep_is_a_noop_while_another_holder_has_the_lock() {
        let backend = StubRunStore::default();
        *backend.due.lock().unwrap() = vec![RunRef {
            id: RunId::new(),
            org: OrgId::new(),
            timeout_on: Some(Utc::now()),
        }];

        let locks = MemoryLockService::new();
        let queue = MemoryEventQueue::new();
        let task = sweeper(backend, queue.clone(), locks.clone());
        locks.hold_for_test(&task.config.lock_name, Duration::from_secs(60));

        task.sweep().await.expect("sweep");
        assert!(queue.pushed().is_empty());
    }
}
