//! In-memory backend for tests and single-node runs.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::base::{
    BackendError, BackendResult, RunCountBackend, RunStoreBackend, SquashSummary,
    StatsCacheBackend,
};
use crate::model::{ExitType, FlowId, FlowRun, RunId, RunRef, StatKind};

/// Per-flow counter state: one squashed aggregate plus pending increment rows.
#[derive(Clone, Debug, Default)]
struct CounterRows {
    squashed: i64,
    pending: Vec<i64>,
}

/// Backend that keeps all state in memory.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    runs: Arc<Mutex<HashMap<RunId, FlowRun>>>,
    flows: Arc<Mutex<HashSet<FlowId>>>,
    counts: Arc<Mutex<HashMap<FlowId, CounterRows>>>,
    // Integer-as-text values, mirroring the external cache store contract.
    stats_cache: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a run and register its flow.
    pub fn insert_run(&self, run: FlowRun) {
        self.flows.lock().expect("flows poisoned").insert(run.flow);
        self.runs
            .lock()
            .expect("runs poisoned")
            .insert(run.id, run);
    }

    pub fn run(&self, id: RunId) -> Option<FlowRun> {
        self.runs.lock().expect("runs poisoned").get(&id).cloned()
    }

    pub fn runs(&self) -> Vec<FlowRun> {
        self.runs
            .lock()
            .expect("runs poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// Number of unsquashed increment rows for a flow.
    pub fn pending_increment_rows(&self, flow: FlowId) -> usize {
        self.counts
            .lock()
            .expect("counts poisoned")
            .get(&flow)
            .map(|rows| rows.pending.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl RunStoreBackend for MemoryBackend {
    async fn select_due_for_expiry(&self, now: DateTime<Utc>) -> BackendResult<Vec<RunRef>> {
        let runs = self.runs.lock().expect("runs poisoned");
        Ok(runs
            .values()
            .filter(|run| run.is_active && run.expires_on.is_some_and(|at| at <= now))
            .map(|run| RunRef {
                id: run.id,
                org: run.org,
                timeout_on: run.timeout_on,
            })
            .collect())
    }

    async fn select_due_for_timeout(&self, now: DateTime<Utc>) -> BackendResult<Vec<RunRef>> {
        let runs = self.runs.lock().expect("runs poisoned");
        Ok(runs
            .values()
            .filter(|run| run.is_active && run.timeout_on.is_some_and(|at| at <= now))
            .map(|run| RunRef {
                id: run.id,
                org: run.org,
                timeout_on: run.timeout_on,
            })
            .collect())
    }

    async fn bulk_exit(
        &self,
        run_ids: &[RunId],
        exit_type: ExitType,
        now: DateTime<Utc>,
    ) -> BackendResult<usize> {
        let mut runs = self.runs.lock().expect("runs poisoned");
        let mut exited = 0;
        for id in run_ids {
            // Missing or already-exited runs are skipped; a deleted run or a
            // repeated sweep is not an error.
            if let Some(run) = runs.get_mut(id) {
                if run.is_active {
                    run.is_active = false;
                    run.exit_type = Some(exit_type);
                    run.exited_on = Some(now);
                    exited += 1;
                }
            }
        }
        Ok(exited)
    }

    async fn count_runs_started(&self, flow: FlowId) -> BackendResult<i64> {
        let runs = self.runs.lock().expect("runs poisoned");
        Ok(runs
            .values()
            .filter(|run| run.flow == flow && !run.contact_is_test)
            .count() as i64)
    }

    async fn list_flows(&self) -> BackendResult<Vec<FlowId>> {
        let flows = self.flows.lock().expect("flows poisoned");
        Ok(flows.iter().copied().collect())
    }
}

#[async_trait]
impl RunCountBackend for MemoryBackend {
    async fn record_run_started(&self, flow: FlowId) -> BackendResult<()> {
        self.flows.lock().expect("flows poisoned").insert(flow);
        let mut counts = self.counts.lock().expect("counts poisoned");
        counts.entry(flow).or_default().pending.push(1);
        Ok(())
    }

    async fn squash_counts(&self) -> BackendResult<SquashSummary> {
        let flows: Vec<FlowId> = {
            let counts = self.counts.lock().expect("counts poisoned");
            counts.keys().copied().collect()
        };

        let mut summary = SquashSummary::default();
        for flow in flows {
            // Consume-and-add is atomic per flow; increments arriving after
            // this drain stay pending for the next pass.
            let mut counts = self.counts.lock().expect("counts poisoned");
            if let Some(rows) = counts.get_mut(&flow) {
                if rows.pending.is_empty() {
                    continue;
                }
                let collapsed = rows.pending.len();
                rows.squashed += rows.pending.drain(..).sum::<i64>();
                summary.flows_squashed += 1;
                summary.rows_collapsed += collapsed;
            }
        }
        Ok(summary)
    }

    async fn run_count(&self, flow: FlowId) -> BackendResult<i64> {
        let counts = self.counts.lock().expect("counts poisoned");
        Ok(counts
            .get(&flow)
            .map(|rows| rows.squashed + rows.pending.iter().sum::<i64>())
            .unwrap_or(0))
    }
}

#[async_trait]
impl StatsCacheBackend for MemoryBackend {
    async fn get_cached_stat(&self, flow: FlowId, kind: StatKind) -> BackendResult<Option<i64>> {
        let cache = self.stats_cache.lock().expect("stats cache poisoned");
        match cache.get(&kind.cache_key(flow)) {
            Some(text) => {
                let value = text.parse().map_err(|_| {
                    BackendError::Message(format!("bad cached stat value: {text:?}"))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn set_cached_stat(&self, flow: FlowId, kind: StatKind, value: i64) -> BackendResult<()> {
        let mut cache = self.stats_cache.lock().expect("stats cache poisoned");
        cache.insert(kind.cache_key(flow), value.to_string());
        Ok(())
    }
}
