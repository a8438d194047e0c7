//! Backend interfaces for run storage, counters, and the stats cache.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::model::{ExitType, FlowId, RunId, RunRef, StatKind};

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Summary of one squash pass over the run counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SquashSummary {
    pub flows_squashed: usize,
    pub rows_collapsed: usize,
}

/// Repository over flow-run records.
///
/// The selects materialize at call time: each returns a finite snapshot, and
/// a sweep that crashes partway simply leaves the unprocessed rows matched
/// for the next selection.
#[async_trait]
pub trait RunStoreBackend: Send + Sync {
    /// Live runs whose expiry deadline is at or before `now`.
    async fn select_due_for_expiry(&self, now: DateTime<Utc>) -> BackendResult<Vec<RunRef>>;

    /// Live runs whose timeout deadline is at or before `now`, projected to
    /// id, org, and the deadline itself.
    async fn select_due_for_timeout(&self, now: DateTime<Utc>) -> BackendResult<Vec<RunRef>>;

    /// Exit every listed run that is still live, in one logical operation.
    /// Runs already exited or no longer present are skipped, so re-running
    /// after a crash is safe. Returns how many runs actually transitioned.
    async fn bulk_exit(
        &self,
        runs: &[RunId],
        exit_type: ExitType,
        now: DateTime<Utc>,
    ) -> BackendResult<usize>;

    /// Authoritative runs-started count for a flow, excluding test contacts.
    async fn count_runs_started(&self, flow: FlowId) -> BackendResult<i64>;

    /// Distinct flows known to the store.
    async fn list_flows(&self) -> BackendResult<Vec<FlowId>>;
}

/// Append-only, periodically squashed per-flow run counters.
#[async_trait]
pub trait RunCountBackend: Send + Sync {
    /// Append one runs-started increment for `flow`.
    async fn record_run_started(&self, flow: FlowId) -> BackendResult<()>;

    /// Collapse pending increments into the per-flow aggregates. Consumes
    /// only rows read in the same atomic unit as the aggregate update, so
    /// increments landing mid-squash are neither lost nor double counted;
    /// they stay pending for the next pass.
    async fn squash_counts(&self) -> BackendResult<SquashSummary>;

    /// Squashed aggregate plus pending increments for `flow`.
    async fn run_count(&self, flow: FlowId) -> BackendResult<i64>;
}

/// Fast-path cached statistics keyed by (flow, stat kind).
///
/// Eventually consistent with the run store; last write wins, since values
/// are always recomputed from the authoritative source.
#[async_trait]
pub trait StatsCacheBackend: Send + Sync {
    async fn get_cached_stat(&self, flow: FlowId, kind: StatKind) -> BackendResult<Option<i64>>;

    async fn set_cached_stat(&self, flow: FlowId, kind: StatKind, value: i64) -> BackendResult<()>;
}
