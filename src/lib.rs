//! Flowsweep - background maintenance for flow runs: expiry sweeping,
//! timeout dispatch, and run-count reconciliation.

pub mod backends;
pub mod config;
pub mod events;
pub mod locks;
pub mod metrics;
pub mod model;
pub mod sweepers;

pub use backends::{
    BackendError, BackendResult, MemoryBackend, RunCountBackend, RunStoreBackend, SquashSummary,
    StatsCacheBackend,
};
pub use config::Config;
pub use events::{
    EventPayload, EventQueue, MemoryEventQueue, PushedEvent, QueueError, QueueResult,
    HANDLER_QUEUE, HANDLE_EVENT_TASK,
};
pub use locks::{LockGuard, LockNames, LockService, MemoryLockService};
pub use metrics::{MetricsSnapshot, SweeperMetrics};
pub use model::{ExitType, FlowId, FlowRun, OrgId, RunId, RunRef, StatKind};
pub use sweepers::{
    spawn_expiry_sweeper, spawn_reconciler, spawn_timeout_sweeper, ExpirySweeper,
    ExpirySweeperConfig, ReconcilerConfig, ReconcilerTask, TimeoutSweeper, TimeoutSweeperConfig,
};
