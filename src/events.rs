//! Event dispatch queue contract for handing timed-out runs to the handler.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{OrgId, RunId};

/// Queue consumed by the downstream event handler workers.
pub const HANDLER_QUEUE: &str = "handler";
/// Task type understood by the downstream event handler workers.
pub const HANDLE_EVENT_TASK: &str = "handle_event";

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type QueueResult<T> = Result<T, QueueError>;

/// Payload published for asynchronous run resumption.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// A live run sat past its timeout deadline.
    Timeout {
        run: RunId,
        timeout_on: DateTime<Utc>,
    },
}

/// External event dispatch queue, addressed by owning org.
///
/// Consumers must be idempotent on repeated delivery of the same run id: the
/// timeout sweeper republishes a run on every sweep until the downstream
/// handler clears or advances its deadline.
#[async_trait]
pub trait EventQueue: Send + Sync {
    async fn push(
        &self,
        org: OrgId,
        queue: &str,
        task_type: &str,
        payload: &EventPayload,
    ) -> QueueResult<()>;
}

/// One task accepted by the in-memory queue.
#[derive(Clone, Debug)]
pub struct PushedEvent {
    pub org: OrgId,
    pub queue: String,
    pub task_type: String,
    pub payload: EventPayload,
}

/// Queue that records pushes in memory for tests or local runs.
#[derive(Clone, Default)]
pub struct MemoryEventQueue {
    pushed: Arc<Mutex<Vec<PushedEvent>>>,
}

impl MemoryEventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pushed(&self) -> Vec<PushedEvent> {
        self.pushed.lock().expect("pushed events poisoned").clone()
    }
}

#[async_trait]
impl EventQueue for MemoryEventQueue {
    async fn push(
        &self,
        org: OrgId,
        queue: &str,
        task_type: &str,
        payload: &EventPayload,
    ) -> QueueResult<()> {
        let mut pushed = self.pushed.lock().expect("pushed events poisoned");
        pushed.push(PushedEvent {
            org,
            queue: queue.to_string(),
            task_type: task_type.to_string(),
            payload: payload.clone(),
        });
        Ok(())
    }
}
