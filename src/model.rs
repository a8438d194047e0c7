//! Core run model shared by the backends and sweepers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for one flow run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for a flow definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub Uuid);

impl FlowId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FlowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for the organization that owns a flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrgId(pub Uuid);

impl OrgId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OrgId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a run left its flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitType {
    Completed,
    Expired,
    Interrupted,
}

impl std::fmt::Display for ExitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Expired => write!(f, "expired"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// One execution instance of a flow for one contact.
///
/// A run is live while `is_active` is set; a live run carries at most one
/// pending expiry deadline and at most one pending timeout deadline.
#[derive(Clone, Debug, PartialEq)]
pub struct FlowRun {
    pub id: RunId,
    pub flow: FlowId,
    pub org: OrgId,
    /// Runs for test contacts are excluded from authoritative stats.
    pub contact_is_test: bool,
    pub is_active: bool,
    pub expires_on: Option<DateTime<Utc>>,
    pub timeout_on: Option<DateTime<Utc>>,
    pub exit_type: Option<ExitType>,
    pub exited_on: Option<DateTime<Utc>>,
}

impl FlowRun {
    pub fn new(flow: FlowId, org: OrgId) -> Self {
        Self {
            id: RunId::new(),
            flow,
            org,
            contact_is_test: false,
            is_active: true,
            expires_on: None,
            timeout_on: None,
            exit_type: None,
            exited_on: None,
        }
    }

    pub fn with_expires_on(mut self, at: DateTime<Utc>) -> Self {
        self.expires_on = Some(at);
        self
    }

    pub fn with_timeout_on(mut self, at: DateTime<Utc>) -> Self {
        self.timeout_on = Some(at);
        self
    }

    pub fn for_test_contact(mut self) -> Self {
        self.contact_is_test = true;
        self
    }
}

/// Slim projection of a run due for maintenance work, materialized at
/// selection time so sweeps iterate a finite snapshot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RunRef {
    pub id: RunId,
    pub org: OrgId,
    pub timeout_on: Option<DateTime<Utc>>,
}

/// Statistics kinds held in the fast-path cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StatKind {
    RunsStarted,
}

impl StatKind {
    /// Cache key for this stat on the given flow, one key per (flow, kind).
    pub fn cache_key(self, flow: FlowId) -> String {
        match self {
            Self::RunsStarted => format!("{flow}:runs_started_count"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_type_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&ExitType::Expired).unwrap(),
            "\"expired\""
        );
        assert_eq!(ExitType::Interrupted.to_string(), "interrupted");
    }

    #[test]
    fn stats_cache_key_is_per_flow() {
        let flow = FlowId::new();
        let key = StatKind::RunsStarted.cache_key(flow);
        assert_eq!(key, format!("{flow}:runs_started_count"));
    }

    #[test]
    fn new_run_is_live_with_no_deadlines() {
        let run = FlowRun::new(FlowId::new(), OrgId::new());
        assert!(run.is_active);
        assert!(run.expires_on.is_none());
        assert!(run.timeout_on.is_none());
        assert!(run.exit_type.is_none());
    }
}
