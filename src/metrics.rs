//! Shared counters for sweep activity and anomaly signaling.

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counters updated by the sweepers.
///
/// Cache mismatches are surfaced here as well as in the log stream so drift
/// can be alerted on without scraping error lines.
#[derive(Debug, Default)]
pub struct SweeperMetrics {
    runs_expired: AtomicU64,
    timeout_events_dispatched: AtomicU64,
    timeout_publish_failures: AtomicU64,
    counter_rows_squashed: AtomicU64,
    cache_mismatches: AtomicU64,
    cache_recomputes: AtomicU64,
}

/// Point-in-time copy of all counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub runs_expired: u64,
    pub timeout_events_dispatched: u64,
    pub timeout_publish_failures: u64,
    pub counter_rows_squashed: u64,
    pub cache_mismatches: u64,
    pub cache_recomputes: u64,
}

impl SweeperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add_runs_expired(&self, n: u64) {
        self.runs_expired.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_timeout_events_dispatched(&self, n: u64) {
        self.timeout_events_dispatched.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_timeout_publish_failures(&self, n: u64) {
        self.timeout_publish_failures.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_counter_rows_squashed(&self, n: u64) {
        self.counter_rows_squashed.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_cache_mismatches(&self, n: u64) {
        self.cache_mismatches.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn add_cache_recomputes(&self, n: u64) {
        self.cache_recomputes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_expired: self.runs_expired.load(Ordering::Relaxed),
            timeout_events_dispatched: self.timeout_events_dispatched.load(Ordering::Relaxed),
            timeout_publish_failures: self.timeout_publish_failures.load(Ordering::Relaxed),
            counter_rows_squashed: self.counter_rows_squashed.load(Ordering::Relaxed),
            cache_mismatches: self.cache_mismatches.load(Ordering::Relaxed),
            cache_recomputes: self.cache_recomputes.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_reflects_counter_updates() {
        let metrics = SweeperMetrics::new();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());

        metrics.add_runs_expired(3);
        metrics.add_cache_mismatches(1);
        metrics.add_cache_recomputes(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.runs_expired, 3);
        assert_eq!(snapshot.cache_mismatches, 1);
        assert_eq!(snapshot.cache_recomputes, 1);
        assert_eq!(snapshot.timeout_publish_failures, 0);
    }
}
