//! Named, TTL-bound locks used as cross-process overlap guards.
//!
//! The guard is advisory: a sweep started just as a prior holder's TTL lapses
//! may briefly overlap with it, so every guarded operation must stay
//! idempotent without the lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use uuid::Uuid;

/// Registry of the guard lock names a deployment uses.
///
/// Names are built from a configured namespace so two subsystems sharing one
/// lock service cannot collide on bare strings.
#[derive(Clone, Debug)]
pub struct LockNames {
    pub check_flows: String,
    pub check_flow_timeouts: String,
    pub squash_run_counts: String,
}

impl LockNames {
    pub fn namespaced(namespace: &str) -> Self {
        Self {
            check_flows: format!("{namespace}:check_flows"),
            check_flow_timeouts: format!("{namespace}:check_flow_timeouts"),
            squash_run_counts: format!("{namespace}:squash_run_counts"),
        }
    }
}

impl Default for LockNames {
    fn default() -> Self {
        Self::namespaced("flows")
    }
}

/// Scoped lock handle; releases the underlying lock when dropped.
///
/// A holder that crashes without dropping its guard is recovered by TTL
/// expiry on the service side.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl LockGuard {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard").finish()
    }
}

/// Distributed mutual exclusion with TTL-based crash recovery.
#[async_trait]
pub trait LockService: Send + Sync {
    /// Non-blocking probe: true when nobody currently holds `name`.
    async fn is_free(&self, name: &str) -> bool;

    /// Acquire `name`, waiting out the current holder's release or TTL
    /// expiry if necessary. The wait is bounded by the prior holder's TTL.
    async fn lock(&self, name: &str, ttl: Duration) -> LockGuard;
}

type LockTable = HashMap<String, (Uuid, Instant)>;

/// In-process lock service for tests and single-node runs.
#[derive(Clone, Default)]
pub struct MemoryLockService {
    table: Arc<Mutex<LockTable>>,
}

impl MemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant a foreign holder, as if another process owned the lock.
    pub fn hold_for_test(&self, name: &str, ttl: Duration) {
        let mut table = self.table.lock().expect("lock table poisoned");
        table.insert(name.to_string(), (Uuid::new_v4(), Instant::now() + ttl));
    }

    fn try_acquire(&self, name: &str, ttl: Duration) -> Option<Uuid> {
        let mut table = self.table.lock().expect("lock table poisoned");
        match table.get(name) {
            Some((_, expires_at)) if *expires_at > Instant::now() => None,
            _ => {
                let token = Uuid::new_v4();
                table.insert(name.to_string(), (token, Instant::now() + ttl));
                Some(token)
            }
        }
    }
}

#[async_trait]
impl LockService for MemoryLockService {
    async fn is_free(&self, name: &str) -> bool {
        let table = self.table.lock().expect("lock table poisoned");
        !matches!(table.get(name), Some((_, expires_at)) if *expires_at > Instant::now())
    }

    async fn lock(&self, name: &str, ttl: Duration) -> LockGuard {
        loop {
            if let Some(token) = self.try_acquire(name, ttl) {
                let table = Arc::clone(&self.table);
                let name = name.to_string();
                return LockGuard::new(move || {
                    let mut table = table.lock().expect("lock table poisoned");
                    // Only the token holder may release; a TTL takeover by
                    // another process must not be clobbered.
                    if matches!(table.get(&name), Some((held, _)) if *held == token) {
                        table.remove(&name);
                    }
                });
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}
