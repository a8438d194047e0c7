//! Configuration loading from environment variables.
//!
//! Uses the following environment variables:
//! - `FLOWSWEEP_EXPIRY_INTERVAL_MS`: expiry sweep interval (default: 60000)
//! - `FLOWSWEEP_TIMEOUT_INTERVAL_MS`: timeout sweep interval (default: 60000)
//! - `FLOWSWEEP_RECONCILE_INTERVAL_MS`: reconcile pass interval (default: 300000)
//! - `FLOWSWEEP_LOCK_TTL_SECS`: TTL on the sweep guard locks (default: 900)
//! - `FLOWSWEEP_LOCK_NAMESPACE`: prefix for guard lock names (default: flows)

use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::locks::LockNames;
use crate::sweepers::{ExpirySweeperConfig, ReconcilerConfig, TimeoutSweeperConfig};

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Expiry sweep interval.
    pub expiry_interval: Duration,

    /// Timeout sweep interval.
    pub timeout_interval: Duration,

    /// Reconcile pass interval.
    pub reconcile_interval: Duration,

    /// TTL bound on all sweep guard locks. Sweep intervals should stay well
    /// below this so a crashed holder cannot stall sweeps for long.
    pub lock_ttl: Duration,

    /// Namespace prefix for the guard lock names.
    pub lock_namespace: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Loads `.env` file if present, then reads from environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            expiry_interval: env_duration_ms("FLOWSWEEP_EXPIRY_INTERVAL_MS", 60_000)?,
            timeout_interval: env_duration_ms("FLOWSWEEP_TIMEOUT_INTERVAL_MS", 60_000)?,
            reconcile_interval: env_duration_ms("FLOWSWEEP_RECONCILE_INTERVAL_MS", 300_000)?,
            lock_ttl: env_duration_secs("FLOWSWEEP_LOCK_TTL_SECS", 900)?,
            lock_namespace: env::var("FLOWSWEEP_LOCK_NAMESPACE")
                .unwrap_or_else(|_| "flows".to_string()),
        })
    }

    /// Guard lock names under the configured namespace.
    pub fn lock_names(&self) -> LockNames {
        LockNames::namespaced(&self.lock_namespace)
    }

    pub fn expiry_sweeper(&self) -> ExpirySweeperConfig {
        ExpirySweeperConfig {
            interval: self.expiry_interval,
            lock_ttl: self.lock_ttl,
            lock_name: self.lock_names().check_flows,
        }
    }

    pub fn timeout_sweeper(&self) -> TimeoutSweeperConfig {
        TimeoutSweeperConfig {
            interval: self.timeout_interval,
            lock_ttl: self.lock_ttl,
            lock_name: self.lock_names().check_flow_timeouts,
        }
    }

    pub fn reconciler(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            interval: self.reconcile_interval,
            lock_ttl: self.lock_ttl,
            squash_lock_name: self.lock_names().squash_run_counts,
        }
    }
}

fn env_duration_ms(name: &str, default_ms: u64) -> Result<Duration> {
    match env::var(name) {
        Ok(raw) => {
            let ms: u64 = raw
                .parse()
                .with_context(|| format!("invalid {name}: {raw:?}"))?;
            Ok(Duration::from_millis(ms))
        }
        Err(_) => Ok(Duration::from_millis(default_ms)),
    }
}

fn env_duration_secs(name: &str, default_secs: u64) -> Result<Duration> {
    match env::var(name) {
        Ok(raw) => {
            let secs: u64 = raw
                .parse()
                .with_context(|| format!("invalid {name}: {raw:?}"))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_duration_falls_back_to_default_when_unset() {
        let value = env_duration_ms("FLOWSWEEP_TEST_UNSET_INTERVAL_MS", 1234).unwrap();
        assert_eq!(value, Duration::from_millis(1234));
    }

    #[test]
    fn env_duration_rejects_garbage() {
        env::set_var("FLOWSWEEP_TEST_BAD_INTERVAL_MS", "soon");
        let err = env_duration_ms("FLOWSWEEP_TEST_BAD_INTERVAL_MS", 1000).unwrap_err();
        assert!(err.to_string().contains("FLOWSWEEP_TEST_BAD_INTERVAL_MS"));
        env::remove_var("FLOWSWEEP_TEST_BAD_INTERVAL_MS");
    }

    #[test]
    fn sweeper_configs_use_namespaced_lock_names() {
        let config = Config {
            expiry_interval: Duration::from_secs(60),
            timeout_interval: Duration::from_secs(60),
            reconcile_interval: Duration::from_secs(300),
            lock_ttl: Duration::from_secs(900),
            lock_namespace: "campaigns".to_string(),
        };

        assert_eq!(config.expiry_sweeper().lock_name, "campaigns:check_flows");
        assert_eq!(
            config.timeout_sweeper().lock_name,
            "campaigns:check_flow_timeouts"
        );
        assert_eq!(
            config.reconciler().squash_lock_name,
            "campaigns:squash_run_counts"
        );
        assert_eq!(config.expiry_sweeper().lock_ttl, Duration::from_secs(900));
    }
}
