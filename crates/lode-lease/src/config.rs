use std::time::Duration;

use serde::{Deserialize, Serialize};

use lode_store::LeaseDuration;

/// What to do when acquiring the lease fails with something other than
/// contention.
///
/// Some stores grant a lease and still report a timeout, leaving a lock that
/// nobody holds the token for. `BreakAndRetry` force-breaks the lease and
/// tries again. It only ever applies to timeouts and I/O failures; a lease
/// that is reported as held is waited for, never broken.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StuckLeasePolicy {
    #[default]
    BreakAndRetry,
    Surface,
}

/// Configuration for registry persistence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    /// Name of the registry document in the store.
    pub registry_path: String,
    /// Lease length in seconds; `-1` for infinite.
    pub lease_duration_secs: i64,
    /// Retries after the first failed acquisition.
    pub retry_limit: u32,
    /// Pause between contention retries, in milliseconds.
    pub retry_interval_ms: u64,
    pub stuck_lease_policy: StuckLeasePolicy,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            registry_path: "data/registry".into(),
            lease_duration_secs: 15,
            retry_limit: 60,
            retry_interval_ms: 1000,
            stuck_lease_policy: StuckLeasePolicy::default(),
        }
    }
}

impl LeaseConfig {
    pub fn lease_duration(&self) -> LeaseDuration {
        LeaseDuration::from_secs(self.lease_duration_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let c = LeaseConfig::default();
        assert_eq!(c.registry_path, "data/registry");
        assert_eq!(c.lease_duration(), LeaseDuration::Fixed(Duration::from_secs(15)));
        assert_eq!(c.retry_limit, 60);
        assert_eq!(c.retry_interval(), Duration::from_secs(1));
        assert_eq!(c.stuck_lease_policy, StuckLeasePolicy::BreakAndRetry);
    }
}
