//! Configuration for flocks and the fault-injection harness
//!
//! All tunables live in explicit typed structs with defaults, rather than
//! ad hoc option bags passed through the call stack.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Per-registry configuration shared by every flock it opens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlockConfig {
    /// Bounded wait after appending a `removeWriter` during leave; teardown
    /// proceeds best-effort once this elapses
    #[serde(with = "humantime_serde")]
    pub grace_period: Duration,

    /// How long a candidate waits for admission before pairing fails
    #[serde(with = "humantime_serde")]
    pub pairing_timeout: Duration,

    /// Interval at which a pending candidate re-sends its pairing request
    #[serde(with = "humantime_serde")]
    pub pairing_retry: Duration,

    /// Lifetime of a freshly issued invite
    #[serde(with = "humantime_serde")]
    pub invite_ttl: Duration,

    /// Anti-entropy tick: how often an online flock re-announces its frontier
    #[serde(with = "humantime_serde")]
    pub resync_interval: Duration,

    /// Poll interval while shutdown waits for in-flight persists
    #[serde(with = "humantime_serde")]
    pub close_poll_interval: Duration,

    /// Maximum number of shutdown polls before giving up the wait
    pub close_poll_budget: u32,

    /// Capacity of each flock's event broadcast channel
    pub event_capacity: usize,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            pairing_timeout: Duration::from_secs(10),
            pairing_retry: Duration::from_millis(500),
            invite_ttl: Duration::from_secs(60 * 60),
            resync_interval: Duration::from_secs(1),
            close_poll_interval: Duration::from_millis(50),
            close_poll_budget: 100,
            event_capacity: 64,
        }
    }
}

/// Fault-injection knobs (test-only harness)
///
/// Chaos is inert until [`crate::chaos::ChaosNet::enable`] is called, even
/// when `enabled` is set here; the flag records the intent so a harness can
/// be constructed ahead of time and switched on mid-test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosConfig {
    /// Whether `enable()` should be honored at all
    pub enabled: bool,

    /// Seed for the deterministic fault generator; always logged on enable
    pub seed: u64,

    /// Initial window after enable during which drop/partition chaos is
    /// suppressed so handshakes can complete
    #[serde(with = "humantime_serde")]
    pub grace: Duration,

    /// Maximum delay before a new connection is delivered to listeners
    #[serde(with = "humantime_serde")]
    pub max_connect_delay: Duration,

    /// Maximum delay injected per outbound message
    #[serde(with = "humantime_serde")]
    pub max_write_delay: Duration,

    /// Maximum delay injected per inbound message
    #[serde(with = "humantime_serde")]
    pub max_read_delay: Duration,

    /// Probability that an inbound message is dropped outright
    pub drop_probability: f64,

    /// Stall applied to a connection after a drop fires
    #[serde(with = "humantime_serde")]
    pub max_drop_delay: Duration,

    /// Per-tick probability that a registered flock is partitioned
    pub partition_probability: f64,

    /// Shortest partition interval
    #[serde(with = "humantime_serde")]
    pub min_partition: Duration,

    /// Longest partition interval
    #[serde(with = "humantime_serde")]
    pub max_partition: Duration,

    /// Scheduler tick for partition decisions
    #[serde(with = "humantime_serde")]
    pub tick: Duration,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            seed: 42,
            grace: Duration::from_secs(2),
            max_connect_delay: Duration::from_millis(100),
            max_write_delay: Duration::from_millis(20),
            max_read_delay: Duration::from_millis(20),
            drop_probability: 0.05,
            max_drop_delay: Duration::from_millis(50),
            partition_probability: 0.1,
            min_partition: Duration::from_millis(100),
            max_partition: Duration::from_millis(500),
            tick: Duration::from_millis(100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flock_config_defaults() {
        let config = FlockConfig::default();
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert!(config.close_poll_budget > 0);
        assert!(config.event_capacity > 0);
    }

    #[test]
    fn test_chaos_config_round_trip() {
        let config = ChaosConfig {
            seed: 7,
            drop_probability: 0.25,
            ..Default::default()
        };
        let encoded = serde_json::to_string(&config).unwrap();
        let decoded: ChaosConfig = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.seed, 7);
        assert_eq!(decoded.drop_probability, 0.25);
        assert_eq!(decoded.grace, config.grace);
    }

    #[test]
    fn test_chaos_disabled_by_default() {
        assert!(!ChaosConfig::default().enabled);
    }
}
