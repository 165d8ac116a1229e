use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Cluster configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Whether cluster scheduling is enabled.
    #[serde(default)]
    pub enabled: bool,

    /// Cluster id, the root of every store key.
    #[serde(default = "default_cluster_id")]
    pub id: String,

    /// Interval between heartbeats in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u64,

    /// Leader silence that triggers a new election, in milliseconds.
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_ms: u64,

    /// Settle time before the first heartbeat, in milliseconds.
    #[serde(default = "default_start_wait")]
    pub start_wait_ms: u64,

    /// Wait before voting and again before tallying, in milliseconds.
    #[serde(default = "default_vote_wait")]
    pub vote_wait_ms: u64,

    /// Lifetime of the election lock in seconds.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            id: default_cluster_id(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            sync_timeout_ms: default_sync_timeout(),
            start_wait_ms: default_start_wait(),
            vote_wait_ms: default_vote_wait(),
            lock_ttl_secs: default_lock_ttl(),
        }
    }
}

impl ClusterConfig {
    /// Timing values as durations.
    pub fn timings(&self) -> ClusterTimings {
        ClusterTimings {
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            sync_timeout: Duration::from_millis(self.sync_timeout_ms),
            start_wait: Duration::from_millis(self.start_wait_ms),
            vote_wait: Duration::from_millis(self.vote_wait_ms),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
        }
    }
}

fn default_cluster_id() -> String {
    "conclave".to_string()
}

fn default_heartbeat_interval() -> u64 {
    15_000
}

fn default_sync_timeout() -> u64 {
    180_000
}

fn default_start_wait() -> u64 {
    5_000
}

fn default_vote_wait() -> u64 {
    5_000
}

fn default_lock_ttl() -> u64 {
    30
}

/// Cluster timing values used by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterTimings {
    /// Heartbeat cadence.
    pub heartbeat_interval: Duration,
    /// Leader silence that triggers an election.
    pub sync_timeout: Duration,
    /// Settle time before the first heartbeat.
    pub start_wait: Duration,
    /// Wait before voting and before tallying.
    pub vote_wait: Duration,
    /// Election lock lifetime.
    pub lock_ttl: Duration,
}

impl Default for ClusterTimings {
    fn default() -> Self {
        ClusterConfig::default().timings()
    }
}
