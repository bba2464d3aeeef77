//! Process-level tunables (§2.1, §6), built and validated once at replica construction.
//!
//! Mirrors the shape of `async_raft::Config::build(..).validate()`: a plain builder with
//! `with_*` setters and a `validate` step that turns obviously-bad combinations into a
//! construction-time error rather than a runtime panic.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("snapshot_threshold_ratio must be in (0, 1], got {0}")]
    BadSnapshotThreshold(f64),
    #[error("snapshot_trigger_interval must be > 0")]
    BadSnapshotTriggerInterval,
}

/// Runtime tunables for one replica.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Name of this replica group, used when logging and when building peer server names.
    pub group_name: String,

    /// Negative disables snapshotting entirely.
    pub max_raft_state_bytes: f64,

    /// Fraction of `max_raft_state_bytes` at which a snapshot is triggered (§4.6). Default 0.9.
    pub snapshot_threshold_ratio: f64,

    /// Number of applied commands between snapshotter wake-up signals from the applier (§4.2
    /// step 2). Default 50.
    pub snapshot_trigger_interval: u64,

    /// Pause between retries of a stuck per-peer migration sender (§4.4). Default 50ms.
    pub retry_pause: Duration,

    /// Interval for the front-end's term-poll and for the config fetcher's passive tick (§4.5).
    /// Default 100ms.
    pub poll_interval: Duration,
}

impl RuntimeConfig {
    pub fn build(group_name: impl Into<String>) -> RuntimeConfigBuilder {
        RuntimeConfigBuilder {
            group_name: group_name.into(),
            max_raft_state_bytes: -1.0,
            snapshot_threshold_ratio: 0.9,
            snapshot_trigger_interval: 50,
            retry_pause: Duration::from_millis(50),
            poll_interval: Duration::from_millis(100),
        }
    }

    pub fn snapshotting_enabled(&self) -> bool {
        self.max_raft_state_bytes >= 0.0
    }
}

pub struct RuntimeConfigBuilder {
    group_name: String,
    max_raft_state_bytes: f64,
    snapshot_threshold_ratio: f64,
    snapshot_trigger_interval: u64,
    retry_pause: Duration,
    poll_interval: Duration,
}

impl RuntimeConfigBuilder {
    pub fn max_raft_state_bytes(mut self, v: f64) -> Self {
        self.max_raft_state_bytes = v;
        self
    }

    pub fn snapshot_threshold_ratio(mut self, v: f64) -> Self {
        self.snapshot_threshold_ratio = v;
        self
    }

    pub fn snapshot_trigger_interval(mut self, v: u64) -> Self {
        self.snapshot_trigger_interval = v;
        self
    }

    pub fn retry_pause(mut self, v: Duration) -> Self {
        self.retry_pause = v;
        self
    }

    pub fn poll_interval(mut self, v: Duration) -> Self {
        self.poll_interval = v;
        self
    }

    pub fn validate(self) -> Result<RuntimeConfig, ConfigError> {
        if self.snapshot_threshold_ratio <= 0.0 || self.snapshot_threshold_ratio > 1.0 {
            return Err(ConfigError::BadSnapshotThreshold(self.snapshot_threshold_ratio));
        }
        if self.snapshot_trigger_interval == 0 {
            return Err(ConfigError::BadSnapshotTriggerInterval);
        }
        Ok(RuntimeConfig {
            group_name: self.group_name,
            max_raft_state_bytes: self.max_raft_state_bytes,
            snapshot_threshold_ratio: self.snapshot_threshold_ratio,
            snapshot_trigger_interval: self.snapshot_trigger_interval,
            retry_pause: self.retry_pause,
            poll_interval: self.poll_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_build_validates() {
        let cfg = RuntimeConfig::build("group-1").validate().expect("default config should validate");
        assert!(!cfg.snapshotting_enabled());
        assert_eq!(cfg.snapshot_trigger_interval, 50);
    }

    #[test]
    fn rejects_bad_threshold() {
        let err = RuntimeConfig::build("group-1").snapshot_threshold_ratio(0.0).validate();
        assert!(err.is_err());
    }
}
