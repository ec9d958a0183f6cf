//! Configuration for the event admin.

use crate::dispatcher::WorkerKeyStrategy;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the event admin
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventAdminConfig {
    /// Time limit for a single handler invocation, in milliseconds.
    /// Handlers exceeding it are blacklisted. `0` disables supervision.
    pub per_handler_timeout_ms: u64,

    /// How asynchronous publishers are mapped onto delivery queues
    pub worker_key_strategy: WorkerKeyStrategy,

    /// Maximum pending events per delivery queue
    pub queue_capacity: usize,

    /// Drop events when a queue is full instead of failing the publish
    pub drop_on_full: bool,

    /// Skip handlers subscribed after the event was created
    pub require_in_time: bool,

    /// How long shutdown waits for queue workers, in milliseconds
    pub shutdown_timeout_ms: u64,
}

impl Default for EventAdminConfig {
    fn default() -> Self {
        Self {
            per_handler_timeout_ms: 5_000,
            worker_key_strategy: WorkerKeyStrategy::default(),
            queue_capacity: 10_000,
            drop_on_full: false,
            require_in_time: false,
            shutdown_timeout_ms: 30_000,
        }
    }
}

impl EventAdminConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON; absent fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::ConfigError(format!("invalid configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the admin cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(Error::ConfigError("queue_capacity must be at least 1".into()));
        }
        if let WorkerKeyStrategy::Hashed { workers: 0 } = self.worker_key_strategy {
            return Err(Error::ConfigError("hashed strategy needs at least 1 worker".into()));
        }
        Ok(())
    }

    /// Set the per-handler timeout; `Duration::ZERO` disables it.
    /// Sub-millisecond values round up to one millisecond.
    pub fn per_handler_timeout(mut self, timeout: Duration) -> Self {
        self.per_handler_timeout_ms = millis_ceil(timeout);
        self
    }

    /// Set the worker key strategy
    pub fn worker_key_strategy(mut self, strategy: WorkerKeyStrategy) -> Self {
        self.worker_key_strategy = strategy;
        self
    }

    /// Set the per-queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Drop events on full queues
    pub fn drop_on_full(mut self, drop: bool) -> Self {
        self.drop_on_full = drop;
        self
    }

    /// Skip handlers that subscribed after the event was created
    pub fn require_in_time(mut self, require: bool) -> Self {
        self.require_in_time = require;
        self
    }

    /// Set shutdown timeout
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = millis_ceil(timeout);
        self
    }

    /// The per-handler time limit, if supervision is enabled
    pub fn handler_timeout(&self) -> Option<Duration> {
        (self.per_handler_timeout_ms > 0).then(|| Duration::from_millis(self.per_handler_timeout_ms))
    }

    /// How long shutdown waits for workers
    pub fn shutdown_wait(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// Whole milliseconds, rounded up so a non-zero duration never becomes 0
fn millis_ceil(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos().div_ceil(1_000_000)).unwrap_or(u64::MAX)
}

/// Preset configurations for common use cases
impl EventAdminConfig {
    /// Single queue for every publisher: one global delivery order
    pub fn ordered() -> Self {
        Self::default().worker_key_strategy(WorkerKeyStrategy::Shared)
    }

    /// Publishers hashed onto one queue per CPU, with deeper queues
    pub fn pooled() -> Self {
        Self::default()
            .worker_key_strategy(WorkerKeyStrategy::hashed())
            .queue_capacity(50_000)
    }

    /// No handler time limit; slow handlers are never blacklisted
    pub fn unsupervised() -> Self {
        Self::default().per_handler_timeout(Duration::ZERO)
    }

    /// Configuration for testing
    pub fn test() -> Self {
        Self::default()
            .per_handler_timeout(Duration::from_millis(1_000))
            .queue_capacity(100)
            .shutdown_timeout(Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EventAdminConfig::default();
        assert_eq!(config.handler_timeout(), Some(Duration::from_secs(5)));
        assert_eq!(
            config.worker_key_strategy,
            WorkerKeyStrategy::Hashed { workers: num_cpus::get().max(1) }
        );
        assert!(!config.require_in_time);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_sub_millisecond_timeout_stays_supervised() {
        let config = EventAdminConfig::default().per_handler_timeout(Duration::from_micros(500));
        assert_eq!(config.handler_timeout(), Some(Duration::from_millis(1)));

        let config = config.per_handler_timeout(Duration::from_nanos(1_000_001));
        assert_eq!(config.handler_timeout(), Some(Duration::from_millis(2)));

        let config = config.per_handler_timeout(Duration::ZERO);
        assert_eq!(config.handler_timeout(), None);

        let config = config.shutdown_timeout(Duration::from_micros(1));
        assert_eq!(config.shutdown_wait(), Duration::from_millis(1));

        let config = config.shutdown_timeout(Duration::MAX);
        assert_eq!(config.shutdown_timeout_ms, u64::MAX);
    }

    #[test]
    fn test_presets() {
        assert_eq!(EventAdminConfig::ordered().worker_key_strategy, WorkerKeyStrategy::Shared);
        assert!(matches!(
            EventAdminConfig::pooled().worker_key_strategy,
            WorkerKeyStrategy::Hashed { workers } if workers >= 1
        ));
        assert_eq!(EventAdminConfig::unsupervised().handler_timeout(), None);
        assert_eq!(EventAdminConfig::test().shutdown_wait(), Duration::from_secs(5));
    }

    #[test]
    fn test_from_json_partial() {
        let config = EventAdminConfig::from_json(
            r#"{"per_handler_timeout_ms": 250, "worker_key_strategy": {"type": "shared"}}"#,
        )
        .unwrap();
        assert_eq!(config.handler_timeout(), Some(Duration::from_millis(250)));
        assert_eq!(config.worker_key_strategy, WorkerKeyStrategy::Shared);
        assert_eq!(config.queue_capacity, 10_000);
    }

    #[test]
    fn test_from_json_rejects_invalid() {
        for json in [
            r#"{"queue_capacity": 0}"#,
            r#"{"worker_key_strategy": {"type": "hashed", "workers": 0}}"#,
            r#"{"per_handler_timeout_ms": "soon"}"#,
        ] {
            let err = EventAdminConfig::from_json(json).unwrap_err();
            assert!(matches!(err, Error::ConfigError(_)), "{json}");
        }
    }
}
