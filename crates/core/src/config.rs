use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub logging: LoggingConfig,
}

/// Watcher and supervisor tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Pause between poll cycles.
    pub poll_interval_ms: u64,
    /// Upper bound on one `PriceFeed` call; exceeding it counts as unavailable.
    pub feed_timeout_ms: u64,
    /// Upper bound on one `OrderGateway` call; exceeding it counts as a gateway failure.
    pub gateway_timeout_ms: u64,
    /// Failed order attempts before a trigger is marked Failed.
    pub max_gateway_retries: u32,
    /// Consecutive unavailable polls before the user is notified.
    pub unavailable_warn_cycles: u32,
    /// Delay before a panicked watcher is restarted.
    pub restart_backoff_ms: u64,
    /// Capacity of the lifecycle event broadcast channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            feed_timeout_ms: 10_000,
            gateway_timeout_ms: 10_000,
            max_gateway_retries: 3,
            unavailable_warn_cycles: 10,
            restart_backoff_ms: 1_000,
            event_buffer: 256,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub const fn feed_timeout(&self) -> Duration {
        Duration::from_millis(self.feed_timeout_ms)
    }

    #[must_use]
    pub const fn gateway_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway_timeout_ms)
    }

    #[must_use]
    pub const fn restart_backoff(&self) -> Duration {
        Duration::from_millis(self.restart_backoff_ms)
    }

    /// Rejects settings the watchers cannot run with.
    ///
    /// # Errors
    /// Returns the first offending field and why.
    pub fn validate(&self) -> Result<(), String> {
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".to_string());
        }
        if self.feed_timeout_ms == 0 {
            return Err("feed_timeout_ms must be greater than 0".to_string());
        }
        if self.gateway_timeout_ms == 0 {
            return Err("gateway_timeout_ms must be greater than 0".to_string());
        }
        if self.max_gateway_retries == 0 {
            return Err("max_gateway_retries must be at least 1".to_string());
        }
        if self.event_buffer == 0 {
            return Err("event_buffer must be greater than 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one JSON record per trigger.
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/triggers"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}
