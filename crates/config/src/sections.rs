//! Configuration sections

use serde::{Deserialize, Serialize};
use std::time::Duration;
use strand_types::{LogFormat, ThreadPoolSizing};

/// Default thread pool sizing, applied to every pool key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_core_size")]
    pub core_size: usize,
    #[serde(default = "default_maximum_size")]
    pub maximum_size: usize,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default)]
    pub max_queue_size: usize, // 0 = synchronous hand-off
    #[serde(default = "default_queue_size_rejection_threshold")]
    pub queue_size_rejection_threshold: usize,
    #[serde(default)]
    pub allow_maximum_size_to_diverge_from_core_size: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            core_size: default_core_size(),
            maximum_size: default_maximum_size(),
            keep_alive_secs: default_keep_alive_secs(),
            max_queue_size: 0,
            queue_size_rejection_threshold: default_queue_size_rejection_threshold(),
            allow_maximum_size_to_diverge_from_core_size: false,
        }
    }
}

impl PoolConfig {
    /// Convert into the sizing handed to a concurrency strategy
    #[must_use]
    pub fn sizing(&self) -> ThreadPoolSizing {
        ThreadPoolSizing {
            core_size: self.core_size,
            maximum_size: self.maximum_size,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            max_queue_size: self.max_queue_size,
            queue_size_rejection_threshold: self.queue_size_rejection_threshold,
            allow_maximum_size_to_diverge_from_core_size: self
                .allow_maximum_size_to_diverge_from_core_size,
        }
    }

    /// Apply per-key overrides on top of these defaults
    #[must_use]
    pub fn overridden_by(&self, overrides: &PoolOverrides) -> Self {
        Self {
            core_size: overrides.core_size.unwrap_or(self.core_size),
            maximum_size: overrides.maximum_size.unwrap_or(self.maximum_size),
            keep_alive_secs: overrides.keep_alive_secs.unwrap_or(self.keep_alive_secs),
            max_queue_size: overrides.max_queue_size.unwrap_or(self.max_queue_size),
            queue_size_rejection_threshold: overrides
                .queue_size_rejection_threshold
                .unwrap_or(self.queue_size_rejection_threshold),
            allow_maximum_size_to_diverge_from_core_size: overrides
                .allow_maximum_size_to_diverge_from_core_size
                .unwrap_or(self.allow_maximum_size_to_diverge_from_core_size),
        }
    }
}

/// Per-key pool overrides; unset fields inherit from `[pool]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PoolOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_alive_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_queue_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size_rejection_threshold: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_maximum_size_to_diverge_from_core_size: Option<bool>,
}

/// Trace context propagation across thread pools
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracingConfig {
    #[serde(default = "default_tracing_enabled")]
    pub enabled: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Log output of the host process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Plain,
            filter: default_log_filter(),
        }
    }
}

// Default value functions for serde
fn default_core_size() -> usize {
    ThreadPoolSizing::DEFAULT_CORE_SIZE
}

fn default_maximum_size() -> usize {
    ThreadPoolSizing::DEFAULT_MAXIMUM_SIZE
}

fn default_keep_alive_secs() -> u64 {
    ThreadPoolSizing::DEFAULT_KEEP_ALIVE.as_secs()
}

fn default_queue_size_rejection_threshold() -> usize {
    ThreadPoolSizing::DEFAULT_QUEUE_SIZE_REJECTION_THRESHOLD
}

fn default_tracing_enabled() -> bool {
    true
}

fn default_log_filter() -> String {
    "warn,strand=info".to_string()
}
