use std::time::Duration;

use tracing::trace;

use crate::queue::DEFAULT_CAPACITY;

/// Largest queue capacity accepted from configuration
pub const MAX_QUEUE_CAPACITY: usize = 1 << 16;

/// Task queue configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct QueueConfig {
    /// Maximum number of pending tasks
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Log a warning when a task runs longer than this (milliseconds)
    #[serde(default)]
    pub alarm_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        QueueConfig {
            capacity: default_capacity(),
            alarm_ms: None,
        }
    }
}

impl QueueConfig {
    pub fn alarm(&self) -> Option<Duration> {
        self.alarm_ms.map(Duration::from_millis)
    }
}

/// Batching window configuration
#[derive(Debug, Clone, serde::Deserialize)]
pub struct BatchConfig {
    /// Periodic flush interval in milliseconds (0 disables the timer)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Soft threshold of buffered bytes that triggers a flush (0 disables it)
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// Upper bound for a single combined payload
    #[serde(default)]
    pub max_payload_bytes: Option<usize>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            interval_ms: default_interval_ms(),
            max_bytes: default_max_bytes(),
            max_payload_bytes: None,
        }
    }
}

impl BatchConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_max_bytes() -> usize {
    64 * 1024
}

#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Config {
    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub batch: BatchConfig,
}

impl Config {
    /// Reject settings the primitives cannot run with
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.queue.capacity == 0 {
            anyhow::bail!("queue capacity must be at least 1");
        }

        if self.queue.capacity > MAX_QUEUE_CAPACITY {
            anyhow::bail!(
                "queue capacity {} exceeds the maximum of {MAX_QUEUE_CAPACITY}",
                self.queue.capacity
            );
        }

        if self.batch.max_payload_bytes == Some(0) {
            anyhow::bail!("max_payload_bytes must be at least 1 when set");
        }

        Ok(())
    }

    /// Apply `RELAY_*` environment overrides on top of the file values
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(capacity) = crate::util::get_queue_capacity() {
            self.queue.capacity = capacity;
        }

        if let Some(interval_ms) = crate::util::get_batch_interval_ms() {
            self.batch.interval_ms = interval_ms;
        }

        if let Some(max_bytes) = crate::util::get_batch_max_bytes() {
            self.batch.max_bytes = max_bytes;
        }

        self
    }
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))?;

    config.validate()?;
    trace!("loaded config: {config:?}");

    Ok(config)
}
