//! Engine and worker configuration.

use serde::{Deserialize, Serialize};

/// Configuration for share process execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Items processed per batch, each batch in one transaction.
    pub batch_size: usize,
    /// A `Running` process not updated for this long is considered stalled.
    pub stale_after_ms: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            stale_after_ms: 5 * 60 * 1000,
        }
    }
}

/// Configuration for the background worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Maximum share processes running at once.
    pub concurrency: usize,
    /// Delay between queue polls when idle.
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval_ms: 250,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }
}
