//! Sync execution defaults.

use serde::{Deserialize, Serialize};

const fn default_batch_size() -> usize {
    1000
}

const fn default_query_timeout_seconds() -> u64 {
    30
}

const fn default_max_rows() -> usize {
    10_000
}

const fn default_parallel_workers() -> usize {
    1
}

const fn default_execution_timeout_seconds() -> u64 {
    3600
}

/// Capacity of the progress channel handed to callers.
const fn default_progress_buffer() -> usize {
    64
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_query_timeout_seconds")]
    pub query_timeout_seconds: u64,

    #[serde(default = "default_max_rows")]
    pub max_rows: usize,

    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,

    #[serde(default = "default_execution_timeout_seconds")]
    pub execution_timeout_seconds: u64,

    #[serde(default = "default_progress_buffer")]
    pub progress_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            query_timeout_seconds: default_query_timeout_seconds(),
            max_rows: default_max_rows(),
            parallel_workers: default_parallel_workers(),
            execution_timeout_seconds: default_execution_timeout_seconds(),
            progress_buffer: default_progress_buffer(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_correct() {
        let config = SyncConfig::default();
        assert_eq!(config.batch_size, 1000);
        assert_eq!(config.query_timeout_seconds, 30);
        assert_eq!(config.max_rows, 10_000);
        assert_eq!(config.parallel_workers, 1);
        assert_eq!(config.execution_timeout_seconds, 3600);
        assert_eq!(config.progress_buffer, 64);
    }
}
