use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Buffer size used when pumping bytes between source, cache and client.
pub const DEFAULT_CHUNK_SIZE: usize = 8192;

/// Upper bound for one reader wait on fetch progress.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(1);

/// Background fetch failures tolerated before a blocked reader sees the
/// error.
pub const DEFAULT_MAX_SOURCE_READ_ATTEMPTS: u32 = 1;

/// Tuning knobs for a proxy cache engine instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyCacheConfig {
    /// Chunk size for fetch and response body loops.
    pub chunk_size: usize,

    /// How long a blocked reader waits for fetch progress before
    /// re-checking its window. A stalled fetch can delay a reader by at
    /// most this much per iteration.
    pub wait_timeout: Duration,

    /// Error-count threshold at which `read` surfaces the most recent
    /// background fetch failure.
    pub max_source_read_attempts: u32,
}

impl Default for ProxyCacheConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            wait_timeout: DEFAULT_WAIT_TIMEOUT,
            max_source_read_attempts: DEFAULT_MAX_SOURCE_READ_ATTEMPTS,
        }
    }
}

impl ProxyCacheConfig {
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_wait_timeout(mut self, wait_timeout: Duration) -> Self {
        self.wait_timeout = wait_timeout;
        self
    }

    pub fn with_max_source_read_attempts(mut self, attempts: u32) -> Self {
        self.max_source_read_attempts = attempts;
        self
    }
}
