//! Configuration for pump behavior.

use seqio::{DEFAULT_BUFFER_SIZE, DEFAULT_CONCURRENCY};

/// Configuration shared by the bounded and drain pumps.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// Size of each read chunk in bytes.
    ///
    /// The bounded pump issues `ceil(count / chunk_size)` reads per call,
    /// each with a freshly allocated buffer of at most this size.
    ///
    /// Default: 16 KiB
    pub chunk_size: usize,

    /// Maximum number of reads in flight at once.
    ///
    /// Default: 8
    pub concurrency: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_BUFFER_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl PumpConfig {
    /// Sets the read chunk size.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets the in-flight read bound.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }
}
