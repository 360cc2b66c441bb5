use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Result, StreamError};

/// Construction-time bounds for [`FullFileDecompressor`](crate::FullFileDecompressor).
///
/// All three values are fixed for the lifetime of the stage. They are checked by
/// [`DecompressorConfig::validate`] so a bad setup fails before any request is
/// accepted rather than inside the scheduling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompressorConfig {
    /// Maximum number of raw (compressed) reads in flight at once.
    pub max_reads: usize,
    /// Maximum number of decompression jobs running at once.
    pub max_jobs: usize,
    /// Minimum read granularity of the underlying device, in bytes.
    pub alignment: u64,
}

impl Default for DecompressorConfig {
    fn default() -> Self {
        Self {
            max_reads: 2,
            max_jobs: 2,
            alignment: 4096,
        }
    }
}

impl DecompressorConfig {
    pub fn new(max_reads: usize, max_jobs: usize, alignment: u64) -> Self {
        Self {
            max_reads,
            max_jobs,
            alignment,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_reads == 0 {
            return Err(StreamError::InvalidConfig("max_reads must be at least 1"));
        }
        if self.max_jobs == 0 {
            return Err(StreamError::InvalidConfig("max_jobs must be at least 1"));
        }
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(StreamError::InvalidConfig(
                "alignment must be a non-zero power of two",
            ));
        }
        Ok(())
    }

    /// Number of decompression threads to spawn for this configuration.
    pub fn worker_count(&self) -> usize {
        let parallelism = std::thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1);
        self.max_jobs.min(parallelism).max(1)
    }
}

/// Knobs for the [`StreamScheduler`](crate::StreamScheduler) driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOptions {
    /// How long the scheduler sleeps waiting for a wake signal when no stage made progress.
    pub idle_wait: Duration,
    /// Minimum interval between completion-estimate passes.
    pub estimate_interval: Duration,
    /// Upper bound for the blocking convenience reads.
    pub request_timeout: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            idle_wait: Duration::from_millis(5),
            estimate_interval: Duration::from_millis(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}
