use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

pub type Result<T> = std::result::Result<T, StreamError>;

/// Converts a duration to whole microseconds, clamped to `u64::MAX`.
#[inline]
pub fn duration_to_us(duration: Duration) -> u64 {
    duration.as_micros().min(u64::MAX as u128) as u64
}

/// Lifecycle state of a request in the request graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    /// Created but not yet picked up by any stage.
    Pending,
    /// Waiting in a stage's queue.
    Queued,
    /// Work for the request is in flight.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with an error. Terminal; nothing in the stack retries.
    Failed,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Byte range inside a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRange {
    pub offset: u64,
    pub size: u64,
}

impl FileRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Exclusive end of the range, `None` on overflow.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(self.size)
    }
}
