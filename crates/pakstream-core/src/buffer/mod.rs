pub mod aligned;
pub mod pool;

pub use aligned::{AlignedBuffer, OutputBuffer, align_down, align_up};
pub use pool::{BufferPool, PoolMetricsSnapshot, PooledBuffer};
