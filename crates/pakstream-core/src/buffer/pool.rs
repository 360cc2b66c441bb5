use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError, bounded};

use crate::telemetry;
#[cfg(feature = "profiling")]
use crate::telemetry::profile;
use crate::telemetry::tags;
use crate::types::duration_to_us;

#[cfg(feature = "profiling")]
const PROFILE_TAG_STACK_BUFFER: [&str; 2] = [tags::TAG_SYSTEM, tags::TAG_BUFFER];

/// Allocator for raw-read and scratch buffers.
///
/// Buffers are handed out as [`PooledBuffer`]s sized exactly to the request and
/// zero-filled. Dropping a `PooledBuffer` is the only way to give memory back:
/// the backing `Vec` is recycled when the pool has room and freed otherwise.
/// The pool keeps an exact count of buffers and bytes currently handed out so
/// leaks and double releases show up in [`BufferPool::metrics`].
///
/// # Example
/// ```
/// use pakstream_core::BufferPool;
///
/// let pool = BufferPool::new(4096, 8);
/// let buffer = pool.acquire(100);
/// assert_eq!(buffer.len(), 100);
/// drop(buffer); // returns to pool automatically
/// assert_eq!(pool.metrics().outstanding, 0);
/// ```
#[derive(Debug)]
pub struct BufferPool {
    recycler: Sender<Vec<u8>>,
    receiver: Receiver<Vec<u8>>,
    default_capacity: usize,
    max_buffers: usize,
    metrics: Arc<PoolMetricsInner>,
}

impl BufferPool {
    /// Creates a new buffer pool.
    ///
    /// # Arguments
    /// * `default_capacity` - Minimum capacity for newly created buffers
    /// * `max_buffers` - Maximum number of released buffers kept for reuse
    pub fn new(default_capacity: usize, max_buffers: usize) -> Self {
        let (tx, rx) = bounded(max_buffers.max(1));
        Self {
            recycler: tx,
            receiver: rx,
            default_capacity,
            max_buffers,
            metrics: Arc::new(PoolMetricsInner::default()),
        }
    }

    /// Hands out a zero-filled buffer of exactly `len` bytes.
    pub fn acquire(&self, len: usize) -> PooledBuffer {
        let started_at = Instant::now();
        let (result, mut buffer) = match self.receiver.try_recv() {
            Ok(mut buffer) => {
                buffer.clear();
                self.metrics.recycled.fetch_add(1, Ordering::Relaxed);
                telemetry::increment_counter(
                    tags::METRIC_BUFFER_ACQUIRE_RECYCLED_COUNT,
                    1,
                    &[("subsystem", "buffer"), ("result", "recycled")],
                );
                ("recycled", buffer)
            }
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                self.metrics.created.fetch_add(1, Ordering::Relaxed);
                telemetry::increment_counter(
                    tags::METRIC_BUFFER_ACQUIRE_CREATED_COUNT,
                    1,
                    &[("subsystem", "buffer"), ("result", "created")],
                );
                ("created", Vec::with_capacity(self.default_capacity.max(len)))
            }
        };
        buffer.resize(len, 0);

        self.metrics.outstanding.fetch_add(1, Ordering::AcqRel);
        self.metrics
            .outstanding_bytes
            .fetch_add(len as u64, Ordering::AcqRel);
        telemetry::add_gauge(
            tags::METRIC_BUFFER_OUTSTANDING_BYTES,
            len as u64,
            &[("subsystem", "buffer"), ("op", "acquire")],
        );

        let elapsed_us = duration_to_us(started_at.elapsed());
        telemetry::record_histogram(
            tags::METRIC_BUFFER_ACQUIRE_LATENCY_US,
            elapsed_us,
            &[("subsystem", "buffer"), ("op", "acquire")],
        );
        #[cfg(not(feature = "profiling"))]
        let _ = result;
        #[cfg(feature = "profiling")]
        profile::event(
            tags::PROFILE_BUFFER,
            &PROFILE_TAG_STACK_BUFFER,
            "acquire",
            result,
            elapsed_us,
            "buffer acquire completed",
        );

        PooledBuffer {
            buffer,
            recycler: self.recycler.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }

    /// Returns a snapshot of the current pool metrics.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            created: self.metrics.created.load(Ordering::Relaxed),
            recycled: self.metrics.recycled.load(Ordering::Relaxed),
            dropped: self.metrics.dropped.load(Ordering::Relaxed),
            outstanding: self.metrics.outstanding.load(Ordering::Acquire),
            outstanding_bytes: self.metrics.outstanding_bytes.load(Ordering::Acquire),
        }
    }

    /// Bytes currently held by live buffers from this pool.
    pub fn outstanding_bytes(&self) -> u64 {
        self.metrics.outstanding_bytes.load(Ordering::Acquire)
    }

    pub fn default_capacity(&self) -> usize {
        self.default_capacity
    }

    pub fn max_buffers(&self) -> usize {
        self.max_buffers
    }
}

/// A snapshot of buffer pool metrics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolMetricsSnapshot {
    /// Number of buffers created by the pool
    pub created: usize,
    /// Number of acquisitions served from a recycled buffer
    pub recycled: usize,
    /// Number of released buffers freed because the pool was full
    pub dropped: usize,
    /// Buffers handed out and not yet released
    pub outstanding: usize,
    /// Bytes held by outstanding buffers
    pub outstanding_bytes: u64,
}

#[derive(Debug, Default)]
struct PoolMetricsInner {
    created: AtomicUsize,
    recycled: AtomicUsize,
    dropped: AtomicUsize,
    outstanding: AtomicUsize,
    outstanding_bytes: AtomicU64,
}

/// A buffer allocated from a [`BufferPool`].
///
/// Exclusively owned; moving it is the only way to hand it to another party.
/// Dropping it releases the memory back to the pool exactly once.
#[derive(Debug)]
pub struct PooledBuffer {
    buffer: Vec<u8>,
    recycler: Sender<Vec<u8>>,
    metrics: Arc<PoolMetricsInner>,
}

impl PooledBuffer {
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buffer = std::mem::take(&mut self.buffer);
        let len = buffer.len() as u64;

        self.metrics.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.metrics.outstanding_bytes.fetch_sub(len, Ordering::AcqRel);
        telemetry::sub_gauge_saturating(
            tags::METRIC_BUFFER_OUTSTANDING_BYTES,
            len,
            &[("subsystem", "buffer"), ("op", "release")],
        );

        let result = match self.recycler.try_send(buffer) {
            Ok(()) => "recycled",
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.metrics.dropped.fetch_add(1, Ordering::Relaxed);
                telemetry::increment_counter(
                    tags::METRIC_BUFFER_RECYCLE_DROPPED_COUNT,
                    1,
                    &[("subsystem", "buffer"), ("result", "dropped")],
                );
                "dropped"
            }
        };

        #[cfg(not(feature = "profiling"))]
        let _ = result;
        #[cfg(feature = "profiling")]
        if profile::is_tag_stack_enabled(&PROFILE_TAG_STACK_BUFFER) {
            tracing::debug!(
                target: tags::PROFILE_BUFFER,
                op = "release",
                result,
                buffer_len = len,
                tags = ?PROFILE_TAG_STACK_BUFFER,
                "buffer released"
            );
        }
    }
}
