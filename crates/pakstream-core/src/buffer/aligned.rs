use std::sync::{Arc, Mutex, MutexGuard};

use crate::buffer::{BufferPool, PooledBuffer};
use crate::{Result, StreamError};

#[inline]
pub fn align_down(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

#[inline]
pub fn align_up(value: u64, alignment: u64) -> Option<u64> {
    debug_assert!(alignment.is_power_of_two());
    value
        .checked_add(alignment - 1)
        .map(|padded| padded & !(alignment - 1))
}

/// Raw-read buffer covering a sector-aligned window of a file.
///
/// Byte 0 of the buffer corresponds to file offset
/// `align_down(offset, alignment)`, so the requested payload starts
/// `alignment_offset` bytes in. The buffer is over-allocated up to the next
/// alignment boundary. Readers that can only issue aligned I/O read
/// [`aligned_file_offset`](Self::aligned_file_offset)`..+len()` straight into
/// it; anything else writes the payload into [`payload_mut`](Self::payload_mut).
#[derive(Debug)]
pub struct AlignedBuffer {
    storage: PooledBuffer,
    aligned_file_offset: u64,
    alignment_offset: usize,
    payload_len: usize,
}

impl AlignedBuffer {
    /// Allocates a buffer for the payload `[offset, offset + len)` of a file.
    pub fn for_range(pool: &BufferPool, offset: u64, len: u64, alignment: u64) -> Result<Self> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(StreamError::InvalidConfig(
                "alignment must be a non-zero power of two",
            ));
        }

        let aligned_file_offset = align_down(offset, alignment);
        let alignment_offset = offset - aligned_file_offset;
        let buffer_len = len
            .checked_add(alignment_offset)
            .and_then(|unaligned| align_up(unaligned, alignment))
            .and_then(|aligned| usize::try_from(aligned).ok())
            .ok_or_else(|| {
                StreamError::SlotAccounting(format!(
                    "read buffer for {len} bytes at offset {offset} does not fit in memory"
                ))
            })?;
        let payload_len = usize::try_from(len)
            .map_err(|_| StreamError::SlotAccounting(format!("payload of {len} bytes too large")))?;

        Ok(Self {
            storage: pool.acquire(buffer_len),
            aligned_file_offset,
            alignment_offset: alignment_offset as usize,
            payload_len,
        })
    }

    /// File offset that maps to byte 0 of the buffer.
    pub fn aligned_file_offset(&self) -> u64 {
        self.aligned_file_offset
    }

    /// Distance from the start of the buffer to the first payload byte.
    pub fn alignment_offset(&self) -> usize {
        self.alignment_offset
    }

    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Full buffer length, including alignment slack on both ends.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn payload(&self) -> &[u8] {
        &self.storage[self.alignment_offset..self.alignment_offset + self.payload_len]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        let start = self.alignment_offset;
        &mut self.storage[start..start + self.payload_len]
    }

    /// The whole aligned window.
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.storage.as_mut_slice()
    }
}

/// Caller-owned destination for a read.
///
/// Cloning shares the same storage. Synthetic requests carry clones so the
/// single worker that finishes the read can write into it; the caller reads it
/// once the original request has completed.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Vec<u8>>>,
}

impl OutputBuffer {
    /// Creates a zero-filled buffer of `len` bytes.
    pub fn with_len(len: usize) -> Self {
        Self::from_vec(vec![0; len])
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(data)),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs `f` with exclusive access to the buffer contents.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut guard = self.lock();
        f(guard.as_mut_slice())
    }

    /// Copies the current contents out.
    pub fn to_vec(&self) -> Vec<u8> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
