use crate::buffer::AlignedBuffer;
use crate::decompressor::FullFileDecompressor;
use crate::request::{Continuation, RequestId, RequestKind, StreamContext};
use crate::telemetry;
use crate::telemetry::tags;
use crate::types::{RequestStatus, Result};
use crate::StreamError;

/// One of the `max_reads` raw-read buffers.
///
/// While a read is in flight its buffer is on loan to the raw-read request; it
/// comes back into the slot when the read succeeds.
#[derive(Debug, Default)]
pub(super) enum ReadSlot {
    #[default]
    Unused,
    ReadInFlight {
        raw_read: RequestId,
    },
    PendingDecompression {
        wait: RequestId,
        buffer: AlignedBuffer,
    },
}

impl ReadSlot {
    pub(super) fn is_unused(&self) -> bool {
        matches!(self, Self::Unused)
    }
}

impl FullFileDecompressor {
    /// Issues the raw read for a queued compressed read.
    ///
    /// Only called while `num_in_flight_reads < max_reads`, which guarantees a
    /// free slot.
    pub(super) fn admit(&mut self, ctx: &mut StreamContext, compressed: RequestId) -> Result<()> {
        let slot = self
            .read_slots
            .iter()
            .position(ReadSlot::is_unused)
            .ok_or_else(|| {
                StreamError::SlotAccounting(format!(
                    "{} reads in flight but no read slot is free",
                    self.num_in_flight_reads
                ))
            })?;

        let Some(RequestKind::CompressedRead { descriptor, .. }) = ctx.graph.kind(compressed) else {
            return Err(StreamError::UnknownRequest);
        };
        let path = descriptor.archive_path.clone();
        let offset = descriptor.offset;
        let size = descriptor.compressed_size;
        let shared = descriptor.is_shared;

        // The buffer covers the aligned window around the payload, but the read
        // itself keeps the payload's own offset and size.
        let buffer = AlignedBuffer::for_range(&self.pool, offset, size, self.config.alignment)?;
        let raw_read = ctx.graph.create_internal(
            Some(compressed),
            RequestKind::RawRead {
                path,
                offset,
                size,
                buffer: Some(buffer),
                shared,
            },
        )?;
        ctx.graph
            .set_continuation(raw_read, Continuation::ReadSlot(slot))?;
        ctx.graph.set_status(compressed, RequestStatus::Processing);

        self.read_slots[slot] = ReadSlot::ReadInFlight { raw_read };
        self.num_in_flight_reads += 1;
        telemetry::increment_counter(
            tags::METRIC_READ_ADMITTED_COUNT,
            1,
            &[("subsystem", "decompressor"), ("op", "admit")],
        );
        tracing::trace!(
            target: tags::PROFILE_DECOMPRESSOR,
            request = %compressed,
            slot,
            offset,
            size,
            "raw read issued"
        );

        match self.next.as_mut() {
            Some(next) => next.queue(ctx, raw_read),
            None => {
                ctx.graph.complete(raw_read, RequestStatus::Failed);
            }
        }
        Ok(())
    }

    /// Continuation of a raw read issued from read slot `slot`.
    pub(super) fn finish_raw_read(&mut self, ctx: &mut StreamContext, raw_read: RequestId, slot: usize) {
        let owns_slot = matches!(
            self.read_slots.get(slot),
            Some(ReadSlot::ReadInFlight { raw_read: owner }) if *owner == raw_read
        );
        if !owns_slot {
            tracing::error!(
                target: tags::PROFILE_DECOMPRESSOR,
                request = %raw_read,
                slot,
                "raw read completed for a slot it does not own"
            );
            ctx.graph.retire(raw_read);
            return;
        }

        let status = ctx.graph.status(raw_read);
        let buffer = match ctx.graph.kind_mut(raw_read) {
            Some(RequestKind::RawRead { buffer, .. }) => buffer.take(),
            _ => None,
        };
        let compressed = ctx.graph.parent(raw_read);

        let wait = match (status, buffer, compressed) {
            (Some(RequestStatus::Completed), Some(buffer), Some(compressed)) => {
                match ctx.graph.create_internal(Some(compressed), RequestKind::Wait) {
                    Ok(wait) => Some((wait, buffer)),
                    Err(_) => None,
                }
            }
            _ => None,
        };

        match wait {
            Some((wait, buffer)) => {
                self.read_slots[slot] = ReadSlot::PendingDecompression { wait, buffer };
                self.num_pending_decompression += 1;
            }
            None => {
                // Any buffer still around was dropped above.
                self.read_slots[slot] = ReadSlot::Unused;
                self.num_in_flight_reads -= 1;
                ctx.graph.set_status(raw_read, RequestStatus::Failed);
                telemetry::increment_counter(
                    tags::METRIC_READ_FAILED_COUNT,
                    1,
                    &[("subsystem", "decompressor"), ("op", "raw_read"), ("result", "error")],
                );
                tracing::debug!(
                    target: tags::PROFILE_DECOMPRESSOR,
                    request = %raw_read,
                    slot,
                    "raw read failed"
                );
            }
        }

        // Retiring the raw read after the wait request exists keeps the
        // compressed read open until decompression finishes.
        ctx.graph.retire(raw_read);
    }
}
