use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::archive::CompressionDescriptor;
use crate::buffer::{AlignedBuffer, BufferPool, OutputBuffer};
use crate::codec::Decompressor;
use crate::core::WorkerTask;
use crate::decompressor::estimate::{self, ActiveJob, WaitingRead};
use crate::decompressor::reads::ReadSlot;
use crate::decompressor::FullFileDecompressor;
use crate::request::{RequestId, RequestKind, StreamContext};
use crate::telemetry;
use crate::telemetry::{profile, tags};
use crate::types::{RequestStatus, Result, duration_to_us};
use crate::StreamError;

const PROFILE_TAG_STACK_JOB: [&str; 2] = [tags::TAG_SYSTEM, tags::TAG_DECOMPRESSOR];

/// Bookkeeping for an occupied job slot. The compressed buffer lives in the task.
#[derive(Debug)]
pub(super) struct RunningJob {
    wait: RequestId,
    started_at: Instant,
    uncompressed_size: u64,
}

enum DecompressionMode {
    /// Decode straight into the caller's buffer.
    Full,
    /// Decode into scratch memory and copy out `[offset, offset + size)`.
    Partial {
        offset: usize,
        size: usize,
        scratch_pool: Arc<BufferPool>,
    },
}

/// Everything a worker needs to decompress one entry. Owned exclusively by the worker.
pub(super) struct DecompressionTask {
    job_slot: usize,
    descriptor: CompressionDescriptor,
    decompressor: Arc<dyn Decompressor>,
    buffer: AlignedBuffer,
    output: OutputBuffer,
    mode: DecompressionMode,
    /// Set when the task is handed to the worker pool.
    queued_at: Instant,
}

/// Message a worker sends back once per task.
pub(super) struct JobCompletion {
    job_slot: usize,
    status: RequestStatus,
    /// Returned so it is released on the scheduling thread.
    buffer: Option<AlignedBuffer>,
    dispatch_delay: Duration,
    duration: Duration,
}

impl WorkerTask for DecompressionTask {
    type Output = JobCompletion;

    const KIND: &'static str = "decompress";

    fn token(&self) -> usize {
        self.job_slot
    }

    fn run(self, worker_id: usize) -> JobCompletion {
        let started_at = Instant::now();
        let dispatch_delay = started_at.saturating_duration_since(self.queued_at);
        let result = self.decompress();
        let duration = started_at.elapsed();

        let status = match &result {
            Ok(()) => RequestStatus::Completed,
            Err(error) => {
                tracing::warn!(
                    target: tags::PROFILE_DECOMPRESSOR,
                    worker_id,
                    archive = %self.descriptor.archive_path.display(),
                    offset = self.descriptor.offset,
                    %error,
                    "decompression failed"
                );
                RequestStatus::Failed
            }
        };
        profile::event(
            tags::PROFILE_DECOMPRESSOR,
            &PROFILE_TAG_STACK_JOB,
            match self.mode {
                DecompressionMode::Full => "decompress_full",
                DecompressionMode::Partial { .. } => "decompress_partial",
            },
            if result.is_ok() { "ok" } else { "error" },
            duration_to_us(duration),
            "decompression job finished",
        );

        JobCompletion {
            job_slot: self.job_slot,
            status,
            buffer: Some(self.buffer),
            dispatch_delay,
            duration,
        }
    }

    fn panicked(job_slot: usize) -> JobCompletion {
        JobCompletion {
            job_slot,
            status: RequestStatus::Failed,
            buffer: None,
            dispatch_delay: Duration::ZERO,
            duration: Duration::ZERO,
        }
    }

    fn succeeded(output: &JobCompletion) -> bool {
        output.status == RequestStatus::Completed
    }
}

impl DecompressionTask {
    fn decompress(&self) -> Result<()> {
        let uncompressed = usize::try_from(self.descriptor.uncompressed_size).map_err(|_| {
            StreamError::DecompressionError("entry does not fit in memory".to_string())
        })?;
        let src = self.buffer.payload();

        match &self.mode {
            DecompressionMode::Full => self.output.with_mut(|dst| {
                let dst_len = dst.len();
                let dst = dst.get_mut(..uncompressed).ok_or_else(|| {
                    StreamError::DecompressionError(format!(
                        "output holds {dst_len} bytes, entry needs {uncompressed}"
                    ))
                })?;
                self.decompressor.decompress(&self.descriptor, src, dst)
            }),
            DecompressionMode::Partial {
                offset,
                size,
                scratch_pool,
            } => {
                let mut scratch = scratch_pool.acquire(uncompressed);
                self.decompressor
                    .decompress(&self.descriptor, src, scratch.as_mut_slice())?;
                let wanted = scratch.get(*offset..*offset + *size).ok_or(StreamError::OutOfRange {
                    offset: *offset as u64,
                    size: *size as u64,
                    len: uncompressed as u64,
                })?;
                self.output.with_mut(|dst| {
                    let dst_len = dst.len();
                    let dst = dst.get_mut(..wanted.len()).ok_or_else(|| {
                        StreamError::DecompressionError(format!(
                            "output holds {dst_len} bytes, read needs {}",
                            wanted.len()
                        ))
                    })?;
                    dst.copy_from_slice(wanted);
                    Ok(())
                })
            }
        }
    }
}

impl FullFileDecompressor {
    /// Pairs decompression-ready read slots with free job slots.
    ///
    /// Scans read slots in index order and takes the lowest free job slot for
    /// each. Stops as soon as either side runs out.
    pub(super) fn try_start_jobs(&mut self, ctx: &mut StreamContext) -> bool {
        let mut started = false;
        for read_index in 0..self.read_slots.len() {
            if self.num_pending_decompression == 0 || self.num_running_jobs >= self.config.max_jobs {
                break;
            }
            if !matches!(self.read_slots[read_index], ReadSlot::PendingDecompression { .. }) {
                continue;
            }
            let Some(job_slot) = self.job_slots.iter().position(Option::is_none) else {
                break;
            };

            let ReadSlot::PendingDecompression { wait, buffer } =
                std::mem::take(&mut self.read_slots[read_index])
            else {
                continue;
            };
            self.num_pending_decompression -= 1;
            self.num_in_flight_reads -= 1;
            started = true;

            let task = self.build_task(ctx, wait, buffer, job_slot);
            let submitted = task.and_then(|(task, uncompressed_size)| {
                self.workers.submit(task).map(|()| uncompressed_size)
            });
            match submitted {
                Ok(uncompressed_size) => {
                    self.job_slots[job_slot] = Some(RunningJob {
                        wait,
                        started_at: Instant::now(),
                        uncompressed_size,
                    });
                    self.num_running_jobs += 1;
                    ctx.graph.set_status(wait, RequestStatus::Processing);
                    telemetry::increment_counter(
                        tags::METRIC_JOB_STARTED_COUNT,
                        1,
                        &[("subsystem", "decompressor"), ("op", "job_start")],
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        target: tags::PROFILE_DECOMPRESSOR,
                        request = %wait,
                        %error,
                        "decompression job not started"
                    );
                    ctx.graph.complete(wait, RequestStatus::Failed);
                }
            }
        }
        started
    }

    fn build_task(
        &self,
        ctx: &StreamContext,
        wait: RequestId,
        buffer: AlignedBuffer,
        job_slot: usize,
    ) -> Result<(DecompressionTask, u64)> {
        let compressed = ctx.graph.parent(wait).ok_or(StreamError::UnknownRequest)?;
        let Some(RequestKind::CompressedRead {
            descriptor,
            output,
            offset,
            size,
        }) = ctx.graph.kind(compressed)
        else {
            return Err(StreamError::UnknownRequest);
        };
        let decompressor = descriptor.decompressor.clone().ok_or(StreamError::InvalidConfig(
            "compressed read without a decompressor",
        ))?;

        let mode = if *offset == 0 && *size == descriptor.uncompressed_size {
            DecompressionMode::Full
        } else {
            let to_usize = |value: u64| {
                usize::try_from(value).map_err(|_| StreamError::OutOfRange {
                    offset: *offset,
                    size: *size,
                    len: descriptor.uncompressed_size,
                })
            };
            telemetry::increment_counter(
                tags::METRIC_JOB_PARTIAL_COUNT,
                1,
                &[("subsystem", "decompressor"), ("op", "job_start"), ("mode", "partial")],
            );
            DecompressionMode::Partial {
                offset: to_usize(*offset)?,
                size: to_usize(*size)?,
                scratch_pool: Arc::clone(&self.pool),
            }
        };

        let task = DecompressionTask {
            job_slot,
            descriptor: descriptor.clone(),
            decompressor,
            buffer,
            output: output.clone(),
            mode,
            queued_at: Instant::now(),
        };
        Ok((task, descriptor.uncompressed_size))
    }

    /// Processes every finished job reported by the workers.
    pub(super) fn acknowledge_jobs(&mut self, ctx: &mut StreamContext) -> bool {
        let mut acknowledged = false;
        while let Some(completion) = self.workers.try_recv() {
            acknowledged = true;
            let JobCompletion {
                job_slot,
                status,
                buffer,
                dispatch_delay,
                duration,
            } = completion;
            // The compressed data is released here, on the scheduling thread.
            drop(buffer);

            let Some(job) = self.job_slots.get_mut(job_slot).and_then(Option::take) else {
                tracing::error!(
                    target: tags::PROFILE_DECOMPRESSOR,
                    job_slot,
                    "completion for an empty job slot"
                );
                continue;
            };
            self.num_running_jobs -= 1;

            let labels = [("subsystem", "decompressor"), ("op", "job_finish")];
            if status == RequestStatus::Completed {
                let duration_us = duration_to_us(duration);
                let delay_us = duration_to_us(dispatch_delay);
                self.bytes_decompressed.push(job.uncompressed_size);
                self.decompression_duration_us.push(duration_us);
                self.dispatch_delay_us.push(delay_us);
                telemetry::increment_counter(tags::METRIC_JOB_FINISHED_COUNT, 1, &labels);
                telemetry::record_histogram(tags::METRIC_JOB_DURATION_US, duration_us, &labels);
                telemetry::record_histogram(tags::METRIC_JOB_DISPATCH_DELAY_US, delay_us, &labels);
                telemetry::record_histogram(tags::METRIC_JOB_BYTES, job.uncompressed_size, &labels);
            } else {
                telemetry::increment_counter(tags::METRIC_JOB_FAILED_COUNT, 1, &labels);
            }

            ctx.graph.complete(job.wait, status);
        }
        acknowledged
    }

    /// Refreshes completion estimates for every request this stage holds.
    pub(super) fn update_estimates(&self, ctx: &mut StreamContext, now: Instant) {
        let graph = &ctx.graph;
        let uncompressed_size = |request: Option<RequestId>| match request.and_then(|id| graph.kind(id)) {
            Some(RequestKind::CompressedRead { descriptor, .. }) => descriptor.uncompressed_size,
            _ => 0,
        };

        let mut job_targets = Vec::new();
        let mut jobs = Vec::new();
        for job in self.job_slots.iter().flatten() {
            job_targets.push(job.wait);
            jobs.push(ActiveJob {
                started_at: job.started_at,
                uncompressed_size: job.uncompressed_size,
            });
        }

        let mut slot_targets = Vec::new();
        let mut slots = Vec::new();
        for slot in &self.read_slots {
            match slot {
                ReadSlot::Unused => {}
                ReadSlot::ReadInFlight { raw_read } => {
                    // Estimate the compressed read; the raw read keeps the lower stage's figure.
                    let Some(compressed) = graph.parent(*raw_read) else {
                        continue;
                    };
                    slot_targets.push(compressed);
                    slots.push(WaitingRead {
                        data_ready_at: graph.estimated_completion(*raw_read),
                        uncompressed_size: uncompressed_size(Some(compressed)),
                    });
                }
                ReadSlot::PendingDecompression { wait, .. } => {
                    slot_targets.push(*wait);
                    slots.push(WaitingRead {
                        data_ready_at: None,
                        uncompressed_size: uncompressed_size(graph.parent(*wait)),
                    });
                }
            }
        }

        let queued: Vec<WaitingRead> = self
            .pending_reads
            .iter()
            .map(|request| WaitingRead {
                data_ready_at: graph.estimated_completion(*request),
                uncompressed_size: uncompressed_size(Some(*request)),
            })
            .collect();

        let estimates = estimate::estimate(now, &self.throughput(), &jobs, &slots, &queued);
        let targets = job_targets
            .into_iter()
            .zip(estimates.jobs)
            .chain(slot_targets.into_iter().zip(estimates.slots))
            .chain(self.pending_reads.iter().copied().zip(estimates.queued));
        for (request, at) in targets {
            ctx.graph.set_estimated_completion(request, at);
        }
    }
}
