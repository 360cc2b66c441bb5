//! Decompression stage for files stored in compressed archives.
//!
//! [`FullFileDecompressor`] sits above a storage stage. Reads that resolve to an
//! archive entry are turned into a raw read of the compressed bytes, which is
//! then decompressed on a worker pool straight into the caller's buffer.
//! In-flight raw reads and running jobs are bounded independently by
//! [`DecompressorConfig`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::archive::{ArchiveIndex, ArchiveLookup};
use crate::buffer::BufferPool;
use crate::config::DecompressorConfig;
use crate::core::WorkerPool;
use crate::request::{CompletionRecord, Continuation, RequestId, RequestKind, StreamContext, Waker};
use crate::stage::{StageStatus, StreamStage};
use crate::stats::{AverageWindow, STATISTICS_WINDOW_SIZE, Statistic, StatisticsSink};
use crate::telemetry;
use crate::telemetry::tags;
use crate::types::{RequestStatus, Result};

mod conflict;
pub mod estimate;
mod jobs;
mod reads;

use jobs::{DecompressionTask, RunningJob};
use reads::ReadSlot;

pub const STAGE_NAME: &str = "full_file_decompressor";

pub const STAT_AVAILABLE_READ_SLOTS: &str = "available_read_slots";
pub const STAT_AVAILABLE_DECOMPRESSION_SLOTS: &str = "available_decompression_slots";
pub const STAT_PENDING_DECOMPRESSION: &str = "pending_decompression";
pub const STAT_BUFFER_MEMORY_KIB: &str = "buffer_memory_kib";
pub const STAT_DECOMPRESSION_SPEED_MIBPS: &str = "decompression_speed_mibps";
pub const STAT_DECOMPRESSION_DELAY_US: &str = "decompression_delay_us";

type StatWindow = AverageWindow<STATISTICS_WINDOW_SIZE>;

/// Stream stage that serves archived files by reading and decompressing them whole.
pub struct FullFileDecompressor {
    config: DecompressorConfig,
    lookup: ArchiveLookup,
    pool: Arc<BufferPool>,
    next: Option<Box<dyn StreamStage>>,
    workers: WorkerPool<DecompressionTask>,

    read_slots: Vec<ReadSlot>,
    job_slots: Vec<Option<RunningJob>>,
    pending_reads: VecDeque<RequestId>,
    pending_file_checks: VecDeque<RequestId>,
    num_in_flight_reads: usize,
    num_pending_decompression: usize,
    num_running_jobs: usize,

    bytes_decompressed: StatWindow,
    decompression_duration_us: StatWindow,
    dispatch_delay_us: StatWindow,
}

impl FullFileDecompressor {
    /// Validates `config` and spawns the decompression workers.
    ///
    /// `waker` must come from the [`StreamContext`] this stage will run under.
    pub fn new(
        config: DecompressorConfig,
        index: Arc<dyn ArchiveIndex>,
        pool: Arc<BufferPool>,
        waker: Waker,
    ) -> Result<Self> {
        config.validate()?;
        let workers = WorkerPool::spawn(config.worker_count(), waker)?;
        tracing::debug!(
            target: tags::PROFILE_DECOMPRESSOR,
            max_reads = config.max_reads,
            max_jobs = config.max_jobs,
            alignment = config.alignment,
            workers = workers.num_workers(),
            "decompression stage ready"
        );

        Ok(Self {
            config,
            lookup: ArchiveLookup::new(index),
            pool,
            next: None,
            workers,
            read_slots: (0..config.max_reads).map(|_| ReadSlot::Unused).collect(),
            job_slots: (0..config.max_jobs).map(|_| None).collect(),
            pending_reads: VecDeque::new(),
            pending_file_checks: VecDeque::new(),
            num_in_flight_reads: 0,
            num_pending_decompression: 0,
            num_running_jobs: 0,
            // Seeded so the rate is defined before the first job finishes.
            bytes_decompressed: StatWindow::seeded(1),
            decompression_duration_us: StatWindow::seeded(1),
            dispatch_delay_us: StatWindow::seeded(1),
        })
    }

    pub fn with_next(mut self, next: Box<dyn StreamStage>) -> Self {
        self.next = Some(next);
        self
    }

    pub fn set_next(&mut self, next: Box<dyn StreamStage>) {
        self.next = Some(next);
    }

    pub fn config(&self) -> &DecompressorConfig {
        &self.config
    }

    pub fn num_workers(&self) -> usize {
        self.workers.num_workers()
    }

    pub fn num_in_flight_reads(&self) -> usize {
        self.num_in_flight_reads
    }

    pub fn num_pending_decompression(&self) -> usize {
        self.num_pending_decompression
    }

    pub fn num_running_jobs(&self) -> usize {
        self.num_running_jobs
    }

    /// Compressed reads waiting for a read slot.
    pub fn num_queued_reads(&self) -> usize {
        self.pending_reads.len()
    }

    pub fn num_pending_file_checks(&self) -> usize {
        self.pending_file_checks.len()
    }

    fn throughput(&self) -> estimate::Throughput {
        estimate::Throughput {
            total_bytes: self.bytes_decompressed.total(),
            total_duration_us: self.decompression_duration_us.total(),
            average_dispatch_delay_us: self.dispatch_delay_us.average(),
        }
    }

    /// Hands `request` to the next stage's `prepare`, failing it when there is none.
    fn forward_prepare(&mut self, ctx: &mut StreamContext, request: RequestId) {
        match self.next.as_mut() {
            Some(next) => next.prepare(ctx, request),
            None => fail_without_next(ctx, request),
        }
    }

    fn forward_queue(&mut self, ctx: &mut StreamContext, request: RequestId) {
        match self.next.as_mut() {
            Some(next) => next.queue(ctx, request),
            None => fail_without_next(ctx, request),
        }
    }

    fn admit_pending_reads(&mut self, ctx: &mut StreamContext) -> bool {
        let mut admitted = false;
        while self.num_in_flight_reads < self.config.max_reads {
            let Some(request) = self.pending_reads.pop_front() else {
                break;
            };
            admitted = true;
            if let Err(error) = self.admit(ctx, request) {
                tracing::warn!(
                    target: tags::PROFILE_DECOMPRESSOR,
                    request = %request,
                    %error,
                    "compressed read could not be admitted"
                );
                telemetry::increment_counter(
                    tags::METRIC_READ_FAILED_COUNT,
                    1,
                    &[("subsystem", "decompressor"), ("op", "admit"), ("result", "error")],
                );
                ctx.graph.complete(request, RequestStatus::Failed);
            }
        }
        admitted
    }

    /// Answers one queued existence check from the archive index.
    fn service_file_check(&mut self, ctx: &mut StreamContext) -> bool {
        let Some(request) = self.pending_file_checks.pop_front() else {
            return false;
        };
        telemetry::increment_counter(
            tags::METRIC_FILE_CHECK_COUNT,
            1,
            &[("subsystem", "decompressor"), ("op", "file_check")],
        );

        let archived = match ctx.graph.kind(request) {
            Some(RequestKind::FileExists { path, .. }) => self.lookup.contains(path),
            _ => false,
        };
        if archived {
            if let Some(RequestKind::FileExists { found, .. }) = ctx.graph.kind_mut(request) {
                *found = true;
            }
            ctx.graph.complete(request, RequestStatus::Completed);
        } else {
            self.forward_queue(ctx, request);
        }
        true
    }

    /// Answers a size query from the archive index when the path is archived.
    fn queue_file_metadata(&mut self, ctx: &mut StreamContext, request: RequestId) {
        let uncompressed_size = match ctx.graph.kind(request) {
            Some(RequestKind::FileMetadata { path, .. }) => self
                .lookup
                .resolve(path)
                .map(|descriptor| descriptor.uncompressed_size),
            _ => None,
        };
        match uncompressed_size {
            Some(len) => {
                if let Some(RequestKind::FileMetadata { size, .. }) = ctx.graph.kind_mut(request) {
                    *size = Some(len);
                }
                ctx.graph.complete(request, RequestStatus::Completed);
            }
            None => self.forward_queue(ctx, request),
        }
    }

    fn publish_gauges(&self) {
        let labels = [("subsystem", "decompressor"), ("op", "status")];
        telemetry::set_gauge(
            tags::METRIC_STAGE_AVAILABLE_READ_SLOTS,
            (self.config.max_reads - self.num_in_flight_reads) as u64,
            &labels,
        );
        telemetry::set_gauge(
            tags::METRIC_STAGE_AVAILABLE_JOB_SLOTS,
            (self.config.max_jobs - self.num_running_jobs) as u64,
            &labels,
        );
        telemetry::set_gauge(
            tags::METRIC_STAGE_PENDING_DECOMPRESSION,
            self.num_pending_decompression as u64,
            &labels,
        );
    }
}

fn fail_without_next(ctx: &mut StreamContext, request: RequestId) {
    let kind = ctx.graph.kind(request);
    tracing::warn!(
        target: tags::PROFILE_DECOMPRESSOR,
        request = %request,
        kind = kind.map_or("released", RequestKind::name),
        path = ?kind.and_then(RequestKind::path),
        "no stage below the decompressor; failing request"
    );
    ctx.graph.complete(request, RequestStatus::Failed);
}

impl StreamStage for FullFileDecompressor {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn prepare(&mut self, ctx: &mut StreamContext, request: RequestId) {
        match self.plan_archived(ctx, request) {
            Some((logical_path, descriptor, archived)) => {
                self.prepare_archived(ctx, request, logical_path, descriptor, archived)
            }
            None => self.forward_prepare(ctx, request),
        }
    }

    fn queue(&mut self, ctx: &mut StreamContext, request: RequestId) {
        match ctx.graph.kind(request) {
            Some(RequestKind::CompressedRead { .. }) => {
                if self.next.is_some() {
                    ctx.graph.set_status(request, RequestStatus::Queued);
                    self.pending_reads.push_back(request);
                } else {
                    fail_without_next(ctx, request);
                }
            }
            Some(RequestKind::FileExists { .. }) => {
                ctx.graph.set_status(request, RequestStatus::Queued);
                self.pending_file_checks.push_back(request);
            }
            Some(RequestKind::FileMetadata { .. }) => self.queue_file_metadata(ctx, request),
            _ => self.forward_queue(ctx, request),
        }
    }

    fn execute(&mut self, ctx: &mut StreamContext) -> bool {
        // Finishing jobs frees read slots, so acknowledge and dispatch before admitting.
        let mut did_work = self.acknowledge_jobs(ctx);
        did_work |= self.try_start_jobs(ctx);
        did_work |= self.admit_pending_reads(ctx);
        if !did_work {
            did_work = self.service_file_check(ctx);
        }

        let next_did_work = self
            .next
            .as_mut()
            .is_some_and(|next| next.execute(ctx));
        did_work || next_did_work
    }

    fn on_completion(&mut self, ctx: &mut StreamContext, record: CompletionRecord) {
        match record.continuation {
            Continuation::ReadSlot(slot) => self.finish_raw_read(ctx, record.request, slot),
            Continuation::ExistsProbe { synthetic } => {
                self.finish_probe(ctx, record.request, synthetic)
            }
        }
    }

    fn update_status(&self, status: &mut StageStatus) {
        if let Some(next) = self.next.as_ref() {
            next.update_status(status);
        }
        let available = self.config.max_reads - self.num_in_flight_reads;
        status.num_available_slots = status.num_available_slots.min(available);
        status.is_idle = status.is_idle && self.is_idle();
    }

    fn estimate_completion(
        &mut self,
        ctx: &mut StreamContext,
        now: Instant,
        pending: &mut Vec<RequestId>,
    ) {
        // The stage below sees our queued reads as its own future work, newest first.
        pending.extend(self.pending_reads.iter().rev().copied());
        if let Some(next) = self.next.as_mut() {
            next.estimate_completion(ctx, now, pending);
        }
        self.update_estimates(ctx, now);
    }

    fn collect_statistics(&self, sink: &mut dyn StatisticsSink) {
        let throughput = self.throughput();
        let seconds = throughput.total_duration_us as f64 / 1_000_000.0;
        let mebibytes = throughput.total_bytes as f64 / (1024.0 * 1024.0);
        let speed = if seconds > 0.0 { mebibytes / seconds } else { 0.0 };

        sink.record(Statistic::u64(
            STAGE_NAME,
            STAT_AVAILABLE_READ_SLOTS,
            (self.config.max_reads - self.num_in_flight_reads) as u64,
        ));
        sink.record(Statistic::u64(
            STAGE_NAME,
            STAT_AVAILABLE_DECOMPRESSION_SLOTS,
            (self.config.max_jobs - self.num_running_jobs) as u64,
        ));
        sink.record(Statistic::u64(
            STAGE_NAME,
            STAT_PENDING_DECOMPRESSION,
            self.num_pending_decompression as u64,
        ));
        sink.record(Statistic::u64(
            STAGE_NAME,
            STAT_BUFFER_MEMORY_KIB,
            self.pool.outstanding_bytes() / 1024,
        ));
        sink.record(Statistic::f64(
            STAGE_NAME,
            STAT_DECOMPRESSION_SPEED_MIBPS,
            speed,
        ));
        sink.record(Statistic::u64(
            STAGE_NAME,
            STAT_DECOMPRESSION_DELAY_US,
            throughput.average_dispatch_delay_us,
        ));
        self.publish_gauges();

        if let Some(next) = self.next.as_ref() {
            next.collect_statistics(sink);
        }
    }

    fn is_idle(&self) -> bool {
        self.pending_reads.is_empty()
            && self.pending_file_checks.is_empty()
            && self.num_in_flight_reads == 0
            && self.num_pending_decompression == 0
            && self.num_running_jobs == 0
    }
}
