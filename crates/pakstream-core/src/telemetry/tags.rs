/// Profiling target for the decompression stage.
pub const PROFILE_DECOMPRESSOR: &str = "pakstream.profile.decompressor";
/// Profiling target for buffer pool operations.
pub const PROFILE_BUFFER: &str = "pakstream.profile.buffer";
/// Profiling target for decompression worker threads.
pub const PROFILE_WORKER: &str = "pakstream.profile.worker";
/// Profiling target for archive index lookups.
pub const PROFILE_LOOKUP: &str = "pakstream.profile.lookup";
/// Profiling target for the file-read stage.
pub const PROFILE_STORAGE: &str = "pakstream.profile.storage";
/// Profiling target for the scheduler driver loop.
pub const PROFILE_SCHEDULER: &str = "pakstream.profile.scheduler";

/// Global system-level tag shared by all profiling events.
pub const TAG_SYSTEM: &str = "system";
pub const TAG_DECOMPRESSOR: &str = "decompressor";
pub const TAG_BUFFER: &str = "buffer";
pub const TAG_WORKER: &str = "worker";
pub const TAG_LOOKUP: &str = "lookup";
pub const TAG_STORAGE: &str = "storage";
pub const TAG_SCHEDULER: &str = "scheduler";

pub const METRIC_LOOKUP_HIT_COUNT: &str = "pakstream.lookup.hit.count";
pub const METRIC_LOOKUP_MISS_COUNT: &str = "pakstream.lookup.miss.count";
pub const METRIC_LOOKUP_REJECTED_COUNT: &str = "pakstream.lookup.rejected.count";

pub const METRIC_CONFLICT_PROBE_COUNT: &str = "pakstream.conflict.probe.count";
pub const METRIC_CONFLICT_LOOSE_FILE_COUNT: &str = "pakstream.conflict.loose_file.count";

pub const METRIC_READ_ADMITTED_COUNT: &str = "pakstream.read.admitted.count";
pub const METRIC_READ_FAILED_COUNT: &str = "pakstream.read.failed.count";
pub const METRIC_FILE_CHECK_COUNT: &str = "pakstream.file_check.count";

pub const METRIC_JOB_STARTED_COUNT: &str = "pakstream.job.started.count";
pub const METRIC_JOB_FINISHED_COUNT: &str = "pakstream.job.finished.count";
pub const METRIC_JOB_FAILED_COUNT: &str = "pakstream.job.failed.count";
pub const METRIC_JOB_PARTIAL_COUNT: &str = "pakstream.job.partial.count";
pub const METRIC_JOB_DURATION_US: &str = "pakstream.job.duration_us";
pub const METRIC_JOB_DISPATCH_DELAY_US: &str = "pakstream.job.dispatch_delay_us";
pub const METRIC_JOB_BYTES: &str = "pakstream.job.bytes";

pub const METRIC_BUFFER_ACQUIRE_CREATED_COUNT: &str = "pakstream.buffer.acquire.created.count";
pub const METRIC_BUFFER_ACQUIRE_RECYCLED_COUNT: &str = "pakstream.buffer.acquire.recycled.count";
pub const METRIC_BUFFER_RECYCLE_DROPPED_COUNT: &str = "pakstream.buffer.recycle.dropped.count";
pub const METRIC_BUFFER_ACQUIRE_LATENCY_US: &str = "pakstream.buffer.acquire.latency_us";
pub const METRIC_BUFFER_OUTSTANDING_BYTES: &str = "pakstream.buffer.outstanding_bytes";

pub const METRIC_STAGE_AVAILABLE_READ_SLOTS: &str = "pakstream.stage.available_read_slots";
pub const METRIC_STAGE_AVAILABLE_JOB_SLOTS: &str = "pakstream.stage.available_job_slots";
pub const METRIC_STAGE_PENDING_DECOMPRESSION: &str = "pakstream.stage.pending_decompression";

pub const METRIC_STORAGE_READ_COUNT: &str = "pakstream.storage.read.count";
pub const METRIC_STORAGE_READ_FAILED_COUNT: &str = "pakstream.storage.read.failed.count";
pub const METRIC_STORAGE_READ_LATENCY_US: &str = "pakstream.storage.read.latency_us";

pub const METRIC_WORKER_TASK_COUNT: &str = "pakstream.worker.task.count";
pub const METRIC_WORKER_TASK_FAIL_COUNT: &str = "pakstream.worker.task.fail.count";
pub const METRIC_WORKER_TASK_LATENCY_US: &str = "pakstream.worker.task.latency_us";
pub const METRIC_WORKER_ACTIVE_COUNT: &str = "pakstream.worker.active.count";
