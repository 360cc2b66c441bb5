pub mod archive;
pub mod buffer;
pub mod codec;
pub mod config;
pub mod core;
pub mod decompressor;
pub mod error;
pub mod request;
pub mod scheduler;
pub mod stage;
pub mod stats;
pub mod storage;
pub mod telemetry;
pub mod types;

pub use archive::{
    ArchiveBuilder, ArchiveCatalog, ArchiveIndex, ArchiveLookup, CompressionDescriptor,
    ConflictPolicy,
};
pub use buffer::{AlignedBuffer, BufferPool, OutputBuffer, PoolMetricsSnapshot, PooledBuffer};
pub use codec::{CodecKind, Decompressor, Lz4Decompressor, ZstdDecompressor};
pub use config::{DecompressorConfig, SchedulerOptions};
pub use decompressor::FullFileDecompressor;
pub use error::StreamError;
pub use request::{RequestGraph, RequestId, RequestKind, StreamContext, Waker};
pub use scheduler::StreamScheduler;
pub use stage::{StageStatus, StreamStage};
pub use stats::{StatValue, Statistic, StatisticsSink};
pub use storage::FileReadStage;
pub use telemetry::worker::{DefaultWorkerTelemetry, WorkerTelemetry};
pub use types::{FileRange, RequestStatus, Result};
