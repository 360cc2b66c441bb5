use std::path::{Path, PathBuf};

use crate::archive::CompressionDescriptor;
use crate::buffer::{AlignedBuffer, OutputBuffer};
use crate::types::FileRange;

pub mod context;
pub mod graph;

pub use context::{StreamContext, Waker};
pub use graph::{CompletionRecord, Continuation, RequestGraph, RequestId, RequestOrigin};

/// Payload of a request, one variant per command the stack understands.
#[derive(Debug)]
pub enum RequestKind {
    /// Logical read of `size` bytes at `offset`, written to the start of `output`.
    Read {
        path: PathBuf,
        output: OutputBuffer,
        offset: u64,
        size: u64,
    },
    /// Read of a range of an archived, compressed file.
    CompressedRead {
        descriptor: CompressionDescriptor,
        output: OutputBuffer,
        offset: u64,
        size: u64,
    },
    /// Read of compressed bytes into a stage-owned aligned buffer.
    ///
    /// `offset`/`size` describe the payload exactly; the buffer's
    /// [`AlignedBuffer::aligned_file_offset`] tells the reader where byte 0 maps.
    RawRead {
        path: PathBuf,
        offset: u64,
        size: u64,
        buffer: Option<AlignedBuffer>,
        shared: bool,
    },
    /// Ask a caching stage to hold a file, or a range of it.
    CreateCache {
        path: PathBuf,
        range: Option<FileRange>,
    },
    /// Ask a caching stage to drop a cached file or range.
    DestroyCache {
        path: PathBuf,
        range: Option<FileRange>,
    },
    FileExists {
        path: PathBuf,
        found: bool,
    },
    /// Size query; `size` is filled in by whichever stage answers it.
    FileMetadata {
        path: PathBuf,
        size: Option<u64>,
    },
    /// Holds its parent open until an asynchronous step finishes.
    Wait,
    /// Keeps a path alive for the children that borrow it.
    PathStore { path: PathBuf },
}

impl RequestKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::CompressedRead { .. } => "compressed_read",
            Self::RawRead { .. } => "raw_read",
            Self::CreateCache { .. } => "create_cache",
            Self::DestroyCache { .. } => "destroy_cache",
            Self::FileExists { .. } => "file_exists",
            Self::FileMetadata { .. } => "file_metadata",
            Self::Wait => "wait",
            Self::PathStore { .. } => "path_store",
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::Read { path, .. }
            | Self::RawRead { path, .. }
            | Self::CreateCache { path, .. }
            | Self::DestroyCache { path, .. }
            | Self::FileExists { path, .. }
            | Self::FileMetadata { path, .. }
            | Self::PathStore { path } => Some(path.as_path()),
            Self::CompressedRead { descriptor, .. } => Some(descriptor.archive_path.as_path()),
            Self::Wait => None,
        }
    }
}
