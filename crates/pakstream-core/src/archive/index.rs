use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::Decompressor;

/// Which copy of a file wins when a loose file and an archive entry share a path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Serve from the archive without checking for a loose file.
    #[default]
    PreferArchive,
    /// Probe for a loose file first and serve it when present.
    PreferLooseFile,
    /// Only the archive copy is ever considered.
    ArchiveOnly,
}

impl ConflictPolicy {
    pub fn requires_probe(self) -> bool {
        matches!(self, Self::PreferLooseFile)
    }
}

/// Location and decoding metadata for one archived file.
#[derive(Debug, Clone)]
pub struct CompressionDescriptor {
    pub archive_path: PathBuf,
    /// Byte offset of the payload inside the archive file.
    pub offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// `None` when the entry is stored without compression.
    pub decompressor: Option<Arc<dyn Decompressor>>,
    /// Whether the archive may be read concurrently by other consumers.
    pub is_shared: bool,
    pub conflict_policy: ConflictPolicy,
}

impl CompressionDescriptor {
    pub fn is_compressed(&self) -> bool {
        self.decompressor.is_some()
    }

    /// Exclusive end of the payload inside the archive, `None` on overflow.
    pub fn payload_end(&self) -> Option<u64> {
        self.offset.checked_add(self.compressed_size)
    }

    /// Whether `[offset, offset + size)` lies inside the uncompressed file.
    pub fn contains_range(&self, offset: u64, size: u64) -> bool {
        offset
            .checked_add(size)
            .is_some_and(|end| end <= self.uncompressed_size)
    }
}

/// Maps logical paths to archived entries.
pub trait ArchiveIndex: Send + Sync {
    fn find_compression_info(&self, path: &Path) -> Option<CompressionDescriptor>;
}

impl<T: ArchiveIndex + ?Sized> ArchiveIndex for Arc<T> {
    fn find_compression_info(&self, path: &Path) -> Option<CompressionDescriptor> {
        (**self).find_compression_info(path)
    }
}
