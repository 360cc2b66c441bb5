use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::archive::CompressionDescriptor;
use crate::telemetry::{profile, tags};
use crate::{Result, StreamError};

/// Opaque decompression capability attached to a [`CompressionDescriptor`].
///
/// Only ever invoked from decompression worker threads. `dst` is exactly the
/// entry's uncompressed size; an implementation must fill all of it or fail.
pub trait Decompressor: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn decompress(
        &self,
        descriptor: &CompressionDescriptor,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<()>;
}

/// LZ4 block format without a size prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Decompressor;

impl Decompressor for Lz4Decompressor {
    fn name(&self) -> &'static str {
        "lz4"
    }

    fn decompress(
        &self,
        _descriptor: &CompressionDescriptor,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<()> {
        let written = lz4_flex::block::decompress_into(src, dst)
            .map_err(|err| StreamError::DecompressionError(format!("lz4 decode failed: {err}")))?;
        check_written("lz4", written, dst.len())
    }
}

/// Single zstd frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZstdDecompressor;

impl Decompressor for ZstdDecompressor {
    fn name(&self) -> &'static str {
        "zstd"
    }

    fn decompress(
        &self,
        _descriptor: &CompressionDescriptor,
        src: &[u8],
        dst: &mut [u8],
    ) -> Result<()> {
        let written = zstd::bulk::decompress_to_buffer(src, dst)
            .map_err(|err| StreamError::DecompressionError(format!("zstd decode failed: {err}")))?;
        check_written("zstd", written, dst.len())
    }
}

fn check_written(codec: &str, written: usize, expected: usize) -> Result<()> {
    if written == expected {
        Ok(())
    } else {
        Err(StreamError::DecompressionError(format!(
            "{codec} produced {written} bytes, entry declares {expected}"
        )))
    }
}

/// Codec recorded per entry in an archive catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// Stored uncompressed inside the archive.
    Stored,
    Lz4,
    Zstd,
}

impl CodecKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stored => "stored",
            Self::Lz4 => "lz4",
            Self::Zstd => "zstd",
        }
    }

    /// Decompression capability for this codec; `None` for stored entries.
    pub fn decompressor(self) -> Option<Arc<dyn Decompressor>> {
        match self {
            Self::Stored => None,
            Self::Lz4 => Some(Arc::new(Lz4Decompressor)),
            Self::Zstd => Some(Arc::new(ZstdDecompressor)),
        }
    }

    /// Encodes `data` for storage in an archive.
    pub fn compress(self, data: &[u8]) -> Result<Vec<u8>> {
        let started_at = Instant::now();
        let encoded = match self {
            Self::Stored => data.to_vec(),
            Self::Lz4 => lz4_flex::block::compress(data),
            Self::Zstd => zstd::bulk::compress(data, zstd::DEFAULT_COMPRESSION_LEVEL)?,
        };
        profile::event(
            tags::PROFILE_DECOMPRESSOR,
            &[tags::TAG_SYSTEM, self.as_str()],
            "compress",
            "ok",
            profile::elapsed_us(started_at),
            "archive entry encoded",
        );
        Ok(encoded)
    }
}
