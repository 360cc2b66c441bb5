use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::request::{RequestId, RequestKind, StreamContext};
use crate::stage::{StageStatus, StreamStage};
use crate::stats::{AverageWindow, STATISTICS_WINDOW_SIZE, Statistic, StatisticsSink};
use crate::telemetry;
use crate::telemetry::{profile, tags};
use crate::types::{RequestStatus, duration_to_us};
use crate::{Result, StreamError};

pub const STAGE_NAME: &str = "file_reader";

const PROFILE_TAG_STACK_STORAGE: [&str; 2] = [tags::TAG_SYSTEM, tags::TAG_STORAGE];

/// Bottom stage that serves requests synchronously from the local file system.
///
/// Relative paths resolve against `root`. One request is processed per
/// `execute` call so the stages above get a turn between reads.
#[derive(Debug)]
pub struct FileReadStage {
    root: PathBuf,
    pending: VecDeque<RequestId>,
    read_latency_us: AverageWindow<STATISTICS_WINDOW_SIZE>,
    reads_completed: u64,
    reads_failed: u64,
    bytes_read: u64,
    /// Raw reads from archives flagged as shared with other mounts.
    shared_reads: u64,
}

impl FileReadStage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            pending: VecDeque::new(),
            read_latency_us: AverageWindow::seeded(1),
            reads_completed: 0,
            reads_failed: 0,
            bytes_read: 0,
            shared_reads: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    fn process(&mut self, ctx: &mut StreamContext, request: RequestId) {
        let started_at = Instant::now();
        let Some(kind) = ctx.graph.kind_mut(request) else {
            return;
        };
        let op = kind.name();
        let outcome: Result<u64> = match kind {
            RequestKind::Read {
                path,
                output,
                offset,
                size,
            } => {
                let full_path = self.resolve(path);
                let (offset, size) = (*offset, *size);
                output.with_mut(|dst| read_range(&full_path, offset, size, dst))
            }
            RequestKind::RawRead {
                path,
                offset,
                size,
                buffer,
                shared,
            } => match buffer.as_mut() {
                Some(buffer) => {
                    if *shared {
                        self.shared_reads += 1;
                        tracing::trace!(
                            target: tags::PROFILE_STORAGE,
                            request = %request,
                            path = %path.display(),
                            "raw read from a shared archive"
                        );
                    }
                    read_aligned(&self.resolve(path), *offset, *size, buffer)
                }
                None => Err(StreamError::SlotAccounting(
                    "raw read arrived without a buffer".to_string(),
                )),
            },
            RequestKind::FileExists { path, found } => {
                *found = self.resolve(path).is_file();
                Ok(0)
            }
            RequestKind::FileMetadata { path, size } => fs::metadata(self.resolve(path))
                .map(|metadata| {
                    *size = Some(metadata.len());
                    0
                })
                .map_err(StreamError::from),
            // No cache at this level; accepting the hint is enough.
            RequestKind::CreateCache { .. } | RequestKind::DestroyCache { .. } => Ok(0),
            RequestKind::CompressedRead { .. }
            | RequestKind::Wait
            | RequestKind::PathStore { .. } => Err(StreamError::InvalidConfig(
                "request kind cannot be served from storage",
            )),
        };

        let elapsed = started_at.elapsed();
        let status = match outcome {
            Ok(bytes) => {
                if bytes > 0 {
                    self.reads_completed += 1;
                    self.bytes_read += bytes;
                    self.read_latency_us.push(duration_to_us(elapsed));
                    telemetry::increment_counter(
                        tags::METRIC_STORAGE_READ_COUNT,
                        1,
                        &[("subsystem", "storage"), ("op", op)],
                    );
                    telemetry::record_histogram(
                        tags::METRIC_STORAGE_READ_LATENCY_US,
                        duration_to_us(elapsed),
                        &[("subsystem", "storage"), ("op", op)],
                    );
                }
                RequestStatus::Completed
            }
            Err(error) => {
                self.reads_failed += 1;
                telemetry::increment_counter(
                    tags::METRIC_STORAGE_READ_FAILED_COUNT,
                    1,
                    &[("subsystem", "storage"), ("op", op), ("result", "error")],
                );
                tracing::debug!(
                    target: tags::PROFILE_STORAGE,
                    request = %request,
                    op,
                    %error,
                    "storage request failed"
                );
                RequestStatus::Failed
            }
        };
        profile::event(
            tags::PROFILE_STORAGE,
            &PROFILE_TAG_STACK_STORAGE,
            op,
            if status == RequestStatus::Completed { "ok" } else { "error" },
            duration_to_us(elapsed),
            "storage request finished",
        );
        ctx.graph.complete(request, status);
    }
}

/// Reads `[offset, offset + size)` of `path` into the start of `dst`.
fn read_range(path: &Path, offset: u64, size: u64, dst: &mut [u8]) -> Result<u64> {
    let out_of_range = StreamError::OutOfRange {
        offset,
        size,
        len: dst.len() as u64,
    };
    let Some(dst) = usize::try_from(size).ok().and_then(|len| dst.get_mut(..len)) else {
        return Err(out_of_range);
    };
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(dst)?;
    Ok(size)
}

/// Reads the sector-aligned window around `[offset, offset + size)` straight into `buffer`.
///
/// The tail of the window may run past the end of the file; only the payload
/// itself has to be present.
fn read_aligned(
    path: &Path,
    offset: u64,
    size: u64,
    buffer: &mut crate::buffer::AlignedBuffer,
) -> Result<u64> {
    let window_start = buffer.aligned_file_offset();
    let payload_end = buffer.alignment_offset() + buffer.payload_len();
    debug_assert_eq!(window_start + buffer.alignment_offset() as u64, offset);
    debug_assert_eq!(buffer.payload_len() as u64, size);

    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(window_start))?;
    let filled = fill_from(&mut file, buffer.as_mut_slice())?;
    if filled < payload_end {
        return Err(StreamError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("archive ended {filled} bytes into a {payload_end} byte window"),
        )));
    }
    Ok(size)
}

fn fill_from(reader: &mut impl Read, dst: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < dst.len() {
        match reader.read(&mut dst[filled..]) {
            Ok(0) => break,
            Ok(read) => filled += read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
    Ok(filled)
}

impl StreamStage for FileReadStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn prepare(&mut self, ctx: &mut StreamContext, request: RequestId) {
        ctx.push_prepared(request);
    }

    fn queue(&mut self, ctx: &mut StreamContext, request: RequestId) {
        ctx.graph.set_status(request, RequestStatus::Queued);
        self.pending.push_back(request);
    }

    fn execute(&mut self, ctx: &mut StreamContext) -> bool {
        match self.pending.pop_front() {
            Some(request) => {
                ctx.graph.set_status(request, RequestStatus::Processing);
                self.process(ctx, request);
                true
            }
            None => false,
        }
    }

    fn update_status(&self, status: &mut StageStatus) {
        status.is_idle = status.is_idle && self.is_idle();
    }

    fn estimate_completion(
        &mut self,
        ctx: &mut StreamContext,
        now: Instant,
        pending: &mut Vec<RequestId>,
    ) {
        let per_request = Duration::from_micros(self.read_latency_us.average());
        let mut at = now;
        // Own queue first, then work the stages above will send, oldest first.
        for request in self.pending.iter().chain(pending.iter().rev()) {
            at = at.checked_add(per_request).unwrap_or(at);
            ctx.graph.set_estimated_completion(*request, at);
        }
    }

    fn collect_statistics(&self, sink: &mut dyn StatisticsSink) {
        sink.record(Statistic::u64(STAGE_NAME, "reads_completed", self.reads_completed));
        sink.record(Statistic::u64(STAGE_NAME, "reads_failed", self.reads_failed));
        sink.record(Statistic::u64(STAGE_NAME, "bytes_read", self.bytes_read));
        sink.record(Statistic::u64(STAGE_NAME, "shared_reads", self.shared_reads));
        sink.record(Statistic::u64(
            STAGE_NAME,
            "read_latency_us",
            self.read_latency_us.average(),
        ));
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{AlignedBuffer, BufferPool};

    #[test]
    fn aligned_read_places_payload_at_alignment_offset() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.bin");
        let contents: Vec<u8> = (0..=255u8).cycle().take(700).collect();
        fs::write(&path, &contents)?;

        let pool = BufferPool::new(0, 2);
        let mut buffer = AlignedBuffer::for_range(&pool, 300, 100, 256)?;
        read_aligned(&path, 300, 100, &mut buffer)?;

        assert_eq!(buffer.payload(), &contents[300..400]);
        Ok(())
    }

    #[test]
    fn aligned_read_tolerates_short_tail() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data.bin");
        fs::write(&path, vec![9u8; 130])?;

        let pool = BufferPool::new(0, 2);
        let mut buffer = AlignedBuffer::for_range(&pool, 100, 30, 64)?;
        read_aligned(&path, 100, 30, &mut buffer)?;
        assert_eq!(buffer.payload(), &[9u8; 30][..]);

        let mut past_end = AlignedBuffer::for_range(&pool, 120, 30, 64)?;
        assert!(read_aligned(&path, 120, 30, &mut past_end).is_err());
        Ok(())
    }

    #[test]
    fn shared_archive_reads_are_counted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::write(dir.path().join("shared.pak"), vec![3u8; 512])?;

        let pool = BufferPool::new(0, 2);
        let mut ctx = StreamContext::new();
        let mut stage = FileReadStage::new(dir.path());
        for shared in [true, false] {
            let request = ctx.graph.create(RequestKind::RawRead {
                path: PathBuf::from("shared.pak"),
                offset: 10,
                size: 20,
                buffer: Some(AlignedBuffer::for_range(&pool, 10, 20, 64)?),
                shared,
            });
            stage.queue(&mut ctx, request);
            assert!(stage.execute(&mut ctx));
            assert_eq!(ctx.graph.status(request), Some(RequestStatus::Completed));
        }

        let mut statistics = Vec::new();
        stage.collect_statistics(&mut statistics);
        let shared_reads = statistics
            .iter()
            .find(|stat| stat.name == "shared_reads")
            .map(|stat| stat.value.clone());
        assert_eq!(shared_reads, Some(crate::StatValue::U64(1)));
        Ok(())
    }

    #[test]
    fn relative_paths_resolve_against_root() {
        let stage = FileReadStage::new("/data/assets");
        assert_eq!(
            stage.resolve(Path::new("a/b.bin")),
            PathBuf::from("/data/assets/a/b.bin")
        );
        assert_eq!(stage.resolve(Path::new("/abs.bin")), PathBuf::from("/abs.bin"));
    }
}
