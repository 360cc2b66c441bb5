#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use crossbeam_channel::Receiver;
use pakstream_core::request::RequestKind;
use pakstream_core::stage::{StageStatus, StreamStage};
use pakstream_core::stats::{Statistic, StatisticsSink};
use pakstream_core::{
    ArchiveIndex, BufferPool, CodecKind, CompressionDescriptor, ConflictPolicy, Decompressor,
    DecompressorConfig, FullFileDecompressor, OutputBuffer, RequestId, RequestStatus,
    StreamContext,
};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const ARCHIVE: &str = "content.pak";

/// Deterministic, compressible payload of `len` bytes.
pub fn sample_bytes(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| ((i / 7) as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Archive image built in memory together with the index describing it.
#[derive(Debug, Default)]
pub struct MemoryArchive {
    pub bytes: Vec<u8>,
    entries: HashMap<PathBuf, CompressionDescriptor>,
}

impl MemoryArchive {
    /// Appends `data` compressed with `codec`, behind a few bytes of padding so
    /// payloads never start on an aligned offset.
    pub fn add(
        &mut self,
        logical_path: &str,
        data: &[u8],
        codec: CodecKind,
        policy: ConflictPolicy,
    ) -> CompressionDescriptor {
        let decompressor = codec.decompressor();
        self.add_with(logical_path, data, codec, decompressor, policy)
    }

    pub fn add_with(
        &mut self,
        logical_path: &str,
        data: &[u8],
        codec: CodecKind,
        decompressor: Option<Arc<dyn Decompressor>>,
        policy: ConflictPolicy,
    ) -> CompressionDescriptor {
        self.bytes.extend_from_slice(&[0xAB; 37]);
        let offset = self.bytes.len() as u64;
        let payload = match codec {
            CodecKind::Stored => data.to_vec(),
            other => other.compress(data).expect("compress fixture"),
        };
        self.bytes.extend_from_slice(&payload);

        let descriptor = CompressionDescriptor {
            archive_path: PathBuf::from(ARCHIVE),
            offset,
            compressed_size: payload.len() as u64,
            uncompressed_size: data.len() as u64,
            decompressor,
            is_shared: false,
            conflict_policy: policy,
        };
        self.entries
            .insert(PathBuf::from(logical_path), descriptor.clone());
        descriptor
    }

    pub fn index(&self) -> Arc<dyn ArchiveIndex> {
        Arc::new(MemoryIndex {
            entries: self.entries.clone(),
        })
    }
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
    entries: HashMap<PathBuf, CompressionDescriptor>,
}

impl ArchiveIndex for MemoryIndex {
    fn find_compression_info(&self, path: &Path) -> Option<CompressionDescriptor> {
        self.entries.get(path).cloned()
    }
}

/// Wraps a decompressor and counts calls.
#[derive(Debug)]
pub struct CountingDecompressor {
    inner: Arc<dyn Decompressor>,
    calls: Arc<AtomicUsize>,
}

impl CountingDecompressor {
    pub fn new(inner: Arc<dyn Decompressor>) -> (Arc<dyn Decompressor>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let decompressor = Arc::new(Self {
            inner,
            calls: Arc::clone(&calls),
        });
        (decompressor, calls)
    }
}

impl Decompressor for CountingDecompressor {
    fn name(&self) -> &'static str {
        "counting"
    }

    fn decompress(
        &self,
        descriptor: &CompressionDescriptor,
        src: &[u8],
        dst: &mut [u8],
    ) -> pakstream_core::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.decompress(descriptor, src, dst)
    }
}

/// Blocks every job until the test sends a token through the gate.
#[derive(Debug)]
pub struct GatedDecompressor {
    inner: Arc<dyn Decompressor>,
    gate: Receiver<()>,
}

impl GatedDecompressor {
    pub fn new(inner: Arc<dyn Decompressor>, gate: Receiver<()>) -> Arc<dyn Decompressor> {
        Arc::new(Self { inner, gate })
    }
}

impl Decompressor for GatedDecompressor {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn decompress(
        &self,
        descriptor: &CompressionDescriptor,
        src: &[u8],
        dst: &mut [u8],
    ) -> pakstream_core::Result<()> {
        let _ = self.gate.recv();
        self.inner.decompress(descriptor, src, dst)
    }
}

/// State shared between a [`ScriptedStage`] and the test driving it.
#[derive(Debug, Default)]
pub struct Script {
    /// When set, `execute` serves every held request immediately.
    pub auto: bool,
    pub archive: Vec<u8>,
    pub loose_files: HashMap<PathBuf, Vec<u8>>,
    /// Every request this stage was asked to handle, in arrival order.
    pub received: Vec<(RequestId, &'static str)>,
    /// Raw reads answered with `Failed`.
    pub fail_raw_reads: bool,
    held: VecDeque<RequestId>,
}

impl Script {
    pub fn received_kinds(&self) -> Vec<&'static str> {
        self.received.iter().map(|(_, kind)| *kind).collect()
    }

    pub fn held(&self) -> Vec<RequestId> {
        self.held.iter().copied().collect()
    }

    /// Answers `request` from the scripted files and completes it.
    pub fn serve(&mut self, ctx: &mut StreamContext, request: RequestId) {
        self.held.retain(|held| *held != request);
        let status = match ctx.graph.kind_mut(request) {
            Some(RequestKind::RawRead {
                path,
                offset,
                size,
                buffer: Some(buffer),
                ..
            }) if !self.fail_raw_reads && path.as_path() == Path::new(ARCHIVE) => {
                let start = *offset as usize;
                match self.archive.get(start..start + *size as usize) {
                    Some(payload) => {
                        buffer.payload_mut().copy_from_slice(payload);
                        RequestStatus::Completed
                    }
                    None => RequestStatus::Failed,
                }
            }
            Some(RequestKind::Read {
                path,
                output,
                offset,
                size,
            }) => {
                let source = if path.as_path() == Path::new(ARCHIVE) {
                    Some(&self.archive)
                } else {
                    self.loose_files.get(path.as_path())
                };
                let start = *offset as usize;
                let end = start + *size as usize;
                match source.and_then(|data| data.get(start..end)) {
                    Some(bytes) => {
                        output.with_mut(|dst| dst[..bytes.len()].copy_from_slice(bytes));
                        RequestStatus::Completed
                    }
                    None => RequestStatus::Failed,
                }
            }
            Some(RequestKind::FileExists { path, found }) => {
                *found = self.loose_files.contains_key(path.as_path());
                RequestStatus::Completed
            }
            Some(RequestKind::FileMetadata { path, size }) => {
                match self.loose_files.get(path.as_path()) {
                    Some(data) => {
                        *size = Some(data.len() as u64);
                        RequestStatus::Completed
                    }
                    None => RequestStatus::Failed,
                }
            }
            Some(RequestKind::CreateCache { .. } | RequestKind::DestroyCache { .. }) => {
                RequestStatus::Completed
            }
            _ => RequestStatus::Failed,
        };
        ctx.graph.complete(request, status);
    }

    /// Serves the oldest held request whose kind is `kind`.
    pub fn serve_next(&mut self, ctx: &mut StreamContext, kind: &str) -> Option<RequestId> {
        let request = self
            .held
            .iter()
            .copied()
            .find(|id| ctx.graph.kind(*id).is_some_and(|k| k.name() == kind))?;
        self.serve(ctx, request);
        Some(request)
    }
}

/// Storage double sitting below the decompressor.
#[derive(Debug, Clone, Default)]
pub struct ScriptedStage {
    script: Arc<Mutex<Script>>,
}

impl ScriptedStage {
    pub fn new(archive: Vec<u8>, auto: bool) -> Self {
        let stage = Self::default();
        {
            let mut script = stage.script();
            script.archive = archive;
            script.auto = auto;
        }
        stage
    }

    pub fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().expect("script lock poisoned")
    }
}

impl StreamStage for ScriptedStage {
    fn name(&self) -> &str {
        "scripted"
    }

    fn prepare(&mut self, ctx: &mut StreamContext, request: RequestId) {
        ctx.push_prepared(request);
    }

    fn queue(&mut self, ctx: &mut StreamContext, request: RequestId) {
        let kind = ctx.graph.kind(request).map_or("released", RequestKind::name);
        ctx.graph.set_status(request, RequestStatus::Queued);
        let mut script = self.script();
        script.received.push((request, kind));
        script.held.push_back(request);
    }

    fn execute(&mut self, ctx: &mut StreamContext) -> bool {
        let mut script = self.script();
        if !script.auto {
            return false;
        }
        let mut did_work = false;
        while let Some(request) = script.held.pop_front() {
            script.serve(ctx, request);
            did_work = true;
        }
        did_work
    }

    fn update_status(&self, status: &mut StageStatus) {
        status.is_idle = status.is_idle && self.is_idle();
    }

    fn estimate_completion(
        &mut self,
        ctx: &mut StreamContext,
        now: Instant,
        _pending: &mut Vec<RequestId>,
    ) {
        for request in self.script().held.iter() {
            ctx.graph.set_estimated_completion(*request, now);
        }
    }

    fn collect_statistics(&self, sink: &mut dyn StatisticsSink) {
        sink.record(Statistic::u64(
            "scripted",
            "held",
            self.script().held.len() as u64,
        ));
    }

    fn is_idle(&self) -> bool {
        self.script().held.is_empty()
    }
}

/// Decompressor over `archive` with a scripted stage below it, driven by hand.
pub struct Harness {
    pub ctx: StreamContext,
    pub stage: FullFileDecompressor,
    pub storage: ScriptedStage,
    pub pool: Arc<BufferPool>,
}

impl Harness {
    pub fn new(
        config: DecompressorConfig,
        archive: &MemoryArchive,
        auto: bool,
    ) -> pakstream_core::Result<Self> {
        let ctx = StreamContext::new();
        let pool = Arc::new(BufferPool::new(0, 8));
        let storage = ScriptedStage::new(archive.bytes.clone(), auto);
        let stage = FullFileDecompressor::new(config, archive.index(), Arc::clone(&pool), ctx.waker())?
            .with_next(Box::new(storage.clone()));
        Ok(Self {
            ctx,
            stage,
            storage,
            pool,
        })
    }

    /// Submits an external read and runs it through `prepare`/`queue`.
    pub fn read(&mut self, path: &str, offset: u64, size: u64) -> (RequestId, OutputBuffer) {
        let output = OutputBuffer::with_len(size as usize);
        let request = self.ctx.graph.create(RequestKind::Read {
            path: PathBuf::from(path),
            output: output.clone(),
            offset,
            size,
        });
        self.submit(request);
        (request, output)
    }

    pub fn submit(&mut self, request: RequestId) {
        self.stage.prepare(&mut self.ctx, request);
        self.flush_prepared();
    }

    pub fn flush_prepared(&mut self) {
        while let Some(prepared) = self.ctx.pop_prepared() {
            if self.ctx.graph.contains(prepared) {
                self.stage.queue(&mut self.ctx, prepared);
            }
        }
    }

    /// Runs parked continuations, then re-queues anything they published.
    pub fn drain_completions(&mut self) -> bool {
        let mut drained = false;
        while self.ctx.graph.has_completions() {
            for record in self.ctx.graph.take_completions() {
                self.stage.on_completion(&mut self.ctx, record);
                drained = true;
            }
            self.flush_prepared();
        }
        drained
    }

    pub fn execute(&mut self) -> bool {
        let did_work = self.stage.execute(&mut self.ctx);
        self.drain_completions() || did_work
    }

    /// Serves the oldest held raw read and runs its continuation.
    pub fn complete_raw_read(&mut self) -> Option<RequestId> {
        let served = self.storage.script().serve_next(&mut self.ctx, "raw_read");
        self.drain_completions();
        served
    }

    /// Executes until `request` is terminal or the deadline passes.
    pub fn run_until_complete(&mut self, request: RequestId) -> Option<RequestStatus> {
        let deadline = Instant::now() + std::time::Duration::from_secs(10);
        while Instant::now() < deadline {
            if let Some(status) = self.ctx.graph.status(request) {
                if status.is_terminal() {
                    return Some(status);
                }
            }
            if !self.execute() {
                self.ctx.wait_for_wake(std::time::Duration::from_millis(5));
            }
        }
        self.ctx.graph.status(request)
    }

    /// Executes until the stage reports idle or the deadline passes.
    pub fn run_until_idle(&mut self) -> bool {
        let deadline = Instant::now() + std::time::Duration::from_secs(10);
        while Instant::now() < deadline {
            let progressed = self.execute();
            if !progressed && self.stage.is_idle() && self.storage.is_idle() {
                return true;
            }
            if !progressed {
                self.ctx.wait_for_wake(std::time::Duration::from_millis(5));
            }
        }
        false
    }
}
