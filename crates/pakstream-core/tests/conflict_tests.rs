mod support;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use pakstream_core::request::RequestKind;
use pakstream_core::{CodecKind, ConflictPolicy, DecompressorConfig, RequestStatus};

use support::{CountingDecompressor, Harness, MemoryArchive, TestResult, sample_bytes};

fn harness_with_entry(
    policy: ConflictPolicy,
    data: &[u8],
) -> pakstream_core::Result<(Harness, Arc<std::sync::atomic::AtomicUsize>)> {
    let (decompressor, calls) = CountingDecompressor::new(Arc::new(pakstream_core::ZstdDecompressor));
    let mut archive = MemoryArchive::default();
    archive.add_with("shader.bin", data, CodecKind::Zstd, Some(decompressor), policy);
    let harness = Harness::new(DecompressorConfig::new(2, 2, 512), &archive, true)?;
    Ok((harness, calls))
}

#[test]
fn loose_file_wins_when_it_exists() -> TestResult {
    let archived = sample_bytes(1, 1500);
    let loose = b"patched shader".to_vec();
    let (mut h, calls) = harness_with_entry(ConflictPolicy::PreferLooseFile, &archived)?;
    h.storage
        .script()
        .loose_files
        .insert(PathBuf::from("shader.bin"), loose.clone());

    let (request, output) = h.read("shader.bin", 0, loose.len() as u64);
    assert_eq!(h.run_until_complete(request), Some(RequestStatus::Completed));
    assert_eq!(output.to_vec(), loose);

    // The probe ran, then the caller's own read went down unchanged.
    let received = h.storage.script().received.clone();
    let kinds: Vec<_> = received.iter().map(|(_, kind)| *kind).collect();
    assert_eq!(kinds, vec!["file_exists", "read"]);
    assert_eq!(received[1].0, request);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(h.run_until_idle());
    assert_eq!(h.pool.metrics().outstanding, 0);
    Ok(())
}

#[test]
fn archive_serves_when_no_loose_file_exists() -> TestResult {
    let archived = sample_bytes(2, 1500);
    let (mut h, calls) = harness_with_entry(ConflictPolicy::PreferLooseFile, &archived)?;

    let (request, output) = h.read("shader.bin", 0, archived.len() as u64);
    assert_eq!(h.run_until_complete(request), Some(RequestStatus::Completed));
    assert_eq!(output.to_vec(), archived);
    assert_eq!(
        h.storage.script().received_kinds(),
        vec!["file_exists", "raw_read"]
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn prefer_archive_never_probes() -> TestResult {
    let archived = sample_bytes(3, 800);
    let (mut h, _) = harness_with_entry(ConflictPolicy::PreferArchive, &archived)?;
    h.storage
        .script()
        .loose_files
        .insert(PathBuf::from("shader.bin"), b"ignored".to_vec());

    let (request, output) = h.read("shader.bin", 0, archived.len() as u64);
    assert_eq!(h.run_until_complete(request), Some(RequestStatus::Completed));
    assert_eq!(output.to_vec(), archived);
    assert_eq!(h.storage.script().received_kinds(), vec!["raw_read"]);
    Ok(())
}

#[test]
fn probe_is_pending_until_storage_answers() -> TestResult {
    let archived = sample_bytes(4, 600);
    let mut archive = MemoryArchive::default();
    archive.add("a.bin", &archived, CodecKind::Lz4, ConflictPolicy::PreferLooseFile);
    let mut h = Harness::new(DecompressorConfig::new(1, 1, 512), &archive, false)?;

    let (request, _) = h.read("a.bin", 0, 600);
    assert_eq!(h.stage.num_queued_reads(), 0);
    assert_eq!(h.storage.script().received_kinds(), vec!["file_exists"]);
    assert_eq!(h.ctx.graph.status(request), Some(RequestStatus::Pending));

    // Answering "not found" publishes the archive read.
    let probe = h.storage.script().serve_next(&mut h.ctx, "file_exists");
    assert!(probe.is_some());
    h.drain_completions();
    assert_eq!(h.stage.num_queued_reads(), 1);
    Ok(())
}

#[test]
fn cache_requests_follow_the_loose_file() -> TestResult {
    let archived = sample_bytes(5, 900);
    let (mut h, _) = harness_with_entry(ConflictPolicy::PreferLooseFile, &archived)?;
    h.storage
        .script()
        .loose_files
        .insert(PathBuf::from("shader.bin"), b"loose".to_vec());

    let request = h.ctx.graph.create(RequestKind::CreateCache {
        path: PathBuf::from("shader.bin"),
        range: None,
    });
    h.submit(request);
    assert!(h.run_until_idle());

    let received = h.storage.script().received.clone();
    assert_eq!(received.len(), 2);
    assert_eq!(received[1], (request, "create_cache"));
    assert_eq!(h.ctx.graph.status(request), Some(RequestStatus::Completed));
    Ok(())
}
