use std::path::PathBuf;

use crate::archive::{CompressionDescriptor, ConflictPolicy};
use crate::buffer::OutputBuffer;
use crate::decompressor::FullFileDecompressor;
use crate::request::{Continuation, RequestId, RequestKind, StreamContext};
use crate::telemetry;
use crate::telemetry::tags;
use crate::types::{FileRange, RequestStatus, Result};
use crate::StreamError;

/// Caller request that resolved to an archive entry.
pub(super) enum ArchivedRequest {
    Read {
        output: OutputBuffer,
        offset: u64,
        size: u64,
    },
    CreateCache {
        range: Option<FileRange>,
    },
    DestroyCache {
        range: Option<FileRange>,
    },
}

impl FullFileDecompressor {
    /// Resolves `request` against the archive index if it is a kind this stage rewrites.
    pub(super) fn plan_archived(
        &self,
        ctx: &StreamContext,
        request: RequestId,
    ) -> Option<(PathBuf, CompressionDescriptor, ArchivedRequest)> {
        let (path, archived) = match ctx.graph.kind(request)? {
            RequestKind::Read {
                path,
                output,
                offset,
                size,
            } => (
                path,
                ArchivedRequest::Read {
                    output: output.clone(),
                    offset: *offset,
                    size: *size,
                },
            ),
            RequestKind::CreateCache { path, range } => {
                (path, ArchivedRequest::CreateCache { range: *range })
            }
            RequestKind::DestroyCache { path, range } => {
                (path, ArchivedRequest::DestroyCache { range: *range })
            }
            _ => return None,
        };
        let descriptor = self.lookup.resolve(path)?;
        Some((path.clone(), descriptor, archived))
    }

    pub(super) fn prepare_archived(
        &mut self,
        ctx: &mut StreamContext,
        original: RequestId,
        logical_path: PathBuf,
        descriptor: CompressionDescriptor,
        archived: ArchivedRequest,
    ) {
        let policy = descriptor.conflict_policy;
        match build_synthetic(ctx, original, descriptor, archived) {
            Ok(synthetic) => self.publish_or_probe(ctx, logical_path, synthetic, policy),
            Err(error) => {
                tracing::warn!(
                    target: tags::PROFILE_DECOMPRESSOR,
                    path = %logical_path.display(),
                    %error,
                    "archived request rejected"
                );
                ctx.graph.complete(original, RequestStatus::Failed);
            }
        }
    }

    /// Publishes `synthetic` now, or first asks the stage below whether a loose
    /// copy of `logical_path` exists.
    fn publish_or_probe(
        &mut self,
        ctx: &mut StreamContext,
        logical_path: PathBuf,
        synthetic: RequestId,
        policy: ConflictPolicy,
    ) {
        if !policy.requires_probe() {
            ctx.push_prepared(synthetic);
            return;
        }
        let Some(next) = self.next.as_mut() else {
            ctx.push_prepared(synthetic);
            return;
        };

        let probe = ctx.graph.create_internal(
            None,
            RequestKind::FileExists {
                path: logical_path,
                found: false,
            },
        );
        let probe = match probe.and_then(|probe| {
            ctx.graph
                .set_continuation(probe, Continuation::ExistsProbe { synthetic })
                .map(|()| probe)
        }) {
            Ok(probe) => probe,
            Err(error) => {
                tracing::warn!(target: tags::PROFILE_DECOMPRESSOR, %error, "loose file probe not issued");
                ctx.push_prepared(synthetic);
                return;
            }
        };

        telemetry::increment_counter(
            tags::METRIC_CONFLICT_PROBE_COUNT,
            1,
            &[("subsystem", "decompressor"), ("op", "conflict_probe")],
        );
        next.queue(ctx, probe);
    }

    /// Continuation of a loose-file probe.
    pub(super) fn finish_probe(
        &mut self,
        ctx: &mut StreamContext,
        probe: RequestId,
        synthetic: RequestId,
    ) {
        // A failed probe counts as "not found"; the archive copy is still valid.
        let shadowed = ctx.graph.status(probe) == Some(RequestStatus::Completed)
            && matches!(
                ctx.graph.kind(probe),
                Some(RequestKind::FileExists { found: true, .. })
            );
        ctx.graph.retire(probe);

        if !shadowed {
            if ctx.graph.contains(synthetic) {
                ctx.push_prepared(synthetic);
            }
            return;
        }

        match ctx.graph.reject(synthetic) {
            Some(original) => {
                telemetry::increment_counter(
                    tags::METRIC_CONFLICT_LOOSE_FILE_COUNT,
                    1,
                    &[("subsystem", "decompressor"), ("op", "conflict_probe"), ("result", "loose")],
                );
                tracing::debug!(
                    target: tags::PROFILE_DECOMPRESSOR,
                    request = %original,
                    "loose file shadows archive entry"
                );
                ctx.graph.set_status(original, RequestStatus::Pending);
                self.forward_prepare(ctx, original);
            }
            None => {
                tracing::debug!(
                    target: tags::PROFILE_DECOMPRESSOR,
                    "shadowed request was released before its probe finished"
                );
            }
        }
    }
}

/// Builds the unpublished synthetic chain for an archived request.
///
/// Compressed reads become a single `CompressedRead` child. Everything that
/// addresses the archive file directly goes through a `PathStore` layer.
fn build_synthetic(
    ctx: &mut StreamContext,
    original: RequestId,
    descriptor: CompressionDescriptor,
    archived: ArchivedRequest,
) -> Result<RequestId> {
    match archived {
        ArchivedRequest::Read {
            output,
            offset,
            size,
        } => {
            if !descriptor.contains_range(offset, size) {
                return Err(StreamError::OutOfRange {
                    offset,
                    size,
                    len: descriptor.uncompressed_size,
                });
            }
            if descriptor.is_compressed() {
                return ctx.graph.create_internal(
                    Some(original),
                    RequestKind::CompressedRead {
                        descriptor,
                        output,
                        offset,
                        size,
                    },
                );
            }

            let archive_offset = descriptor.offset + offset;
            let path = descriptor.archive_path;
            let store = ctx
                .graph
                .create_internal(Some(original), RequestKind::PathStore { path: path.clone() })?;
            ctx.graph.create_internal(
                Some(store),
                RequestKind::Read {
                    path,
                    output,
                    offset: archive_offset,
                    size,
                },
            )
        }
        ArchivedRequest::CreateCache { range } => {
            let range = archive_range(&descriptor, range);
            let path = descriptor.archive_path;
            let store = ctx
                .graph
                .create_internal(Some(original), RequestKind::PathStore { path: path.clone() })?;
            ctx.graph.create_internal(
                Some(store),
                RequestKind::CreateCache {
                    path,
                    range: Some(range),
                },
            )
        }
        ArchivedRequest::DestroyCache { range } => {
            let range = archive_range(&descriptor, range);
            let path = descriptor.archive_path;
            let store = ctx
                .graph
                .create_internal(Some(original), RequestKind::PathStore { path: path.clone() })?;
            ctx.graph.create_internal(
                Some(store),
                RequestKind::DestroyCache {
                    path,
                    range: Some(range),
                },
            )
        }
    }
}

/// Archive bytes a cache request has to cover.
///
/// Compressed entries can only be cached whole. Stored entries map a requested
/// sub-range directly.
fn archive_range(descriptor: &CompressionDescriptor, range: Option<FileRange>) -> FileRange {
    let whole = FileRange::new(descriptor.offset, descriptor.compressed_size);
    match range {
        Some(range) if !descriptor.is_compressed() && descriptor.contains_range(range.offset, range.size) => {
            FileRange::new(descriptor.offset + range.offset, range.size)
        }
        _ => whole,
    }
}
