use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::archive::{ArchiveIndex, CompressionDescriptor};
use crate::telemetry;
use crate::telemetry::{profile, tags};

const PROFILE_TAG_STACK_LOOKUP: [&str; 2] = [tags::TAG_SYSTEM, tags::TAG_LOOKUP];

/// Resolves logical paths through an [`ArchiveIndex`].
///
/// A miss is not an error: the caller forwards the request unmodified. Entries
/// whose metadata cannot be served safely are reported as misses too, so a bad
/// catalog row degrades to a plain file lookup instead of a failed read deep in
/// the pipeline.
#[derive(Clone)]
pub struct ArchiveLookup {
    index: Arc<dyn ArchiveIndex>,
}

impl ArchiveLookup {
    pub fn new(index: Arc<dyn ArchiveIndex>) -> Self {
        Self { index }
    }

    pub fn resolve(&self, path: &Path) -> Option<CompressionDescriptor> {
        let started_at = Instant::now();
        let resolved = self
            .index
            .find_compression_info(path)
            .and_then(|descriptor| match validate(&descriptor) {
                Ok(()) => Some(descriptor),
                Err(reason) => {
                    tracing::warn!(
                        target: tags::PROFILE_LOOKUP,
                        path = %path.display(),
                        archive = %descriptor.archive_path.display(),
                        reason,
                        "ignoring unusable archive entry"
                    );
                    telemetry::increment_counter(
                        tags::METRIC_LOOKUP_REJECTED_COUNT,
                        1,
                        &[("subsystem", "lookup"), ("result", "rejected")],
                    );
                    None
                }
            });

        let result = if resolved.is_some() { "hit" } else { "miss" };
        telemetry::increment_counter(
            if resolved.is_some() {
                tags::METRIC_LOOKUP_HIT_COUNT
            } else {
                tags::METRIC_LOOKUP_MISS_COUNT
            },
            1,
            &[("subsystem", "lookup"), ("result", result)],
        );
        profile::event(
            tags::PROFILE_LOOKUP,
            &PROFILE_TAG_STACK_LOOKUP,
            "resolve",
            result,
            profile::elapsed_us(started_at),
            "archive lookup completed",
        );
        resolved
    }

    /// True when `path` resolves to a usable archive entry.
    pub fn contains(&self, path: &Path) -> bool {
        self.resolve(path).is_some()
    }
}

fn validate(descriptor: &CompressionDescriptor) -> Result<(), &'static str> {
    if descriptor.payload_end().is_none() {
        return Err("payload range overflows");
    }
    if descriptor.is_compressed() {
        if descriptor.uncompressed_size == 0 && descriptor.compressed_size != 0 {
            return Err("compressed payload declares zero uncompressed bytes");
        }
    } else if descriptor.compressed_size != descriptor.uncompressed_size {
        return Err("stored entry sizes disagree");
    }
    if usize::try_from(descriptor.uncompressed_size).is_err()
        || usize::try_from(descriptor.compressed_size).is_err()
    {
        return Err("entry does not fit in memory");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use super::*;
    use crate::archive::ConflictPolicy;
    use crate::codec::CodecKind;

    struct MapIndex(HashMap<PathBuf, CompressionDescriptor>);

    impl ArchiveIndex for MapIndex {
        fn find_compression_info(&self, path: &Path) -> Option<CompressionDescriptor> {
            self.0.get(path).cloned()
        }
    }

    fn descriptor(offset: u64, compressed: u64, uncompressed: u64) -> CompressionDescriptor {
        CompressionDescriptor {
            archive_path: PathBuf::from("data.pak"),
            offset,
            compressed_size: compressed,
            uncompressed_size: uncompressed,
            decompressor: CodecKind::Lz4.decompressor(),
            is_shared: false,
            conflict_policy: ConflictPolicy::PreferArchive,
        }
    }

    fn lookup_with(entries: Vec<(&str, CompressionDescriptor)>) -> ArchiveLookup {
        let map = entries
            .into_iter()
            .map(|(path, descriptor)| (PathBuf::from(path), descriptor))
            .collect();
        ArchiveLookup::new(Arc::new(MapIndex(map)))
    }

    #[test]
    fn resolves_known_entries_and_misses_unknown() {
        let lookup = lookup_with(vec![("a.bin", descriptor(0, 10, 20))]);
        let found = lookup.resolve(Path::new("a.bin"));
        assert_eq!(found.map(|d| d.uncompressed_size), Some(20));
        assert!(lookup.resolve(Path::new("b.bin")).is_none());
    }

    #[test]
    fn overflowing_payload_is_treated_as_miss() {
        let lookup = lookup_with(vec![("a.bin", descriptor(u64::MAX - 4, 10, 20))]);
        assert!(!lookup.contains(Path::new("a.bin")));
    }

    #[test]
    fn compressed_entry_without_output_is_treated_as_miss() {
        let lookup = lookup_with(vec![("a.bin", descriptor(0, 10, 0))]);
        assert!(!lookup.contains(Path::new("a.bin")));
    }
}
