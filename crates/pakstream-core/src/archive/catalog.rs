use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use jwalk::WalkDir;
use serde::{Deserialize, Serialize};

use crate::archive::{ArchiveIndex, CompressionDescriptor, ConflictPolicy};
use crate::codec::CodecKind;
use crate::{Result, StreamError};

pub const CATALOG_VERSION: u32 = 1;

/// One archived file as recorded in the JSON catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Logical path, `/`-separated and relative.
    pub path: String,
    pub offset: u64,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub codec: CodecKind,
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,
    #[serde(default)]
    pub shared: bool,
}

/// On-disk catalog written next to an archive as `<archive>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogManifest {
    pub version: u32,
    /// Archive file name, relative to the manifest's directory.
    pub archive: PathBuf,
    pub entries: Vec<CatalogEntry>,
}

/// Path of the catalog that belongs to `archive_path`.
pub fn manifest_path_for(archive_path: &Path) -> PathBuf {
    let mut name = archive_path.as_os_str().to_owned();
    name.push(".json");
    PathBuf::from(name)
}

/// Canonical lookup key for a logical path: relative, `/`-separated, no `.`.
pub fn normalize_logical_path(path: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_str()?),
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) | Component::ParentDir => return None,
        }
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// In-memory [`ArchiveIndex`] over a single archive file.
#[derive(Debug, Clone)]
pub struct ArchiveCatalog {
    archive_path: PathBuf,
    entries: HashMap<String, CatalogEntry>,
}

impl ArchiveCatalog {
    /// Builds a catalog, resolving the manifest's archive name against `base_dir`.
    pub fn from_manifest(manifest: CatalogManifest, base_dir: &Path) -> Result<Self> {
        if manifest.version != CATALOG_VERSION {
            return Err(StreamError::InvalidCatalog(format!(
                "unsupported catalog version {}",
                manifest.version
            )));
        }

        let mut entries = HashMap::with_capacity(manifest.entries.len());
        for entry in manifest.entries {
            let key = normalize_logical_path(Path::new(&entry.path)).ok_or_else(|| {
                StreamError::InvalidCatalog(format!("invalid entry path {:?}", entry.path))
            })?;
            if entries.insert(key, entry).is_some() {
                return Err(StreamError::InvalidCatalog(
                    "duplicate entry path in catalog".to_string(),
                ));
            }
        }

        Ok(Self {
            archive_path: base_dir.join(manifest.archive),
            entries,
        })
    }

    /// Loads the catalog stored at `manifest_path`.
    pub fn load(manifest_path: &Path) -> Result<Self> {
        let raw = fs::read(manifest_path)
            .map_err(|err| StreamError::from(err).with_context(manifest_path.display().to_string()))?;
        let manifest: CatalogManifest = serde_json::from_slice(&raw)?;
        let base_dir = manifest_path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_manifest(manifest, base_dir)
    }

    /// Loads the catalog that [`ArchiveBuilder`] wrote for `archive_path`.
    pub fn open(archive_path: &Path) -> Result<Self> {
        Self::load(&manifest_path_for(archive_path))
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, path: &Path) -> Option<&CatalogEntry> {
        normalize_logical_path(path).and_then(|key| self.entries.get(&key))
    }

    /// Entries sorted by logical path.
    pub fn entries(&self) -> Vec<&CatalogEntry> {
        let mut entries: Vec<_> = self.entries.values().collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// Overrides the conflict policy of every entry.
    pub fn set_conflict_policy(&mut self, policy: ConflictPolicy) {
        for entry in self.entries.values_mut() {
            entry.conflict_policy = policy;
        }
    }
}

impl ArchiveIndex for ArchiveCatalog {
    fn find_compression_info(&self, path: &Path) -> Option<CompressionDescriptor> {
        let entry = self.entry(path)?;
        Some(CompressionDescriptor {
            archive_path: self.archive_path.clone(),
            offset: entry.offset,
            compressed_size: entry.compressed_size,
            uncompressed_size: entry.uncompressed_size,
            decompressor: entry.codec.decompressor(),
            is_shared: entry.shared,
            conflict_policy: entry.conflict_policy,
        })
    }
}

/// Writes an archive file and its catalog.
///
/// Entries are appended back to back; each is encoded with the builder's codec
/// unless compression would not shrink it, in which case it is stored.
#[derive(Debug)]
pub struct ArchiveBuilder {
    archive_path: PathBuf,
    writer: BufWriter<File>,
    codec: CodecKind,
    conflict_policy: ConflictPolicy,
    offset: u64,
    entries: Vec<CatalogEntry>,
}

impl ArchiveBuilder {
    pub fn create(archive_path: impl Into<PathBuf>, codec: CodecKind) -> Result<Self> {
        let archive_path = archive_path.into();
        let file = File::create(&archive_path).map_err(|err| {
            StreamError::from(err).with_context(archive_path.display().to_string())
        })?;
        Ok(Self {
            archive_path,
            writer: BufWriter::new(file),
            codec,
            conflict_policy: ConflictPolicy::default(),
            offset: 0,
            entries: Vec::new(),
        })
    }

    /// Policy recorded for entries added after this call.
    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn add_bytes(&mut self, logical_path: &str, data: &[u8]) -> Result<&CatalogEntry> {
        let path = normalize_logical_path(Path::new(logical_path)).ok_or_else(|| {
            StreamError::InvalidCatalog(format!("invalid entry path {logical_path:?}"))
        })?;
        if self.entries.iter().any(|entry| entry.path == path) {
            return Err(StreamError::InvalidCatalog(format!(
                "entry {path} added twice"
            )));
        }

        let mut codec = self.codec;
        let mut payload = codec.compress(data)?;
        if codec != CodecKind::Stored && payload.len() >= data.len() {
            codec = CodecKind::Stored;
            payload = data.to_vec();
        }

        self.writer.write_all(&payload)?;
        let entry = CatalogEntry {
            path,
            offset: self.offset,
            compressed_size: payload.len() as u64,
            uncompressed_size: data.len() as u64,
            codec,
            conflict_policy: self.conflict_policy,
            shared: false,
        };
        self.offset += entry.compressed_size;
        tracing::debug!(
            path = %entry.path,
            codec = entry.codec.as_str(),
            compressed = entry.compressed_size,
            uncompressed = entry.uncompressed_size,
            "archived entry"
        );
        self.entries.push(entry);
        self.entries
            .last()
            .ok_or_else(|| StreamError::InvalidCatalog(format!("entry {logical_path} was not recorded")))
    }

    pub fn add_file(&mut self, logical_path: &str, source: &Path) -> Result<&CatalogEntry> {
        let data = fs::read(source)
            .map_err(|err| StreamError::from(err).with_context(source.display().to_string()))?;
        self.add_bytes(logical_path, &data)
    }

    /// Adds every regular file under `root`, keyed by its path relative to `root`.
    pub fn add_directory(&mut self, root: &Path) -> Result<usize> {
        if !root.is_dir() {
            return Err(StreamError::InvalidConfig(
                "archive source must be a directory",
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(root).sort(true) {
            let entry = entry.map_err(anyhow::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path
                .strip_prefix(root)
                .map_err(|_| StreamError::InvalidCatalog("walked outside the source root".into()))?;
            let logical = normalize_logical_path(relative).ok_or_else(|| {
                StreamError::InvalidCatalog(format!("non UTF-8 path {}", relative.display()))
            })?;
            files.push((logical, path));
        }
        files.sort();

        for (logical, path) in &files {
            self.add_file(logical, path)?;
        }
        Ok(files.len())
    }

    /// Flushes the archive and writes `<archive>.json`.
    pub fn finish(mut self) -> Result<CatalogManifest> {
        self.writer.flush()?;
        let archive = self
            .archive_path
            .file_name()
            .map(PathBuf::from)
            .ok_or(StreamError::InvalidConfig("archive path has no file name"))?;
        let manifest = CatalogManifest {
            version: CATALOG_VERSION,
            archive,
            entries: self.entries,
        };

        let manifest_path = manifest_path_for(&self.archive_path);
        let encoded = serde_json::to_vec_pretty(&manifest)?;
        fs::write(&manifest_path, encoded).map_err(|err| {
            StreamError::from(err).with_context(manifest_path.display().to_string())
        })?;
        tracing::info!(
            archive = %self.archive_path.display(),
            entries = manifest.entries.len(),
            bytes = self.offset,
            "archive written"
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_logical_paths() {
        assert_eq!(
            normalize_logical_path(Path::new("./textures/a.bin")).as_deref(),
            Some("textures/a.bin")
        );
        assert!(normalize_logical_path(Path::new("../escape.bin")).is_none());
        assert!(normalize_logical_path(Path::new("")).is_none());
    }

    #[test]
    fn manifest_sits_next_to_archive() {
        assert_eq!(
            manifest_path_for(Path::new("out/data.pak")),
            PathBuf::from("out/data.pak.json")
        );
    }

    #[test]
    fn rejects_unknown_catalog_version() {
        let manifest = CatalogManifest {
            version: 99,
            archive: PathBuf::from("data.pak"),
            entries: Vec::new(),
        };
        assert!(ArchiveCatalog::from_manifest(manifest, Path::new(".")).is_err());
    }

    #[test]
    fn incompressible_entries_are_stored() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("data.pak");
        let mut builder = ArchiveBuilder::create(&archive, CodecKind::Lz4)?;
        let entry = builder.add_bytes("tiny.bin", b"ab")?;
        assert_eq!(entry.codec, CodecKind::Stored);
        assert_eq!(entry.compressed_size, 2);
        builder.finish()?;

        let catalog = ArchiveCatalog::open(&archive)?;
        let descriptor = catalog
            .find_compression_info(Path::new("tiny.bin"))
            .ok_or(StreamError::UnknownRequest)?;
        assert!(!descriptor.is_compressed());
        assert_eq!(descriptor.archive_path, archive);
        Ok(())
    }

    #[test]
    fn added_entries_follow_each_other() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut builder = ArchiveBuilder::create(dir.path().join("seq.pak"), CodecKind::Stored)?;
        let first = builder.add_bytes("a.bin", b"abcd")?.clone();
        let second = builder.add_bytes("b.bin", b"xyz")?;
        assert_eq!(first.path, "a.bin");
        assert_eq!(first.offset, 0);
        assert_eq!(second.path, "b.bin");
        assert_eq!(second.offset, 4);
        assert_eq!(second.uncompressed_size, 3);
        assert!(builder.add_bytes("a.bin", b"again").is_err());
        Ok(())
    }
}
