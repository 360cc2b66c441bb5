pub mod catalog;
pub mod index;
pub mod lookup;

pub use catalog::{
    ArchiveBuilder, ArchiveCatalog, CatalogEntry, CatalogManifest, manifest_path_for,
    normalize_logical_path,
};
pub use index::{ArchiveIndex, CompressionDescriptor, ConflictPolicy};
pub use lookup::ArchiveLookup;
