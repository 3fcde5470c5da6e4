// rust/input-core/src/storage/traits.rs

//! Read-only storage traits used by the file sources.
//!
//! Input pipelines never write, so the backend only exposes listing,
//! metadata and ranged reads.

use std::path::Path;

use crate::error::Result;

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Whether this object is a directory.
    pub is_dir: bool,
}

/// A handle for reading an object by byte range.
pub trait StorageReader: Send {
    /// Returns the total size of the object in bytes.
    fn size(&self) -> u64;

    /// Reads `length` bytes starting at `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or the range is out of bounds.
    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>>;
}

/// The storage backend the sharded file source reads through.
///
/// This trait is object-safe and is shared as `Arc<dyn StorageBackend>`.
pub trait StorageBackend: Send + Sync {
    /// Checks if an object exists at the given path.
    fn exists(&self, path: &Path) -> Result<bool>;

    /// Retrieves metadata for an object.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or metadata cannot be read.
    fn metadata(&self, path: &Path) -> Result<ObjectMeta>;

    /// Opens an object for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the object doesn't exist or cannot be opened.
    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>>;

    /// Lists the entries of a directory, sorted by name.
    ///
    /// A missing directory lists as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the path is not a directory or the listing fails.
    fn list(&self, dir: &Path) -> Result<Vec<String>>;
}
