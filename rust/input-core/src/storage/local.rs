// rust/input-core/src/storage/local.rs

//! Local filesystem storage backend.
//!
//! Small record files are read through a buffered reader; files at or above
//! the configured threshold are memory-mapped.

use std::fs::{self, File};
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use super::traits::{ObjectMeta, StorageBackend, StorageReader};
use crate::config::ReaderConfig;
use crate::error::{InputError, Result};

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    /// Buffer size for buffered reads.
    buffer_size: usize,
    /// Whether to use memory-mapped I/O.
    use_mmap: bool,
    /// File size threshold above which to use mmap.
    mmap_threshold: u64,
}

impl LocalStorage {
    /// Creates a new `LocalStorage` from the reader configuration.
    pub fn new(config: &ReaderConfig) -> Self {
        Self {
            buffer_size: config.read_buffer_size,
            use_mmap: config.use_mmap,
            mmap_threshold: config.mmap_threshold,
        }
    }
}

impl StorageBackend for LocalStorage {
    fn exists(&self, path: &Path) -> Result<bool> {
        Ok(path.exists())
    }

    fn metadata(&self, path: &Path) -> Result<ObjectMeta> {
        let meta = fs::metadata(path).map_err(|e| {
            InputError::storage_with_source(path, "failed to read metadata", e)
        })?;

        Ok(ObjectMeta {
            is_dir: meta.is_dir(),
        })
    }

    fn open_read(&self, path: &Path) -> Result<Box<dyn StorageReader>> {
        let file = File::open(path)
            .map_err(|e| InputError::storage_with_source(path, "failed to open file", e))?;

        let size = file
            .metadata()
            .map_err(|e| InputError::storage_with_source(path, "failed to read file metadata", e))?
            .len();

        if self.use_mmap && size > 0 && size >= self.mmap_threshold {
            // SAFETY: the file is opened read-only and the map lives as long
            // as the reader. Record files are not modified while a pipeline
            // reads them.
            let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
                InputError::storage_with_source(path, "failed to memory-map file", e)
            })?;

            Ok(Box::new(MmapReader {
                path: path.to_path_buf(),
                mmap,
            }))
        } else {
            Ok(Box::new(LocalReader {
                path: path.to_path_buf(),
                reader: BufReader::with_capacity(self.buffer_size, file),
                size,
            }))
        }
    }

    fn list(&self, dir: &Path) -> Result<Vec<String>> {
        if !dir.exists() {
            return Ok(Vec::new());
        }

        if !dir.is_dir() {
            return Err(InputError::storage(dir, "path is not a directory"));
        }

        let mut entries = Vec::new();

        for entry in fs::read_dir(dir)
            .map_err(|e| InputError::storage_with_source(dir, "failed to read directory", e))?
        {
            let entry = entry.map_err(|e| {
                InputError::storage_with_source(dir, "failed to read directory entry", e)
            })?;

            if let Some(name) = entry.file_name().to_str() {
                entries.push(name.to_string());
            }
        }

        entries.sort();
        Ok(entries)
    }
}

/// Buffered file reader.
struct LocalReader {
    path: PathBuf,
    reader: BufReader<File>,
    size: u64,
}

impl StorageReader for LocalReader {
    fn size(&self) -> u64 {
        self.size
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        self.reader.seek(SeekFrom::Start(start)).map_err(|e| {
            InputError::storage_with_source(
                &self.path,
                format!("failed to seek to position {start}"),
                e,
            )
        })?;

        let mut buf = vec![0u8; length];
        self.reader.read_exact(&mut buf).map_err(|e| {
            InputError::storage_with_source(
                &self.path,
                format!("failed to read {length} bytes at position {start}"),
                e,
            )
        })?;

        Ok(buf)
    }
}

/// Memory-mapped file reader.
struct MmapReader {
    path: PathBuf,
    mmap: Mmap,
}

impl StorageReader for MmapReader {
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    fn read_range(&mut self, start: u64, length: usize) -> Result<Vec<u8>> {
        let start = start as usize;
        let end = start + length;

        if end > self.mmap.len() {
            return Err(InputError::storage(
                &self.path,
                format!(
                    "read range {}..{} exceeds file size {}",
                    start,
                    end,
                    self.mmap.len()
                ),
            ));
        }

        Ok(self.mmap[start..end].to_vec())
    }
}
