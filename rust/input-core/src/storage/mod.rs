// rust/input-core/src/storage/mod.rs

//! Storage abstraction for the input pipeline.
//!
//! The sharded file source lists directories and reads record files through
//! [`StorageBackend`], so tests and alternative filesystems can stand in for
//! [`LocalStorage`].
//!
//! # Example
//!
//! ```no_run
//! use input_core::config::ReaderConfig;
//! use input_core::storage::{LocalStorage, StorageBackend};
//! use std::path::Path;
//!
//! let storage = LocalStorage::new(&ReaderConfig::default());
//! let names = storage.list(Path::new("/data/prices")).unwrap();
//! let mut reader = storage.open_read(&Path::new("/data/prices").join(&names[0])).unwrap();
//! let head = reader.read_range(0, 64.min(reader.size() as usize)).unwrap();
//! ```

mod local;
mod traits;

pub use local::LocalStorage;
pub use traits::{ObjectMeta, StorageBackend, StorageReader};
