// rust/input-core/src/dataset/mod.rs

//! Lazy dataset engine with sharding support.
//!
//! A [`Dataset`] is a restartable, possibly infinite sequence built from
//! combinators. The engine owns every thread it needs: the interleave
//! workers, the `map_and_batch` decode pool and the prefetch producer. All
//! of them stop when the consuming iterator is dropped.
//!
//! # Example
//!
//! ```
//! use input_core::dataset::Dataset;
//!
//! let batches = Dataset::from_vec((0..10u32).collect())
//!     .shard(2, 0)
//!     .map_and_batch(2, 4, true, |x| Ok(x * 10))?
//!     .prefetch(2);
//!
//! let first = batches.iter()?.next().unwrap()?;
//! assert_eq!(first, vec![0, 20]);
//! # Ok::<(), input_core::InputError>(())
//! ```

mod batch;
mod interleave;
mod prefetch;
mod records;
mod sequence;
mod sharding;
mod shuffle;

pub use prefetch::{AsyncPrefetcher, PrefetchDepth};
pub use records::{FixedSizeFormat, NewlineDelimitedFormat, RecordFormat, RecordReader};
pub use sequence::{Cardinality, Dataset, Elements};
pub use sharding::{shard_for_key, ShardSpec};
