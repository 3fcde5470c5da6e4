// rust/input-core/src/dataset/sharding.rs

use std::hash::Hasher;

use twox_hash::XxHash64;

use crate::error::{InputError, Result};

/// Seed for row-key hashing. Changing it reassigns every row.
const KEY_HASH_SEED: u64 = 0;

/// One worker's slice of the input.
///
/// Membership is a pure function of `(index, total)` and the input, so the
/// same worker always sees the same files or rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShardSpec {
    pub index: u32,
    pub total: u32,
}

impl ShardSpec {
    /// Creates a validated shard spec.
    ///
    /// # Errors
    ///
    /// Returns `InvalidShard` unless `total > 0` and `index < total`.
    pub fn new(index: u32, total: u32) -> Result<Self> {
        let spec = Self { index, total };
        spec.validate()?;
        Ok(spec)
    }

    /// The whole input as a single shard.
    pub fn single() -> Self {
        Self { index: 0, total: 1 }
    }

    pub fn validate(&self) -> Result<()> {
        if self.total == 0 || self.index >= self.total {
            return Err(InputError::invalid_shard(self.index, self.total));
        }
        Ok(())
    }

    /// Whether the element at `position` of an ordered list belongs here.
    pub fn owns_position(&self, position: usize) -> bool {
        position % self.total as usize == self.index as usize
    }

    /// Whether a row with `key` belongs here.
    pub fn owns_key(&self, key: &[u8]) -> bool {
        shard_for_key(key, self.total) == self.index
    }
}

impl Default for ShardSpec {
    fn default() -> Self {
        Self::single()
    }
}

/// Maps a row key to a shard index in `0..total`.
///
/// `total` must be non-zero.
pub fn shard_for_key(key: &[u8], total: u32) -> u32 {
    let mut hasher = XxHash64::with_seed(KEY_HASH_SEED);
    hasher.write(key);
    (hasher.finish() % u64::from(total.max(1))) as u32
}
