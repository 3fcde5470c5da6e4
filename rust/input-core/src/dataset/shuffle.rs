// rust/input-core/src/dataset/shuffle.rs

//! Buffered shuffling and in-memory caching.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::sequence::{Dataset, Elements};
use crate::error::Result;

impl<T: Send + 'static> Dataset<T> {
    /// Shuffles elements through a bounded buffer of `buffer_size`.
    ///
    /// Each pass draws a different order. With a seed the sequence of orders
    /// is reproducible.
    pub fn shuffle(self, buffer_size: usize, seed: Option<u64>) -> Self {
        let base_seed = seed.unwrap_or_else(rand::random);
        let epoch = Arc::new(AtomicU64::new(0));
        let capacity = buffer_size.max(1);
        let cardinality = self.cardinality();

        Dataset::from_fn(cardinality, move || {
            let pass = epoch.fetch_add(1, Ordering::Relaxed);
            let rng = StdRng::seed_from_u64(base_seed.wrapping_add(pass));
            Ok(Box::new(ShuffleBuffer {
                upstream: self.iter()?,
                upstream_done: false,
                buffer: Vec::with_capacity(capacity),
                capacity,
                rng,
            }) as Elements<T>)
        })
    }

    /// Holds all elements in memory after the first complete pass.
    ///
    /// Later passes replay the cached elements without touching the
    /// upstream. A pass that ends in an error is not cached. Must be applied
    /// before `repeat`, never after.
    pub fn cache(self) -> Self
    where
        T: Clone + Sync,
    {
        let slot: Arc<OnceLock<Arc<Vec<T>>>> = Arc::new(OnceLock::new());
        let cardinality = self.cardinality();

        Dataset::from_fn(cardinality, move || {
            if let Some(items) = slot.get() {
                let items = Arc::clone(items);
                return Ok(Box::new((0..items.len()).map(move |i| Ok(items[i].clone())))
                    as Elements<T>);
            }

            Ok(Box::new(CacheFill {
                upstream: self.iter()?,
                seen: Vec::new(),
                slot: Arc::clone(&slot),
                failed: false,
            }) as Elements<T>)
        })
    }

    /// Shuffles each pass and repeats forever.
    pub fn shuffle_and_repeat(self, buffer_size: usize, seed: Option<u64>) -> Self {
        self.shuffle(buffer_size, seed).repeat()
    }
}

struct ShuffleBuffer<T> {
    upstream: Elements<T>,
    upstream_done: bool,
    buffer: Vec<T>,
    capacity: usize,
    rng: StdRng,
}

impl<T> Iterator for ShuffleBuffer<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.upstream_done && self.buffer.len() < self.capacity {
            match self.upstream.next() {
                Some(Ok(item)) => self.buffer.push(item),
                Some(Err(e)) => return Some(Err(e)),
                None => self.upstream_done = true,
            }
        }

        if self.buffer.is_empty() {
            return None;
        }

        let index = self.rng.random_range(0..self.buffer.len());
        Some(Ok(self.buffer.swap_remove(index)))
    }
}

struct CacheFill<T> {
    upstream: Elements<T>,
    seen: Vec<T>,
    slot: Arc<OnceLock<Arc<Vec<T>>>>,
    failed: bool,
}

impl<T: Clone> Iterator for CacheFill<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.upstream.next() {
            Some(Ok(item)) => {
                if !self.failed {
                    self.seen.push(item.clone());
                }
                Some(Ok(item))
            }
            Some(Err(e)) => {
                self.failed = true;
                self.seen.clear();
                Some(Err(e))
            }
            None => {
                if !self.failed {
                    let items = std::mem::take(&mut self.seen);
                    // A concurrent pass may have filled the slot first.
                    let _ = self.slot.set(Arc::new(items));
                }
                None
            }
        }
    }
}
