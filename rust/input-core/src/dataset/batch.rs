// rust/input-core/src/dataset/batch.rs

//! Fused parallel map and batch.

use std::collections::VecDeque;
use std::sync::Arc;

use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use super::sequence::{Dataset, Elements};
use crate::error::{InputError, Result};

impl<T: Send + 'static> Dataset<T> {
    /// Maps elements on a dedicated thread pool and groups the results.
    ///
    /// Each step pulls `batch_size * num_parallel_calls` elements, maps them
    /// in parallel and emits the completed batches in input order. The first
    /// error (from upstream or from `f`) is yielded after the batches that
    /// precede it, and ends the sequence.
    ///
    /// # Errors
    ///
    /// Returns an error if the thread pool cannot be built.
    pub fn map_and_batch<U, F>(
        self,
        batch_size: usize,
        num_parallel_calls: usize,
        drop_remainder: bool,
        f: F,
    ) -> Result<Dataset<Vec<U>>>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        if batch_size == 0 {
            return Err(InputError::config("batch_size must be greater than 0"));
        }
        let num_parallel_calls = num_parallel_calls.max(1);

        let pool = ThreadPoolBuilder::new()
            .num_threads(num_parallel_calls)
            .thread_name(|i| format!("map-and-batch-{i}"))
            .build()
            .map_err(|e| {
                InputError::config_with_source("failed to build map_and_batch thread pool", e)
            })?;
        let pool = Arc::new(pool);
        let f = Arc::new(f);
        let cardinality = self.cardinality();

        Ok(Dataset::from_fn(cardinality, move || {
            Ok(Box::new(MapAndBatch {
                upstream: self.iter()?,
                pool: Arc::clone(&pool),
                f: Arc::clone(&f),
                batch_size,
                step: batch_size * num_parallel_calls,
                drop_remainder,
                partial: Vec::with_capacity(batch_size),
                ready: VecDeque::new(),
                exhausted: false,
            }) as Elements<Vec<U>>)
        }))
    }
}

struct MapAndBatch<T, U, F> {
    upstream: Elements<T>,
    pool: Arc<ThreadPool>,
    f: Arc<F>,
    batch_size: usize,
    step: usize,
    drop_remainder: bool,
    partial: Vec<U>,
    ready: VecDeque<Result<Vec<U>>>,
    exhausted: bool,
}

impl<T, U, F> MapAndBatch<T, U, F>
where
    T: Send,
    U: Send,
    F: Fn(T) -> Result<U> + Send + Sync,
{
    fn refill(&mut self) {
        let mut pending = Vec::with_capacity(self.step);
        let mut upstream_error = None;

        while pending.len() < self.step {
            match self.upstream.next() {
                Some(Ok(item)) => pending.push(item),
                Some(Err(e)) => {
                    upstream_error = Some(e);
                    break;
                }
                None => {
                    self.exhausted = true;
                    break;
                }
            }
        }

        let f = self.f.as_ref();
        let mapped: Vec<Result<U>> = self
            .pool
            .install(|| pending.into_par_iter().map(|item| f(item)).collect());

        for item in mapped {
            match item {
                Ok(value) => {
                    self.partial.push(value);
                    if self.partial.len() == self.batch_size {
                        let batch = std::mem::replace(
                            &mut self.partial,
                            Vec::with_capacity(self.batch_size),
                        );
                        self.ready.push_back(Ok(batch));
                    }
                }
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }

        if let Some(e) = upstream_error {
            self.fail(e);
            return;
        }

        if self.exhausted && !self.partial.is_empty() && !self.drop_remainder {
            let batch = std::mem::take(&mut self.partial);
            self.ready.push_back(Ok(batch));
        }
    }

    fn fail(&mut self, error: InputError) {
        self.partial.clear();
        self.ready.push_back(Err(error));
        self.exhausted = true;
    }
}

impl<T, U, F> Iterator for MapAndBatch<T, U, F>
where
    T: Send,
    U: Send,
    F: Fn(T) -> Result<U> + Send + Sync,
{
    type Item = Result<Vec<U>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = self.ready.pop_front() {
                return Some(batch);
            }
            if self.exhausted {
                return None;
            }
            self.refill();
        }
    }
}
