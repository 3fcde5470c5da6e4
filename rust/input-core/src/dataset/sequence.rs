// rust/input-core/src/dataset/sequence.rs

//! Lazy, restartable element sequences.
//!
//! A [`Dataset`] does not hold elements. It holds a factory that starts a
//! fresh pass over the elements every time [`Dataset::iter`] is called, so a
//! pipeline can be iterated more than once (for example once per evaluation
//! round) without being rebuilt.

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// A single pass over a dataset.
pub type Elements<T> = Box<dyn Iterator<Item = Result<T>> + Send>;

type Factory<T> = Arc<dyn Fn() -> Result<Elements<T>> + Send + Sync>;

/// Whether a dataset ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cardinality {
    Finite,
    Infinite,
    Unknown,
}

/// A lazy, restartable and possibly infinite sequence of `T`.
pub struct Dataset<T> {
    factory: Factory<T>,
    cardinality: Cardinality,
}

impl<T> Clone for Dataset<T> {
    fn clone(&self) -> Self {
        Self {
            factory: Arc::clone(&self.factory),
            cardinality: self.cardinality,
        }
    }
}

impl<T> fmt::Debug for Dataset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("cardinality", &self.cardinality)
            .finish_non_exhaustive()
    }
}

impl<T: Send + 'static> Dataset<T> {
    /// Creates a dataset from a pass factory.
    ///
    /// `factory` is called once per pass and must return a fresh iterator.
    pub fn from_fn<F>(cardinality: Cardinality, factory: F) -> Self
    where
        F: Fn() -> Result<Elements<T>> + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            cardinality,
        }
    }

    /// Creates a finite dataset over the given elements.
    pub fn from_vec(items: Vec<T>) -> Self
    where
        T: Clone + Sync,
    {
        let items = Arc::new(items);
        Self::from_fn(Cardinality::Finite, move || {
            let items = Arc::clone(&items);
            Ok(Box::new((0..items.len()).map(move |i| Ok(items[i].clone()))) as Elements<T>)
        })
    }

    /// Creates an infinite dataset that yields `value` forever.
    pub fn repeat_value(value: T) -> Self
    where
        T: Clone + Sync,
    {
        let value = Arc::new(value);
        Self::from_fn(Cardinality::Infinite, move || {
            let value = Arc::clone(&value);
            Ok(Box::new(std::iter::repeat_with(move || Ok((*value).clone()))) as Elements<T>)
        })
    }

    /// Creates a dataset with no elements.
    pub fn empty() -> Self {
        Self::from_fn(Cardinality::Finite, || {
            Ok(Box::new(std::iter::empty()) as Elements<T>)
        })
    }

    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Starts a new pass over the dataset.
    pub fn iter(&self) -> Result<Elements<T>> {
        (self.factory)()
    }

    /// Collects one full pass, stopping at the first error.
    ///
    /// Only meaningful for finite datasets.
    pub fn collect_vec(&self) -> Result<Vec<T>> {
        self.iter()?.collect()
    }

    pub fn map<U, F>(self, f: F) -> Dataset<U>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let cardinality = self.cardinality;
        Dataset::from_fn(cardinality, move || {
            let f = Arc::clone(&f);
            let upstream = self.iter()?;
            Ok(Box::new(upstream.map(move |item| item.map(|v| f(v)))) as Elements<U>)
        })
    }

    /// Maps each element through a fallible function.
    ///
    /// A failing element becomes an `Err` item in the output.
    pub fn try_map<U, F>(self, f: F) -> Dataset<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<U> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        let cardinality = self.cardinality;
        Dataset::from_fn(cardinality, move || {
            let f = Arc::clone(&f);
            let upstream = self.iter()?;
            Ok(Box::new(upstream.map(move |item| item.and_then(|v| f(v)))) as Elements<U>)
        })
    }

    /// Keeps elements matching `predicate`. Errors always pass through.
    pub fn filter<F>(self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let predicate = Arc::new(predicate);
        let cardinality = match self.cardinality {
            Cardinality::Finite => Cardinality::Finite,
            _ => Cardinality::Unknown,
        };
        Dataset::from_fn(cardinality, move || {
            let predicate = Arc::clone(&predicate);
            let upstream = self.iter()?;
            Ok(Box::new(upstream.filter(move |item| match item {
                Ok(v) => predicate(v),
                Err(_) => true,
            })) as Elements<T>)
        })
    }

    /// Keeps every `total`-th element starting at position `index`.
    ///
    /// Membership depends only on position, so the same input always gives
    /// the same shard.
    pub fn shard(self, total: usize, index: usize) -> Self {
        let total = total.max(1);
        let cardinality = self.cardinality;
        Dataset::from_fn(cardinality, move || {
            let upstream = self.iter()?;
            Ok(Box::new(
                upstream
                    .enumerate()
                    .filter(move |(position, _)| position % total == index)
                    .map(|(_, item)| item),
            ) as Elements<T>)
        })
    }

    pub fn take(self, n: usize) -> Self {
        Dataset::from_fn(Cardinality::Finite, move || {
            Ok(Box::new(self.iter()?.take(n)) as Elements<T>)
        })
    }

    /// Restarts the dataset every time a pass ends.
    ///
    /// A pass that yields no elements ends the repetition, so repeating an
    /// empty dataset terminates.
    pub fn repeat(self) -> Self {
        let upstream = self.clone();
        Dataset::from_fn(Cardinality::Infinite, move || {
            Ok(Box::new(Repeat {
                dataset: upstream.clone(),
                current: None,
                yielded_this_pass: false,
                done: false,
            }) as Elements<T>)
        })
    }

    /// Groups consecutive elements into vectors of `batch_size`.
    ///
    /// An error discards the partial group and is yielded on its own.
    pub fn batch(self, batch_size: usize, drop_remainder: bool) -> Dataset<Vec<T>> {
        let batch_size = batch_size.max(1);
        let cardinality = self.cardinality;
        Dataset::from_fn(cardinality, move || {
            Ok(Box::new(Batched {
                upstream: self.iter()?,
                batch_size,
                drop_remainder,
                done: false,
            }) as Elements<Vec<T>>)
        })
    }
}

struct Repeat<T> {
    dataset: Dataset<T>,
    current: Option<Elements<T>>,
    yielded_this_pass: bool,
    done: bool,
}

impl<T: Send + 'static> Iterator for Repeat<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.done {
                return None;
            }

            if self.current.is_none() {
                match self.dataset.iter() {
                    Ok(pass) => {
                        self.current = Some(pass);
                        self.yielded_this_pass = false;
                    }
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }

            let current = self.current.as_mut()?;
            match current.next() {
                Some(item) => {
                    self.yielded_this_pass = true;
                    return Some(item);
                }
                None => {
                    self.current = None;
                    if !self.yielded_this_pass {
                        self.done = true;
                    }
                }
            }
        }
    }
}

struct Batched<T> {
    upstream: Elements<T>,
    batch_size: usize,
    drop_remainder: bool,
    done: bool,
}

impl<T> Iterator for Batched<T> {
    type Item = Result<Vec<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.upstream.next() {
                Some(Ok(item)) => batch.push(item),
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        if batch.len() == self.batch_size || (!batch.is_empty() && !self.drop_remainder) {
            Some(Ok(batch))
        } else {
            None
        }
    }
}
