// rust/input-core/src/dataset/prefetch.rs

//! Prefetching to overlap producing elements with consuming them.
//!
//! [`Dataset::prefetch`] runs each pass on a background thread that fills a
//! bounded channel, so the consumer rarely waits on I/O or decoding.
//! [`AsyncPrefetcher`] does the same for consumers running on a tokio
//! runtime.

use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver};
use serde::{Deserialize, Serialize};

use super::sequence::{Dataset, Elements};
use crate::error::{InputError, Result};

/// How many elements to read ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrefetchDepth {
    /// Derived from the decode parallelism.
    #[default]
    Auto,
    /// A fixed number of elements.
    Fixed(usize),
}

impl PrefetchDepth {
    /// Resolves the depth. `Auto` gives `max(2, num_parallel_calls)`.
    pub fn resolve(self, num_parallel_calls: usize) -> usize {
        match self {
            Self::Auto => num_parallel_calls.max(2),
            Self::Fixed(n) => n.max(1),
        }
    }
}

/// Result type for prefetched items.
type PrefetchItem<T> = Result<T>;

impl<T: Send + 'static> Dataset<T> {
    /// Produces up to `buffer_size` elements ahead of the consumer.
    pub fn prefetch(self, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        let cardinality = self.cardinality();

        Dataset::from_fn(cardinality, move || {
            let upstream = self.iter()?;
            Ok(Box::new(PrefetchingIterator::spawn(upstream, buffer_size)?) as Elements<T>)
        })
    }
}

/// Consumer side of a background producer thread.
///
/// The producer stops after forwarding the first error, and the consumer
/// reports the sequence as ended after receiving it.
struct PrefetchingIterator<T> {
    receiver: Option<Receiver<PrefetchItem<T>>>,
    producer: Option<JoinHandle<()>>,
    exhausted: bool,
}

impl<T: Send + 'static> PrefetchingIterator<T> {
    fn spawn(upstream: Elements<T>, buffer_size: usize) -> Result<Self> {
        let (sender, receiver) = channel::bounded(buffer_size);

        let producer = thread::Builder::new()
            .name("prefetch".to_string())
            .spawn(move || {
                for item in upstream {
                    let is_err = item.is_err();
                    if sender.send(item).is_err() || is_err {
                        break;
                    }
                }
            })
            .map_err(|e| InputError::source_with_cause("prefetch", "failed to spawn producer", e))?;

        Ok(Self {
            receiver: Some(receiver),
            producer: Some(producer),
            exhausted: false,
        })
    }
}

impl<T> Iterator for PrefetchingIterator<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        match self.receiver.as_ref()?.recv() {
            Ok(Ok(item)) => Some(Ok(item)),
            Ok(Err(e)) => {
                self.exhausted = true;
                Some(Err(e))
            }
            Err(_) => {
                self.exhausted = true;
                None
            }
        }
    }
}

impl<T> Drop for PrefetchingIterator<T> {
    fn drop(&mut self) {
        // Dropping the receiver makes the producer's next send fail.
        self.receiver.take();
        if let Some(producer) = self.producer.take() {
            let _ = producer.join();
        }
    }
}

/// Async prefetching over a dataset pass using tokio tasks.
///
/// This must be created from within a tokio runtime. The pass runs on a
/// blocking task and hands elements over through a bounded async channel.
pub struct AsyncPrefetcher<T> {
    /// Receiver for prefetched elements.
    receiver: tokio::sync::mpsc::Receiver<PrefetchItem<T>>,
    /// Handle to the producer task.
    task_handle: Option<tokio::task::JoinHandle<()>>,
    /// Whether we've seen the end.
    exhausted: bool,
}

impl<T: Send + 'static> AsyncPrefetcher<T> {
    /// Starts a new pass over `dataset` with up to `buffer_size` elements
    /// read ahead.
    pub fn new(dataset: &Dataset<T>, buffer_size: usize) -> Result<Self> {
        let upstream = dataset.iter()?;
        let (sender, receiver) = tokio::sync::mpsc::channel(buffer_size.max(1));

        let task_handle = tokio::task::spawn_blocking(move || {
            for item in upstream {
                let is_err = item.is_err();
                if sender.blocking_send(item).is_err() || is_err {
                    break;
                }
            }
        });

        Ok(Self {
            receiver,
            task_handle: Some(task_handle),
            exhausted: false,
        })
    }

    /// Gets the next element asynchronously.
    pub async fn next(&mut self) -> Result<Option<T>> {
        if self.exhausted {
            return Ok(None);
        }

        match self.receiver.recv().await {
            Some(Ok(item)) => Ok(Some(item)),
            Some(Err(e)) => {
                self.exhausted = true;
                Err(e)
            }
            None => {
                self.exhausted = true;
                Ok(None)
            }
        }
    }

    /// Stops the producer and waits for it to finish.
    pub async fn shutdown(mut self) {
        self.receiver.close();
        // Drain so a producer blocked on a full channel can observe the close.
        while self.receiver.recv().await.is_some() {}
        if let Some(handle) = self.task_handle.take() {
            let _ = handle.await;
        }
    }
}
