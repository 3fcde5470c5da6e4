// rust/input-core/src/dataset/interleave.rs

//! Parallel, sloppy interleave.
//!
//! Every input element is opened by exactly one worker, and every element
//! of the opened stream is forwarded exactly once. Output order follows
//! whichever worker produces first.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};

use super::sequence::{Dataset, Elements};
use crate::error::{InputError, Result};

impl<T: Send + 'static> Dataset<T> {
    /// Opens each element with `open` and merges the resulting streams.
    ///
    /// Up to `cycle_length` streams are read concurrently, each on its own
    /// thread. Streams returned by `open` are expected to be finite.
    pub fn parallel_interleave<U, F>(self, cycle_length: usize, open: F) -> Dataset<U>
    where
        U: Send + 'static,
        F: Fn(T) -> Result<Elements<U>> + Send + Sync + 'static,
    {
        let open = Arc::new(open);
        let cycle_length = cycle_length.max(1);
        let cardinality = self.cardinality();

        Dataset::from_fn(cardinality, move || {
            let inputs = self.iter()?;
            let interleave = Interleave::spawn(inputs, cycle_length, Arc::clone(&open))?;
            Ok(Box::new(interleave) as Elements<U>)
        })
    }
}

struct Interleave<U> {
    receiver: Option<Receiver<Result<U>>>,
    handles: Vec<JoinHandle<()>>,
}

impl<U: Send + 'static> Interleave<U> {
    fn spawn<T, F>(inputs: Elements<T>, cycle_length: usize, open: Arc<F>) -> Result<Self>
    where
        T: Send + 'static,
        F: Fn(T) -> Result<Elements<U>> + Send + Sync + 'static,
    {
        let (input_tx, input_rx) = channel::bounded::<T>(cycle_length);
        let (output_tx, output_rx) = channel::bounded::<Result<U>>(cycle_length * 2);
        let mut handles = Vec::with_capacity(cycle_length + 1);

        let dispatch_tx = output_tx.clone();
        handles.push(spawn_named("interleave-dispatch".to_string(), move || {
            dispatch(inputs, input_tx, dispatch_tx)
        })?);

        for worker in 0..cycle_length {
            let input_rx = input_rx.clone();
            let output_tx = output_tx.clone();
            let open = Arc::clone(&open);
            handles.push(spawn_named(format!("interleave-{worker}"), move || {
                read_streams(input_rx, output_tx, open.as_ref())
            })?);
        }

        Ok(Self {
            receiver: Some(output_rx),
            handles,
        })
    }
}

fn spawn_named<F>(name: String, f: F) -> Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name)
        .spawn(f)
        .map_err(|e| InputError::source_with_cause("interleave", "failed to spawn worker", e))
}

fn dispatch<T, U>(inputs: Elements<T>, input_tx: Sender<T>, output_tx: Sender<Result<U>>) {
    for item in inputs {
        let sent = match item {
            Ok(value) => input_tx.send(value).is_ok(),
            Err(e) => output_tx.send(Err(e)).is_ok(),
        };
        if !sent {
            break;
        }
    }
}

fn read_streams<T, U, F>(input_rx: Receiver<T>, output_tx: Sender<Result<U>>, open: &F)
where
    F: Fn(T) -> Result<Elements<U>>,
{
    while let Ok(value) = input_rx.recv() {
        match open(value) {
            Ok(stream) => {
                for item in stream {
                    if output_tx.send(item).is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                if output_tx.send(Err(e)).is_err() {
                    return;
                }
            }
        }
    }
}

impl<U> Iterator for Interleave<U> {
    type Item = Result<U>;

    fn next(&mut self) -> Option<Self::Item> {
        self.receiver.as_ref()?.recv().ok()
    }
}

impl<U> Drop for Interleave<U> {
    fn drop(&mut self) {
        // Disconnect first so blocked workers see a failed send and exit.
        self.receiver.take();
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Cardinality;
    use std::collections::HashSet;

    fn range_stream(start: u32, len: u32) -> Result<Elements<u32>> {
        Ok(Box::new((start..start + len).map(Ok)) as Elements<u32>)
    }

    #[test]
    fn test_interleave_delivers_every_element_once() {
        let files: Vec<u32> = (0..20).collect();
        let ds = Dataset::from_vec(files).parallel_interleave(4, |f| range_stream(f * 1000, 250));

        let mut items = ds.collect_vec().unwrap();
        assert_eq!(items.len(), 20 * 250);
        items.sort_unstable();
        let unique: HashSet<u32> = items.iter().copied().collect();
        assert_eq!(unique.len(), items.len());
    }

    #[test]
    fn test_interleave_forwards_open_errors() {
        let ds = Dataset::from_vec(vec![1u32, 2, 3]).parallel_interleave(2, |f| {
            if f == 2 {
                Err(InputError::storage("train-2", "unreadable"))
            } else {
                range_stream(f * 10, 3)
            }
        });

        let items: Vec<_> = ds.iter().unwrap().collect();
        assert_eq!(items.len(), 7);
        assert_eq!(items.iter().filter(|r| r.is_err()).count(), 1);
    }

    #[test]
    fn test_interleave_is_restartable() {
        let ds = Dataset::from_vec(vec![0u32, 1]).parallel_interleave(2, |f| range_stream(f, 1));
        assert_eq!(ds.collect_vec().unwrap().len(), 2);
        assert_eq!(ds.collect_vec().unwrap().len(), 2);
    }

    #[test]
    fn test_dropping_infinite_interleave_stops_workers() {
        let ds = Dataset::from_vec(vec![0u32, 1, 2])
            .repeat()
            .parallel_interleave(3, |f| range_stream(f, 100));
        assert_eq!(ds.cardinality(), Cardinality::Infinite);

        let mut iter = ds.iter().unwrap();
        for _ in 0..1000 {
            assert!(iter.next().unwrap().is_ok());
        }
        // Joins all threads; hangs if cancellation is broken.
        drop(iter);
    }
}
