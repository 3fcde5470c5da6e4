// rust/input-core/src/lib.rs

//! Sharded record input pipeline - Core Library
//!
//! This crate builds the input side of a distributed image-classification
//! training loop: it discovers sharded record files (or a remote table
//! scan), decodes records into feature and label tensors, batches them and
//! streams the batches with overlapped I/O and compute.

pub mod config;
pub mod error;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::InputConfig;
pub use error::{InputError, Result};
pub use storage::{LocalStorage, ObjectMeta, StorageBackend, StorageReader};

pub mod dataset;
pub use dataset::{AsyncPrefetcher, Cardinality, Dataset, PrefetchDepth, ShardSpec};

pub mod tensor;
pub use tensor::{FeatureTensor, Precision};

pub mod codec;
pub use codec::{DecodeMode, Example, RawRecord, RecordCodec, RecordEncoding, RecordSchema};

pub mod source;
pub use source::{
    NullSource, RemoteScanSource, ScanClient, ScanSelection, ShardedFileSource, SourceBuilder,
    SourceDescriptor, SourceKind, SourceProvider,
};

pub mod shape;
pub use shape::{BatchLayout, ShapeContract, TensorShape};

pub mod pipeline;
pub use pipeline::{Batch, InputPipeline, PredictBatch, ShardContext};

pub mod serving;
pub use serving::{preprocess_image, PreprocessOptions, ServingInput, ServingInputReceiver};
