// rust/input-core/src/source/mod.rs

//! Raw record sources.
//!
//! A [`SourceProvider`] turns a shard assignment into a stream of raw
//! records. The concrete provider is chosen once, at construction, from a
//! [`SourceDescriptor`]:
//!
//! - `files`: sharded record files ([`ShardedFileSource`])
//! - `bigtable`: a prefix scan over a remote table ([`RemoteScanSource`])
//! - `null`: endless placeholder records ([`NullSource`])

mod files;
mod null;
mod scan;

pub use files::{ShardedFileSource, PREDICT_PREFIX, TRAIN_PREFIX, VALIDATION_PREFIX};
pub use null::NullSource;
pub use scan::{InMemoryScanClient, RemoteScanSource, ScanClient, ScanRow, ScanRows, ScanSelection};

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::codec::{RawRecord, RecordSchema};
use crate::config::{InputConfig, ReaderConfig};
use crate::dataset::{Dataset, ShardSpec};
use crate::error::{InputError, Result};
use crate::storage::{LocalStorage, StorageBackend};

/// Which kind of provider is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Files,
    Bigtable,
    Null,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Files => "files",
            Self::Bigtable => "bigtable",
            Self::Null => "null",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces raw record streams restricted to one shard.
pub trait SourceProvider: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Records for training or evaluation.
    ///
    /// Infinite when training. Evaluation streams of real sources are finite.
    fn make_source_stream(&self, shard: ShardSpec) -> Result<Dataset<RawRecord>>;

    /// Records for bulk prediction, in a single pass.
    ///
    /// [`InputPipeline::predict_input_fn`](crate::InputPipeline::predict_input_fn)
    /// only calls this on the file source returned by
    /// [`SourceBuilder::build_predict`]. The scan and null implementations
    /// serve callers that drive a provider directly.
    fn make_predict_stream(&self, shard: ShardSpec) -> Result<Dataset<RawRecord>>;
}

/// Configured location of the input data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceDescriptor {
    Files {
        data_dir: PathBuf,
    },
    Bigtable(ScanSelection),
    #[default]
    Null,
}

impl SourceDescriptor {
    /// Builds a descriptor from a data directory string.
    ///
    /// `""`, `"null"` and `"none"` select the null source.
    pub fn from_data_dir(data_dir: &str) -> Self {
        let trimmed = data_dir.trim();
        if is_null_dir(Path::new(trimmed)) {
            Self::Null
        } else {
            Self::Files {
                data_dir: PathBuf::from(trimmed),
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Bigtable(selection) => selection.validate(),
            Self::Files { .. } | Self::Null => Ok(()),
        }
    }
}

fn is_null_dir(dir: &Path) -> bool {
    let s = dir.to_string_lossy();
    let s = s.trim();
    s.is_empty() || s.eq_ignore_ascii_case("null") || s.eq_ignore_ascii_case("none")
}

/// Resolves a [`SourceDescriptor`] into a provider.
pub struct SourceBuilder {
    descriptor: SourceDescriptor,
    predict_dir: Option<PathBuf>,
    storage: Option<Arc<dyn StorageBackend>>,
    scan_client: Option<Arc<dyn ScanClient>>,
    schema: RecordSchema,
    reader: ReaderConfig,
    is_training: bool,
    cache: bool,
}

impl SourceBuilder {
    /// Creates a new builder with default settings.
    pub fn new(descriptor: SourceDescriptor) -> Self {
        Self {
            descriptor,
            predict_dir: None,
            storage: None,
            scan_client: None,
            schema: RecordSchema::default(),
            reader: ReaderConfig::default(),
            is_training: false,
            cache: false,
        }
    }

    /// Creates a builder carrying every source-related setting of `config`.
    pub fn from_config(config: &InputConfig) -> Self {
        Self {
            descriptor: config.source.clone(),
            predict_dir: config.predict.dir.clone(),
            storage: None,
            scan_client: None,
            schema: config.schema.clone(),
            reader: config.reader.clone(),
            is_training: config.pipeline.is_training,
            cache: config.pipeline.cache,
        }
    }

    /// Sets the storage backend. Defaults to the local filesystem.
    pub fn storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Sets the client used by a `bigtable` descriptor.
    pub fn scan_client(mut self, client: Arc<dyn ScanClient>) -> Self {
        self.scan_client = Some(client);
        self
    }

    pub fn predict_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.predict_dir = Some(dir.into());
        self
    }

    pub fn schema(mut self, schema: RecordSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn reader(mut self, reader: ReaderConfig) -> Self {
        self.reader = reader;
        self
    }

    pub fn training(mut self, is_training: bool) -> Self {
        self.is_training = is_training;
        self
    }

    pub fn cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    fn storage_backend(&self) -> Arc<dyn StorageBackend> {
        self.storage
            .clone()
            .unwrap_or_else(|| Arc::new(LocalStorage::new(&self.reader)))
    }

    fn file_source(&self) -> ShardedFileSource {
        let mut source =
            ShardedFileSource::new(self.storage_backend(), self.schema.clone(), self.reader.clone())
                .training(self.is_training)
                .cached(self.cache);
        if let Some(dir) = &self.predict_dir {
            source = source.with_predict_dir(dir);
        }
        source
    }

    /// Builds the training/evaluation provider.
    ///
    /// A `files` descriptor whose directory is missing, or holds no file for
    /// the current mode, resolves to [`NullSource`].
    ///
    /// # Errors
    ///
    /// Returns `Config` for a `bigtable` descriptor without a scan client.
    pub fn build(&self) -> Result<Arc<dyn SourceProvider>> {
        self.descriptor.validate()?;

        match &self.descriptor {
            SourceDescriptor::Null => {
                tracing::info!("no data source configured, using null input");
                Ok(Arc::new(NullSource::new()))
            }
            SourceDescriptor::Files { data_dir } if is_null_dir(data_dir) => {
                tracing::info!("undefined data_dir implies null input");
                Ok(Arc::new(NullSource::new()))
            }
            SourceDescriptor::Files { data_dir } => {
                let source = self.file_source().with_data_dir(data_dir);
                let storage = self.storage_backend();

                if !storage.exists(data_dir)? {
                    tracing::info!(
                        data_dir = %data_dir.display(),
                        "data directory does not exist, using null input"
                    );
                    return Ok(Arc::new(NullSource::new()));
                }

                let prefix = source.data_prefix();
                if source.list_files(data_dir, prefix)?.is_empty() {
                    tracing::info!(
                        data_dir = %data_dir.display(),
                        prefix,
                        "no matching files in data directory, using null input"
                    );
                    return Ok(Arc::new(NullSource::new()));
                }

                tracing::info!(
                    data_dir = %data_dir.display(),
                    is_training = self.is_training,
                    cache = self.cache,
                    "using sharded file source"
                );
                Ok(Arc::new(source))
            }
            SourceDescriptor::Bigtable(selection) => {
                let client = self.scan_client.clone().ok_or_else(|| {
                    InputError::config("a bigtable source requires a scan client")
                })?;
                tracing::info!(
                    project = %selection.project,
                    instance = %selection.instance,
                    table = %selection.table,
                    prefix = %selection.prefix,
                    "using remote scan source"
                );
                Ok(Arc::new(RemoteScanSource::new(
                    client,
                    selection.clone(),
                    self.is_training,
                )))
            }
        }
    }

    /// Builds the provider for bulk prediction over the prediction
    /// directory.
    ///
    /// # Errors
    ///
    /// Returns `Precondition` when no prediction directory is configured or
    /// it does not exist.
    pub fn build_predict(&self) -> Result<Arc<dyn SourceProvider>> {
        let dir = self
            .predict_dir
            .as_deref()
            .filter(|dir| !is_null_dir(dir))
            .ok_or_else(|| InputError::precondition("no prediction directory configured"))?;

        let storage = self.storage_backend();
        if !storage.exists(dir)? || !storage.metadata(dir)?.is_dir {
            return Err(InputError::precondition(format!(
                "prediction directory '{}' does not exist",
                dir.display()
            )));
        }

        Ok(Arc::new(self.file_source()))
    }
}

impl fmt::Debug for SourceBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceBuilder")
            .field("descriptor", &self.descriptor)
            .field("predict_dir", &self.predict_dir)
            .field("is_training", &self.is_training)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}
