// rust/input-core/src/config.rs

//! Configuration for the input pipeline.
//!
//! Configuration is parsed from TOML, optionally overridden from `INPUT_*`
//! environment variables, and validated before a pipeline is built.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::codec::RecordSchema;
use crate::dataset::PrefetchDepth;
use crate::error::{InputError, Result};
use crate::source::SourceDescriptor;

/// Default image height and width.
pub const DEFAULT_IMAGE_SIZE: usize = 3;

// Top-level input configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub pipeline: PipelineConfig,
    pub schema: RecordSchema,
    pub source: SourceDescriptor,
    pub predict: PredictConfig,
    pub reader: ReaderConfig,
}

/// Options that shape the produced batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Training pipelines repeat and shuffle indefinitely.
    pub is_training: bool,
    /// Emit features as bfloat16 instead of float32.
    pub use_bfloat16: bool,
    /// Move the batch dimension last (double-transpose layout).
    pub transpose_input: bool,
    /// Height and width of null-source and serving images.
    pub image_size: usize,
    /// Parallel decode workers for the fused map-and-batch stage.
    pub num_parallel_calls: usize,
    /// Cache each shard in memory after its first pass.
    pub cache: bool,
    /// Read-ahead depth of the final prefetch buffer.
    pub prefetch: PrefetchDepth,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            is_training: false,
            use_bfloat16: false,
            transpose_input: false,
            image_size: DEFAULT_IMAGE_SIZE,
            num_parallel_calls: 8,
            cache: false,
            prefetch: PrefetchDepth::Auto,
        }
    }
}

/// Bulk-prediction source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictConfig {
    /// Directory holding `price-*` files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

/// File reading and shuffling options.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    // Number of files read concurrently by the interleave stage.
    pub cycle_length: usize,
    // Bytes read from a file per request.
    pub read_buffer_size: usize,
    // Shuffle buffer used when the shard is not cached.
    pub shuffle_buffer: usize,
    // Shuffle buffer used when replaying a cached shard.
    pub cache_shuffle_buffer: usize,
    // Optional seed for reproducible intra-shard order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    // Whether to memory-map large files.
    pub use_mmap: bool,
    // File size threshold (bytes) above which to use mmap.
    pub mmap_threshold: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            cycle_length: 64,
            read_buffer_size: 8 * 1024 * 1024, // 8 MiB per file
            shuffle_buffer: 1024,
            cache_shuffle_buffer: 1024 * 16,
            seed: None,
            use_mmap: true,
            mmap_threshold: 1024 * 1024, // 1 MiB
        }
    }
}

impl FromStr for InputConfig {
    type Err = InputError;

    /// Parse configuration from a TOML string.
    fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s)
            .map_err(|e| InputError::config_with_source("failed to parse TOML config", e))
    }
}

impl InputConfig {
    // Load configuration from a TOML file.
    //
    // # Errors
    //
    // Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            InputError::storage_with_source(path, "failed to read config file", e)
        })?;
        let config: Self = content.parse()?;
        config.validate()?;
        Ok(config)
    }

    // Apply environment variable overrides.
    //
    // - `INPUT_DATA_DIR` replaces `source` with a file (or null) source
    // - `INPUT_PREDICT_DIR` overrides `predict.dir`
    // - `INPUT_IS_TRAINING`, `INPUT_USE_BFLOAT16`, `INPUT_TRANSPOSE_INPUT`,
    //   `INPUT_IMAGE_SIZE`, `INPUT_NUM_PARALLEL_CALLS`, `INPUT_CACHE`
    //   override the `pipeline` section
    // - `INPUT_SEED`, `INPUT_CYCLE_LENGTH`, `INPUT_SHUFFLE_BUFFER` override
    //   the `reader` section
    //
    // Values that fail to parse are ignored.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(val) = std::env::var("INPUT_DATA_DIR") {
            self.source = SourceDescriptor::from_data_dir(&val);
        }
        if let Ok(val) = std::env::var("INPUT_PREDICT_DIR") {
            self.predict.dir = if val.trim().is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        // Pipeline overrides
        if let Ok(val) = std::env::var("INPUT_IS_TRAINING") {
            if let Ok(v) = val.parse() {
                self.pipeline.is_training = v;
            }
        }
        if let Ok(val) = std::env::var("INPUT_USE_BFLOAT16") {
            if let Ok(v) = val.parse() {
                self.pipeline.use_bfloat16 = v;
            }
        }
        if let Ok(val) = std::env::var("INPUT_TRANSPOSE_INPUT") {
            if let Ok(v) = val.parse() {
                self.pipeline.transpose_input = v;
            }
        }
        if let Ok(val) = std::env::var("INPUT_IMAGE_SIZE") {
            if let Ok(v) = val.parse() {
                self.pipeline.image_size = v;
            }
        }
        if let Ok(val) = std::env::var("INPUT_NUM_PARALLEL_CALLS") {
            if let Ok(v) = val.parse() {
                self.pipeline.num_parallel_calls = v;
            }
        }
        if let Ok(val) = std::env::var("INPUT_CACHE") {
            if let Ok(v) = val.parse() {
                self.pipeline.cache = v;
            }
        }

        // Reader overrides
        if let Ok(val) = std::env::var("INPUT_SEED") {
            if let Ok(v) = val.parse() {
                self.reader.seed = Some(v);
            }
        }
        if let Ok(val) = std::env::var("INPUT_CYCLE_LENGTH") {
            if let Ok(v) = val.parse() {
                self.reader.cycle_length = v;
            }
        }
        if let Ok(val) = std::env::var("INPUT_SHUFFLE_BUFFER") {
            if let Ok(v) = val.parse() {
                self.reader.shuffle_buffer = v;
            }
        }

        self
    }

    // Validate all configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.image_size == 0 {
            return Err(InputError::config(
                "pipeline.image_size must be greater than 0",
            ));
        }
        if self.pipeline.num_parallel_calls == 0 {
            return Err(InputError::config(
                "pipeline.num_parallel_calls must be greater than 0",
            ));
        }
        if let PrefetchDepth::Fixed(0) = self.pipeline.prefetch {
            return Err(InputError::config(
                "pipeline.prefetch must be \"auto\" or greater than 0",
            ));
        }

        self.schema.validate()?;
        self.source.validate()?;

        if self.reader.cycle_length == 0 {
            return Err(InputError::config(
                "reader.cycle_length must be greater than 0",
            ));
        }
        if self.reader.read_buffer_size == 0 {
            return Err(InputError::config(
                "reader.read_buffer_size must be greater than 0",
            ));
        }
        if self.reader.shuffle_buffer == 0 || self.reader.cache_shuffle_buffer == 0 {
            return Err(InputError::config(
                "reader shuffle buffers must be greater than 0",
            ));
        }

        Ok(())
    }
}
