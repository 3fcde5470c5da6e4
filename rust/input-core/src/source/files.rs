// rust/input-core/src/source/files.rs

//! Sharded record files on a storage backend.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{SourceKind, SourceProvider};
use crate::codec::{DecodeMode, RawRecord, RecordSchema};
use crate::config::ReaderConfig;
use crate::dataset::{Dataset, Elements, RecordReader, ShardSpec};
use crate::error::{InputError, Result};
use crate::storage::StorageBackend;

/// File name prefix of training files.
pub const TRAIN_PREFIX: &str = "train-";
/// File name prefix of evaluation files.
pub const VALIDATION_PREFIX: &str = "validation-";
/// File name prefix of prediction files.
pub const PREDICT_PREFIX: &str = "price-";

/// Reads records from the files of a directory, split across shards.
///
/// Files are assigned to shards by position in the sorted listing. Records
/// of a shard's files are read concurrently and shuffled within the shard.
pub struct ShardedFileSource {
    storage: Arc<dyn StorageBackend>,
    data_dir: Option<PathBuf>,
    predict_dir: Option<PathBuf>,
    schema: RecordSchema,
    reader: ReaderConfig,
    is_training: bool,
    cache: bool,
}

impl fmt::Debug for ShardedFileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardedFileSource")
            .field("data_dir", &self.data_dir)
            .field("predict_dir", &self.predict_dir)
            .field("is_training", &self.is_training)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ShardedFileSource {
    pub fn new(storage: Arc<dyn StorageBackend>, schema: RecordSchema, reader: ReaderConfig) -> Self {
        Self {
            storage,
            data_dir: None,
            predict_dir: None,
            schema,
            reader,
            is_training: false,
            cache: false,
        }
    }

    /// Sets the directory holding `train-*` and `validation-*` files.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    /// Sets the directory holding `price-*` files.
    pub fn with_predict_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.predict_dir = Some(dir.into());
        self
    }

    pub fn training(mut self, is_training: bool) -> Self {
        self.is_training = is_training;
        self
    }

    pub fn cached(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    /// Prefix of the files read by `make_source_stream`.
    pub fn data_prefix(&self) -> &'static str {
        if self.is_training {
            TRAIN_PREFIX
        } else {
            VALIDATION_PREFIX
        }
    }

    /// Lists the files of `dir` whose names start with `prefix`, sorted.
    pub fn list_files(&self, dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
        Ok(self
            .storage
            .list(dir)?
            .into_iter()
            .filter(|name| name.starts_with(prefix))
            .map(|name| dir.join(name))
            .collect())
    }

    /// The data files assigned to `shard`.
    pub fn files_for_shard(&self, shard: ShardSpec) -> Result<Vec<PathBuf>> {
        let dir = self
            .data_dir
            .as_deref()
            .ok_or_else(|| InputError::precondition("no data directory configured"))?;
        self.select(dir, self.data_prefix(), shard)
    }

    /// The prediction files assigned to `shard`.
    pub fn predict_files_for_shard(&self, shard: ShardSpec) -> Result<Vec<PathBuf>> {
        let dir = self
            .predict_dir
            .as_deref()
            .ok_or_else(|| InputError::precondition("no prediction directory configured"))?;
        self.select(dir, PREDICT_PREFIX, shard)
    }

    fn select(&self, dir: &Path, prefix: &str, shard: ShardSpec) -> Result<Vec<PathBuf>> {
        shard.validate()?;
        let files: Vec<PathBuf> = self
            .list_files(dir, prefix)?
            .into_iter()
            .enumerate()
            .filter(|(position, _)| shard.owns_position(*position))
            .map(|(_, path)| path)
            .collect();

        tracing::debug!(
            dir = %dir.display(),
            prefix,
            shard = shard.index,
            total = shard.total,
            files = files.len(),
            "selected files for shard"
        );
        if files.is_empty() {
            tracing::warn!(
                dir = %dir.display(),
                shard = shard.index,
                total = shard.total,
                "shard has no files"
            );
        }
        Ok(files)
    }

    /// Reads the records of every file in `files` with a sloppy interleave.
    fn read_records(
        &self,
        files: Dataset<PathBuf>,
        file_count: usize,
        mode: DecodeMode,
    ) -> Dataset<RawRecord> {
        let storage = Arc::clone(&self.storage);
        let format = self.schema.record_format(mode);
        let chunk_size = self.reader.read_buffer_size;
        let cycle_length = self.reader.cycle_length.min(file_count.max(1));

        files.parallel_interleave(cycle_length, move |path| {
            let reader = RecordReader::open(storage.as_ref(), &path, Arc::clone(&format), chunk_size)?;
            Ok(Box::new(reader.map(|record| record.map(RawRecord::Data))) as Elements<RawRecord>)
        })
    }
}

impl SourceProvider for ShardedFileSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Files
    }

    fn make_source_stream(&self, shard: ShardSpec) -> Result<Dataset<RawRecord>> {
        let files = self.files_for_shard(shard)?;
        let file_count = files.len();

        let mut file_list = Dataset::from_vec(files);
        if self.is_training && !self.cache {
            file_list = file_list.repeat();
        }

        let records = self.read_records(file_list, file_count, DecodeMode::TrainEval);
        let seed = self.reader.seed;

        Ok(match (self.cache, self.is_training) {
            (true, true) => records
                .cache()
                .shuffle_and_repeat(self.reader.cache_shuffle_buffer, seed),
            (true, false) => records.cache().shuffle(self.reader.cache_shuffle_buffer, seed),
            (false, _) => records.shuffle(self.reader.shuffle_buffer, seed),
        })
    }

    fn make_predict_stream(&self, shard: ShardSpec) -> Result<Dataset<RawRecord>> {
        let files = self.predict_files_for_shard(shard)?;
        let file_count = files.len();
        Ok(self.read_records(Dataset::from_vec(files), file_count, DecodeMode::Predict))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Cardinality;
    use crate::storage::LocalStorage;
    use bytes::Bytes;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::TempDir;

    fn write_files(dir: &Path, prefix: &str, files: usize, records_per_file: usize) {
        for f in 0..files {
            let body: String = (0..records_per_file)
                .map(|r| format!("{f},{r}\n"))
                .collect();
            fs::write(dir.join(format!("{prefix}{f:05}-of-{files:05}")), body).unwrap();
        }
    }

    fn source(dir: &Path) -> ShardedFileSource {
        let reader = ReaderConfig {
            cycle_length: 4,
            seed: Some(1),
            ..Default::default()
        };
        let storage = Arc::new(LocalStorage::new(&reader));
        ShardedFileSource::new(storage, RecordSchema::default(), reader).with_data_dir(dir)
    }

    fn record_set(ds: &Dataset<RawRecord>) -> HashSet<Bytes> {
        ds.collect_vec()
            .unwrap()
            .into_iter()
            .map(|r| match r {
                RawRecord::Data(b) => b,
                RawRecord::Placeholder => panic!("unexpected placeholder"),
            })
            .collect()
    }

    #[test]
    fn test_files_for_shard_strided() {
        let temp = TempDir::new().unwrap();
        write_files(temp.path(), TRAIN_PREFIX, 5, 1);
        write_files(temp.path(), VALIDATION_PREFIX, 2, 1);

        let src = source(temp.path()).training(true);
        let shard0 = src.files_for_shard(ShardSpec::new(0, 2).unwrap()).unwrap();
        let shard1 = src.files_for_shard(ShardSpec::new(1, 2).unwrap()).unwrap();

        let names = |files: &[PathBuf]| -> Vec<String> {
            files
                .iter()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        };
        assert_eq!(
            names(&shard0),
            vec!["train-00000-of-00005", "train-00002-of-00005", "train-00004-of-00005"]
        );
        assert_eq!(names(&shard1), vec!["train-00001-of-00005", "train-00003-of-00005"]);

        // Stable across calls
        assert_eq!(
            shard0,
            src.files_for_shard(ShardSpec::new(0, 2).unwrap()).unwrap()
        );
    }

    #[test]
    fn test_eval_stream_is_finite_and_complete() {
        let temp = TempDir::new().unwrap();
        write_files(temp.path(), VALIDATION_PREFIX, 3, 10);

        let src = source(temp.path());
        let ds = src.make_source_stream(ShardSpec::single()).unwrap();
        assert_eq!(ds.cardinality(), Cardinality::Finite);

        let items = ds.collect_vec().unwrap();
        assert_eq!(items.len(), 30);
        assert_eq!(record_set(&ds).len(), 30);
    }

    #[test]
    fn test_training_stream_repeats() {
        let temp = TempDir::new().unwrap();
        write_files(temp.path(), TRAIN_PREFIX, 2, 3);

        let src = source(temp.path()).training(true);
        let ds = src.make_source_stream(ShardSpec::single()).unwrap();
        assert_eq!(ds.cardinality(), Cardinality::Infinite);
        assert_eq!(ds.take(20).collect_vec().unwrap().len(), 20);
    }

    #[test]
    fn test_cached_eval_replays_same_records() {
        let temp = TempDir::new().unwrap();
        write_files(temp.path(), VALIDATION_PREFIX, 2, 5);

        let src = source(temp.path()).cached(true);
        let ds = src.make_source_stream(ShardSpec::single()).unwrap();
        assert_eq!(ds.cardinality(), Cardinality::Finite);

        let first = record_set(&ds);
        fs::remove_dir_all(temp.path()).unwrap();
        let second = record_set(&ds);
        assert_eq!(first.len(), 10);
        assert_eq!(first, second);
    }

    #[test]
    fn test_cached_training_repeats() {
        let temp = TempDir::new().unwrap();
        write_files(temp.path(), TRAIN_PREFIX, 1, 4);

        let src = source(temp.path()).training(true).cached(true);
        let ds = src.make_source_stream(ShardSpec::single()).unwrap();
        assert_eq!(ds.cardinality(), Cardinality::Infinite);
        assert_eq!(ds.take(12).collect_vec().unwrap().len(), 12);
    }

    #[test]
    fn test_predict_stream() {
        let temp = TempDir::new().unwrap();
        let prices = temp.path().join("prices");
        fs::create_dir(&prices).unwrap();
        write_files(&prices, PREDICT_PREFIX, 3, 2);
        write_files(&prices, TRAIN_PREFIX, 1, 2);

        let src = source(temp.path()).with_predict_dir(&prices);
        let ds = src.make_predict_stream(ShardSpec::single()).unwrap();
        assert_eq!(ds.cardinality(), Cardinality::Finite);
        assert_eq!(ds.collect_vec().unwrap().len(), 6);
    }

    #[test]
    fn test_predict_without_dir_is_precondition() {
        let temp = TempDir::new().unwrap();
        let src = source(temp.path());
        let result = src.make_predict_stream(ShardSpec::single());
        assert!(matches!(result, Err(InputError::Precondition { .. })));
    }

    #[test]
    fn test_invalid_shard_rejected() {
        let temp = TempDir::new().unwrap();
        write_files(temp.path(), VALIDATION_PREFIX, 1, 1);
        let src = source(temp.path());
        assert!(src.make_source_stream(ShardSpec { index: 0, total: 0 }).is_err());
    }
}
