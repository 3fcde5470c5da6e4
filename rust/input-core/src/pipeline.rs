// rust/input-core/src/pipeline.rs

//! Pipeline assembly for training, evaluation and bulk prediction.
//!
//! The assembler only wires stages together. Threads, buffering and
//! cancellation are owned by the [`dataset`](crate::dataset) engine.

use std::fmt;
use std::sync::Arc;

use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::codec::{DecodeMode, Example, RecordCodec};
use crate::config::{InputConfig, PipelineConfig};
use crate::dataset::{Cardinality, Dataset, ShardSpec};
use crate::error::{InputError, Result};
use crate::serving::{PreprocessOptions, ServingInputReceiver};
use crate::shape::{BatchLayout, ShapeContract, Shaped, TensorShape};
use crate::source::{SourceBuilder, SourceKind, SourceProvider};
use crate::tensor::{FeatureTensor, Precision};

/// Per-build invocation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardContext {
    pub shard_index: u32,
    pub total_shards: u32,
    pub batch_size: usize,
}

impl ShardContext {
    /// A single-shard context.
    pub fn new(batch_size: usize) -> Self {
        Self {
            shard_index: 0,
            total_shards: 1,
            batch_size,
        }
    }

    pub fn with_shard(mut self, shard_index: u32, total_shards: u32) -> Self {
        self.shard_index = shard_index;
        self.total_shards = total_shards;
        self
    }

    /// Validates the context and returns its shard.
    pub fn shard_spec(&self) -> Result<ShardSpec> {
        if self.batch_size == 0 {
            return Err(InputError::config("batch_size must be greater than 0"));
        }
        ShardSpec::new(self.shard_index, self.total_shards)
    }
}

/// A batch of training or evaluation examples.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub features: FeatureTensor,
    pub labels: ArrayD<f32>,
    pub layout: BatchLayout,
}

impl Batch {
    /// Stacks decoded examples into a batch-major batch.
    pub fn from_examples(examples: Vec<Example>) -> Result<Self> {
        let mut features = Vec::with_capacity(examples.len());
        let mut labels = Vec::with_capacity(examples.len());
        for example in examples {
            let label = example
                .labels
                .ok_or_else(|| InputError::shape("training example has no labels"))?;
            features.push(example.features);
            labels.push(label);
        }

        let views: Vec<ArrayViewD<'_, f32>> = labels.iter().map(|l| l.view()).collect();
        let labels = ndarray::stack(Axis(0), &views)
            .map_err(|e| InputError::shape(format!("cannot stack labels: {e}")))?;

        Ok(Self {
            features: FeatureTensor::stack(&features)?,
            labels,
            layout: BatchLayout::BatchMajor,
        })
    }

    pub fn batch_size(&self) -> usize {
        let shape = self.features.shape();
        match self.layout {
            BatchLayout::BatchMajor => shape.first().copied().unwrap_or(0),
            BatchLayout::BatchMinor => shape.last().copied().unwrap_or(0),
        }
    }

    /// Moves the batch dimension last: `(H, W, C, B)` and `(L, B)`.
    pub fn transposed(self) -> Self {
        if self.layout == BatchLayout::BatchMinor {
            return self;
        }
        Self {
            features: self.features.permuted(&[1, 2, 3, 0]),
            labels: self
                .labels
                .view()
                .reversed_axes()
                .as_standard_layout()
                .into_owned(),
            layout: BatchLayout::BatchMinor,
        }
    }
}

impl Shaped for Batch {
    fn feature_shape(&self) -> &[usize] {
        self.features.shape()
    }

    fn label_shape(&self) -> Option<&[usize]> {
        Some(self.labels.shape())
    }
}

/// A batch of prediction inputs.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictBatch {
    pub features: FeatureTensor,
}

impl PredictBatch {
    pub fn from_examples(examples: Vec<Example>) -> Result<Self> {
        let features: Vec<FeatureTensor> = examples.into_iter().map(|e| e.features).collect();
        Ok(Self {
            features: FeatureTensor::stack(&features)?,
        })
    }
}

impl Shaped for PredictBatch {
    fn feature_shape(&self) -> &[usize] {
        self.features.shape()
    }

    fn label_shape(&self) -> Option<&[usize]> {
        None
    }
}

/// Builds batch streams for one configured input.
pub struct InputPipeline {
    config: PipelineConfig,
    codec: RecordCodec,
    source: Arc<dyn SourceProvider>,
    sources: SourceBuilder,
}

impl fmt::Debug for InputPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InputPipeline")
            .field("config", &self.config)
            .field("codec", &self.codec)
            .field("source", &self.source.kind())
            .finish()
    }
}

impl InputPipeline {
    /// Creates a pipeline reading from the configured source.
    pub fn new(config: &InputConfig) -> Result<Self> {
        Self::with_sources(config, SourceBuilder::from_config(config))
    }

    /// Creates a pipeline whose sources are resolved by `sources`.
    ///
    /// Use this to supply a storage backend or a scan client.
    pub fn with_sources(config: &InputConfig, sources: SourceBuilder) -> Result<Self> {
        config.validate()?;
        let source = sources.build()?;
        Ok(Self::assemble(config, source, sources))
    }

    /// Creates a pipeline around an already-built train/eval provider.
    pub fn with_provider(config: &InputConfig, source: Arc<dyn SourceProvider>) -> Result<Self> {
        config.validate()?;
        Ok(Self::assemble(config, source, SourceBuilder::from_config(config)))
    }

    fn assemble(config: &InputConfig, source: Arc<dyn SourceProvider>, sources: SourceBuilder) -> Self {
        let precision = Precision::from_use_bfloat16(config.pipeline.use_bfloat16);
        let codec = RecordCodec::new(config.schema.clone(), config.pipeline.image_size, precision);
        Self {
            config: config.pipeline.clone(),
            codec,
            source,
            sources,
        }
    }

    pub fn source_kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    fn prefetch_depth(&self) -> usize {
        self.config.prefetch.resolve(self.config.num_parallel_calls)
    }

    /// Builds the training or evaluation batch stream for one shard.
    ///
    /// Training streams are infinite. Evaluation streams end after the last
    /// full batch.
    ///
    /// # Errors
    ///
    /// Fails on an invalid shard context, a shape conflict, or a non-null
    /// source that is infinite during evaluation.
    pub fn input_fn(&self, ctx: &ShardContext) -> Result<Dataset<Batch>> {
        let shard = ctx.shard_spec()?;
        let kind = self.source.kind();
        let stream = self.source.make_source_stream(shard)?;

        if !self.config.is_training
            && kind != SourceKind::Null
            && stream.cardinality() == Cardinality::Infinite
        {
            return Err(InputError::config(format!(
                "evaluation requires a finite stream, but the {kind} source is infinite"
            )));
        }

        let transpose = self.config.transpose_input;
        let layout = if transpose {
            BatchLayout::BatchMinor
        } else {
            BatchLayout::BatchMajor
        };
        let contract = ShapeContract::declare(
            &TensorShape::known(&self.codec.feature_shape(kind == SourceKind::Null)),
            Some(&TensorShape::known(&[self.codec.label_len()])),
            ctx.batch_size,
            layout,
        )?;

        tracing::info!(
            source = %kind,
            shard = shard.index,
            total = shard.total,
            batch_size = ctx.batch_size,
            is_training = self.config.is_training,
            transpose,
            "building input pipeline"
        );

        let codec = self.codec.clone();
        let batches = stream
            .map_and_batch(
                ctx.batch_size,
                self.config.num_parallel_calls,
                true,
                move |record| codec.decode(&record, DecodeMode::TrainEval),
            )?
            .try_map(move |examples| {
                let batch = Batch::from_examples(examples)?;
                let batch = if transpose { batch.transposed() } else { batch };
                contract.apply(batch)
            });

        Ok(batches.prefetch(self.prefetch_depth()))
    }

    /// Builds the bulk-prediction batch stream for one shard.
    ///
    /// Prediction reads `price-*` files from the prediction directory in a
    /// single pass and never transposes.
    ///
    /// # Errors
    ///
    /// Returns `Precondition` when no prediction directory is configured or
    /// it does not exist.
    pub fn predict_input_fn(&self, ctx: &ShardContext) -> Result<Dataset<PredictBatch>> {
        let shard = ctx.shard_spec()?;
        let source = self.sources.build_predict()?;
        let stream = source.make_predict_stream(shard)?;

        let contract = ShapeContract::declare(
            &TensorShape::known(&self.codec.feature_shape(false)),
            None,
            ctx.batch_size,
            BatchLayout::BatchMajor,
        )?;

        tracing::info!(
            shard = shard.index,
            total = shard.total,
            batch_size = ctx.batch_size,
            "building prediction pipeline"
        );

        let codec = self.codec.clone();
        let batches = stream
            .map_and_batch(
                ctx.batch_size,
                self.config.num_parallel_calls,
                true,
                move |record| codec.decode(&record, DecodeMode::Predict),
            )?
            .try_map(move |examples| contract.apply(PredictBatch::from_examples(examples)?));

        Ok(batches.prefetch(self.prefetch_depth()))
    }

    /// Creates the raw-image serving adapter for this pipeline's settings.
    pub fn serving_receiver(&self) -> ServingInputReceiver {
        ServingInputReceiver::new(PreprocessOptions {
            image_size: self.config.image_size,
            channels: self.codec.schema().channel_inputs,
            precision: self.codec.precision(),
            seed: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{RawRecord, RecordSchema};
    use crate::dataset::{Elements, PrefetchDepth};
    use ndarray::IxDyn;

    fn small_config() -> InputConfig {
        let mut config = InputConfig::default();
        config.schema = RecordSchema {
            price_squared: 2,
            channel_inputs: 1,
            operation_outputs: 2,
            ..Default::default()
        };
        config.pipeline.num_parallel_calls = 2;
        config.pipeline.prefetch = PrefetchDepth::Fixed(2);
        config
    }

    fn example(value: f32) -> Example {
        Example {
            features: FeatureTensor::from_f32(
                ArrayD::from_elem(IxDyn(&[2, 2, 1]), value),
                Precision::F32,
            ),
            labels: Some(ArrayD::from_elem(IxDyn(&[2]), value)),
        }
    }

    /// An infinite provider that claims to be a file source.
    struct EndlessFiles;

    impl SourceProvider for EndlessFiles {
        fn kind(&self) -> SourceKind {
            SourceKind::Files
        }

        fn make_source_stream(&self, _shard: ShardSpec) -> Result<Dataset<RawRecord>> {
            Ok(Dataset::from_fn(Cardinality::Infinite, || {
                Ok(Box::new(std::iter::empty()) as Elements<RawRecord>)
            }))
        }

        fn make_predict_stream(&self, shard: ShardSpec) -> Result<Dataset<RawRecord>> {
            self.make_source_stream(shard)
        }
    }

    #[test]
    fn test_shard_context() {
        let ctx = ShardContext::new(8);
        assert_eq!(ctx.shard_spec().unwrap(), ShardSpec::single());

        assert!(ShardContext::new(0).shard_spec().is_err());
        assert!(matches!(
            ShardContext::new(8).with_shard(2, 2).shard_spec(),
            Err(InputError::InvalidShard { .. })
        ));
    }

    #[test]
    fn test_batch_from_examples_and_transpose() {
        let batch = Batch::from_examples(vec![example(1.0), example(2.0), example(3.0)]).unwrap();
        assert_eq!(batch.features.shape(), &[3, 2, 2, 1]);
        assert_eq!(batch.labels.shape(), &[3, 2]);
        assert_eq!(batch.batch_size(), 3);

        let t = batch.transposed();
        assert_eq!(t.layout, BatchLayout::BatchMinor);
        assert_eq!(t.features.shape(), &[2, 2, 1, 3]);
        assert_eq!(t.labels.shape(), &[2, 3]);
        assert_eq!(t.batch_size(), 3);
        assert_eq!(t.labels[[0, 2]], 3.0);
        assert_eq!(t.features.to_f32()[[1, 1, 0, 1]], 2.0);
    }

    #[test]
    fn test_batch_requires_labels() {
        let mut e = example(1.0);
        e.labels = None;
        assert!(Batch::from_examples(vec![e]).is_err());
    }

    #[test]
    fn test_null_training_pipeline() {
        let mut config = small_config();
        config.pipeline.is_training = true;
        config.pipeline.image_size = 4;

        let pipeline = InputPipeline::new(&config).unwrap();
        assert_eq!(pipeline.source_kind(), SourceKind::Null);

        let ds = pipeline.input_fn(&ShardContext::new(3)).unwrap();
        let mut iter = ds.iter().unwrap();
        for _ in 0..3 {
            let batch = iter.next().unwrap().unwrap();
            assert_eq!(batch.features.shape(), &[3, 4, 4, 1]);
            assert_eq!(batch.labels.shape(), &[3, 2]);
            assert!(batch.features.to_f32().iter().all(|&v| v == 0.0));
            assert!(batch.labels.iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn test_null_eval_is_allowed_to_be_infinite() {
        let pipeline = InputPipeline::new(&small_config()).unwrap();
        let ds = pipeline.input_fn(&ShardContext::new(2)).unwrap();
        assert_eq!(ds.cardinality(), Cardinality::Infinite);
    }

    #[test]
    fn test_infinite_eval_source_rejected() {
        let pipeline = InputPipeline::with_provider(&small_config(), Arc::new(EndlessFiles)).unwrap();
        let result = pipeline.input_fn(&ShardContext::new(2));
        assert!(matches!(result, Err(InputError::Config { .. })));
    }

    #[test]
    fn test_predict_without_dir_is_precondition() {
        let pipeline = InputPipeline::new(&small_config()).unwrap();
        let result = pipeline.predict_input_fn(&ShardContext::new(2));
        assert!(matches!(result, Err(InputError::Precondition { .. })));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = small_config();
        config.pipeline.num_parallel_calls = 0;
        assert!(InputPipeline::new(&config).is_err());
    }

    #[test]
    fn test_serving_receiver_uses_pipeline_settings() {
        let mut config = small_config();
        config.pipeline.use_bfloat16 = true;
        let pipeline = InputPipeline::new(&config).unwrap();

        let receiver = pipeline.serving_receiver();
        assert_eq!(receiver.options().image_size, 3);
        assert_eq!(receiver.options().channels, 1);
        assert_eq!(receiver.options().precision, Precision::Bf16);
    }
}
