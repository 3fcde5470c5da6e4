// rust/input-core/src/codec.rs

//! Record decoding.
//!
//! A training/eval record holds `price_squared² × channel_inputs` feature
//! fields followed by `operation_outputs` label fields. A prediction record
//! holds the feature fields only.

use bytes::Bytes;
use ndarray::{Array1, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::dataset::{FixedSizeFormat, NewlineDelimitedFormat, RecordFormat};
use crate::error::{InputError, Result};
use crate::tensor::{FeatureTensor, Precision};

/// Value of an empty CSV field.
pub const EMPTY_FIELD_DEFAULT: f32 = 1.0;

/// On-disk encoding of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordEncoding {
    /// Comma-separated text, one record per line.
    #[default]
    Csv,
    /// Packed little-endian `f32` fields.
    F32Le,
}

/// Field layout of a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSchema {
    pub price_squared: usize,
    pub channel_inputs: usize,
    pub operation_outputs: usize,
    pub encoding: RecordEncoding,
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            price_squared: 3,
            channel_inputs: 2,
            operation_outputs: 16,
            encoding: RecordEncoding::Csv,
        }
    }
}

impl RecordSchema {
    /// Number of feature fields.
    pub fn feature_fields(&self) -> usize {
        self.price_squared * self.price_squared * self.channel_inputs
    }

    /// Number of fields in a record of the given mode.
    pub fn field_count(&self, mode: DecodeMode) -> usize {
        match mode {
            DecodeMode::TrainEval => self.feature_fields() + self.operation_outputs,
            DecodeMode::Predict => self.feature_fields(),
        }
    }

    /// Shape of one decoded feature tensor.
    pub fn feature_shape(&self) -> [usize; 3] {
        [self.price_squared, self.price_squared, self.channel_inputs]
    }

    /// Record boundaries for files holding records of `mode`.
    pub fn record_format(&self, mode: DecodeMode) -> Arc<dyn RecordFormat> {
        match self.encoding {
            RecordEncoding::Csv => Arc::new(NewlineDelimitedFormat::new()),
            RecordEncoding::F32Le => Arc::new(FixedSizeFormat::new(4 * self.field_count(mode))),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.price_squared == 0 {
            return Err(InputError::config("schema.price_squared must be greater than 0"));
        }
        if self.channel_inputs == 0 {
            return Err(InputError::config("schema.channel_inputs must be greater than 0"));
        }
        if self.operation_outputs == 0 {
            return Err(InputError::config(
                "schema.operation_outputs must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Which fields a record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Features followed by labels.
    TrainEval,
    /// Features only.
    Predict,
}

/// One undecoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRecord {
    Data(Bytes),
    /// Stand-in emitted when no real data source is configured.
    Placeholder,
}

/// A decoded record.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    pub features: FeatureTensor,
    pub labels: Option<ArrayD<f32>>,
}

/// Decodes raw records into feature and label tensors.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    schema: RecordSchema,
    image_size: usize,
    precision: Precision,
}

impl RecordCodec {
    pub fn new(schema: RecordSchema, image_size: usize, precision: Precision) -> Self {
        Self {
            schema,
            image_size,
            precision,
        }
    }

    pub fn schema(&self) -> &RecordSchema {
        &self.schema
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Static shape of the features this codec produces for `record`.
    ///
    /// Placeholders are sized by `image_size`, real records by the schema.
    pub fn feature_shape(&self, placeholder: bool) -> [usize; 3] {
        if placeholder {
            [self.image_size, self.image_size, self.schema.channel_inputs]
        } else {
            self.schema.feature_shape()
        }
    }

    pub fn label_len(&self) -> usize {
        self.schema.operation_outputs
    }

    /// Decodes one record.
    ///
    /// # Errors
    ///
    /// Returns `Decode` when the record has the wrong number of fields or a
    /// field is not a number.
    pub fn decode(&self, record: &RawRecord, mode: DecodeMode) -> Result<Example> {
        let data = match record {
            RawRecord::Placeholder => return Ok(self.placeholder(mode)),
            RawRecord::Data(data) => data,
        };

        let expected = self.schema.field_count(mode);
        let mut values = match self.schema.encoding {
            RecordEncoding::Csv => parse_csv(data, expected)?,
            RecordEncoding::F32Le => parse_f32le(data, expected)?,
        };

        let labels = match mode {
            DecodeMode::TrainEval => {
                let labels = values.split_off(self.schema.feature_fields());
                Some(Array1::from_vec(labels).into_dyn())
            }
            DecodeMode::Predict => None,
        };

        let features = ArrayD::from_shape_vec(IxDyn(&self.schema.feature_shape()), values)
            .map_err(|e| InputError::decode(format!("cannot reshape features: {e}")))?;

        Ok(Example {
            features: FeatureTensor::from_f32(features, self.precision),
            labels,
        })
    }

    fn placeholder(&self, mode: DecodeMode) -> Example {
        let features = FeatureTensor::zeros(&self.feature_shape(true), self.precision);
        let labels = match mode {
            DecodeMode::TrainEval => Some(ArrayD::zeros(IxDyn(&[self.label_len()]))),
            DecodeMode::Predict => None,
        };
        Example { features, labels }
    }
}

fn parse_csv(data: &[u8], expected: usize) -> Result<Vec<f32>> {
    let text = std::str::from_utf8(data)
        .map_err(|e| InputError::decode(format!("record is not valid UTF-8: {e}")))?;
    if text.trim().is_empty() {
        return Err(InputError::decode("empty record"));
    }

    let mut values = Vec::with_capacity(expected);
    for (i, field) in text.split(',').enumerate() {
        let field = field.trim();
        let value = if field.is_empty() {
            EMPTY_FIELD_DEFAULT
        } else {
            field
                .parse::<f32>()
                .map_err(|_| InputError::decode(format!("field {i} is not a number: {field:?}")))?
        };
        values.push(value);
    }

    if values.len() != expected {
        return Err(InputError::decode(format!(
            "expected {expected} fields, found {}",
            values.len()
        )));
    }
    Ok(values)
}

fn parse_f32le(data: &[u8], expected: usize) -> Result<Vec<f32>> {
    if data.len() % 4 != 0 || data.len() / 4 != expected {
        return Err(InputError::decode(format!(
            "expected {expected} fields ({} bytes), found {} bytes",
            expected * 4,
            data.len()
        )));
    }

    Ok(data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
