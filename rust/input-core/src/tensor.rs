// rust/input-core/src/tensor.rs

//! Feature tensors in float32 or bfloat16.

use half::bf16;
use ndarray::{Array1, ArrayD, ArrayViewD, Axis, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{InputError, Result};

/// Numeric precision of feature tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    #[default]
    F32,
    Bf16,
}

impl Precision {
    pub fn from_use_bfloat16(use_bfloat16: bool) -> Self {
        if use_bfloat16 {
            Self::Bf16
        } else {
            Self::F32
        }
    }
}

/// A dense feature tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureTensor {
    F32(ArrayD<f32>),
    Bf16(ArrayD<bf16>),
}

impl FeatureTensor {
    /// Wraps `values` in the requested precision.
    pub fn from_f32(values: ArrayD<f32>, precision: Precision) -> Self {
        match precision {
            Precision::F32 => Self::F32(values),
            Precision::Bf16 => Self::Bf16(values.mapv(bf16::from_f32)),
        }
    }

    pub fn zeros(shape: &[usize], precision: Precision) -> Self {
        match precision {
            Precision::F32 => Self::F32(ArrayD::zeros(IxDyn(shape))),
            Precision::Bf16 => Self::Bf16(ArrayD::from_elem(IxDyn(shape), bf16::ZERO)),
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Self::F32(a) => a.shape(),
            Self::Bf16(a) => a.shape(),
        }
    }

    pub fn precision(&self) -> Precision {
        match self {
            Self::F32(_) => Precision::F32,
            Self::Bf16(_) => Precision::Bf16,
        }
    }

    /// Returns the values widened to f32.
    pub fn to_f32(&self) -> ArrayD<f32> {
        match self {
            Self::F32(a) => a.clone(),
            Self::Bf16(a) => a.mapv(f32::from),
        }
    }

    /// Stacks same-shaped tensors along a new leading axis.
    ///
    /// # Errors
    ///
    /// Fails on an empty input, mixed precisions or mismatched shapes.
    pub fn stack(items: &[FeatureTensor]) -> Result<Self> {
        let first = items
            .first()
            .ok_or_else(|| InputError::shape("cannot stack an empty list of tensors"))?;

        match first {
            Self::F32(_) => {
                let views = items
                    .iter()
                    .map(|t| match t {
                        Self::F32(a) => Ok(a.view()),
                        Self::Bf16(_) => Err(mixed_precision()),
                    })
                    .collect::<Result<Vec<ArrayViewD<'_, f32>>>>()?;
                Ok(Self::F32(stack_views(&views)?))
            }
            Self::Bf16(_) => {
                let views = items
                    .iter()
                    .map(|t| match t {
                        Self::Bf16(a) => Ok(a.view()),
                        Self::F32(_) => Err(mixed_precision()),
                    })
                    .collect::<Result<Vec<ArrayViewD<'_, bf16>>>>()?;
                Ok(Self::Bf16(stack_views(&views)?))
            }
        }
    }

    /// Returns the tensor with its axes reordered, in standard layout.
    pub fn permuted(&self, axes: &[usize]) -> Self {
        match self {
            Self::F32(a) => Self::F32(permute(a, axes)),
            Self::Bf16(a) => Self::Bf16(permute(a, axes)),
        }
    }

    /// Row-major rank-1 view of the values.
    pub fn flatten(&self) -> Self {
        match self {
            Self::F32(a) => Self::F32(flat(a)),
            Self::Bf16(a) => Self::Bf16(flat(a)),
        }
    }
}

fn mixed_precision() -> InputError {
    InputError::shape("cannot stack tensors of mixed precision")
}

fn stack_views<A: Clone>(views: &[ArrayViewD<'_, A>]) -> Result<ArrayD<A>> {
    ndarray::stack(Axis(0), views).map_err(|e| InputError::shape(format!("stack failed: {e}")))
}

fn permute<A: Clone>(array: &ArrayD<A>, axes: &[usize]) -> ArrayD<A> {
    array
        .view()
        .permuted_axes(IxDyn(axes))
        .as_standard_layout()
        .into_owned()
}

fn flat<A: Clone>(array: &ArrayD<A>) -> ArrayD<A> {
    Array1::from_iter(array.iter().cloned()).into_dyn()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn arange(shape: &[usize]) -> ArrayD<f32> {
        let len: usize = shape.iter().product();
        ArrayD::from_shape_vec(IxDyn(shape), (0..len).map(|v| v as f32).collect()).unwrap()
    }

    #[test]
    fn test_bf16_conversion() {
        let t = FeatureTensor::from_f32(arange(&[2, 2]), Precision::Bf16);
        assert_eq!(t.precision(), Precision::Bf16);
        assert_eq!(t.shape(), &[2, 2]);
        // Small integers are exact in bf16
        assert_eq!(t.to_f32(), arange(&[2, 2]));
    }

    #[test]
    fn test_zeros() {
        let t = FeatureTensor::zeros(&[3, 3, 2], Precision::Bf16);
        assert_eq!(t.shape(), &[3, 3, 2]);
        assert!(t.to_f32().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_stack() {
        let a = FeatureTensor::from_f32(arange(&[2, 3]), Precision::F32);
        let b = FeatureTensor::zeros(&[2, 3], Precision::F32);
        let stacked = FeatureTensor::stack(&[a, b]).unwrap();
        assert_eq!(stacked.shape(), &[2, 2, 3]);
        assert_eq!(stacked.to_f32()[[0, 1, 2]], 5.0);
        assert_eq!(stacked.to_f32()[[1, 1, 2]], 0.0);
    }

    #[test]
    fn test_stack_rejects_mixed_inputs() {
        let a = FeatureTensor::zeros(&[2], Precision::F32);
        let b = FeatureTensor::zeros(&[2], Precision::Bf16);
        assert!(FeatureTensor::stack(&[a.clone(), b]).is_err());

        let c = FeatureTensor::zeros(&[3], Precision::F32);
        assert!(FeatureTensor::stack(&[a, c]).is_err());
        assert!(FeatureTensor::stack(&[]).is_err());
    }

    #[test]
    fn test_permuted_moves_batch_last() {
        let t = FeatureTensor::from_f32(arange(&[2, 3, 3, 1]), Precision::F32);
        let p = t.permuted(&[1, 2, 3, 0]);
        assert_eq!(p.shape(), &[3, 3, 1, 2]);
        assert_eq!(p.to_f32()[[0, 1, 0, 1]], t.to_f32()[[1, 0, 1, 0]]);
    }

    #[test]
    fn test_flatten_is_row_major() {
        let t = FeatureTensor::from_f32(arange(&[2, 2, 2]), Precision::F32);
        let flat = t.flatten();
        assert_eq!(flat.shape(), &[8]);
        assert_eq!(
            flat.to_f32().iter().copied().collect::<Vec<f32>>(),
            (0..8).map(|v| v as f32).collect::<Vec<f32>>()
        );
    }
}
