// rust/input-core/src/shape.rs

//! Static shape declarations for batches.
//!
//! Shapes are declared once when a pipeline is built, with the batch
//! dimension pinned. Every batch is then checked against the declaration.

use std::fmt;

use crate::error::{InputError, Result};

/// A tensor shape whose dimensions may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorShape(Vec<Option<usize>>);

impl TensorShape {
    pub fn new(dims: Vec<Option<usize>>) -> Self {
        Self(dims)
    }

    /// A shape with every dimension known.
    pub fn known(dims: &[usize]) -> Self {
        Self(dims.iter().copied().map(Some).collect())
    }

    /// A shape of the given rank with no known dimensions.
    pub fn unknown(rank: usize) -> Self {
        Self(vec![None; rank])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Option<usize>] {
        &self.0
    }

    pub fn is_fully_defined(&self) -> bool {
        self.0.iter().all(Option::is_some)
    }

    /// Unifies two shapes, keeping every dimension either one knows.
    ///
    /// # Errors
    ///
    /// Returns `Shape` when the ranks differ or a dimension is known to both
    /// with different values.
    pub fn merge_with(&self, other: &TensorShape) -> Result<TensorShape> {
        if self.rank() != other.rank() {
            return Err(InputError::shape(format!(
                "shapes {self} and {other} have different ranks"
            )));
        }

        self.0
            .iter()
            .zip(&other.0)
            .enumerate()
            .map(|(axis, (a, b))| match (a, b) {
                (Some(x), Some(y)) if x != y => Err(InputError::shape(format!(
                    "shapes {self} and {other} conflict in dimension {axis}"
                ))),
                (Some(x), _) | (None, Some(x)) => Ok(Some(*x)),
                (None, None) => Ok(None),
            })
            .collect::<Result<Vec<_>>>()
            .map(TensorShape)
    }

    /// Whether a concrete shape satisfies this one.
    pub fn is_compatible_with(&self, concrete: &[usize]) -> bool {
        self.rank() == concrete.len()
            && self
                .0
                .iter()
                .zip(concrete)
                .all(|(dim, actual)| dim.map_or(true, |d| d == *actual))
    }

    /// Returns a copy with `dim` inserted at `axis`.
    fn with_dim_at(&self, axis: usize, dim: Option<usize>) -> Self {
        let mut dims = self.0.clone();
        dims.insert(axis, dim);
        Self(dims)
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            match dim {
                Some(d) => write!(f, "{d}")?,
                None => f.write_str("?")?,
            }
        }
        f.write_str(")")
    }
}

/// Where the batch dimension sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BatchLayout {
    /// `(B, H, W, C)` features and `(B, L)` labels.
    #[default]
    BatchMajor,
    /// `(H, W, C, B)` features and `(L, B)` labels.
    BatchMinor,
}

impl BatchLayout {
    fn batch_axis(self, rank: usize) -> usize {
        match self {
            Self::BatchMajor => 0,
            Self::BatchMinor => rank,
        }
    }
}

/// Anything a [`ShapeContract`] can check.
pub trait Shaped {
    fn feature_shape(&self) -> &[usize];

    fn label_shape(&self) -> Option<&[usize]>;
}

/// The declared static shapes of every batch a pipeline emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeContract {
    features: TensorShape,
    labels: Option<TensorShape>,
    layout: BatchLayout,
    batch_size: usize,
}

impl ShapeContract {
    /// Declares batch shapes from per-element shapes.
    ///
    /// The batch dimension is pinned to `batch_size`, leading for
    /// `BatchMajor` and trailing for `BatchMinor`.
    ///
    /// # Errors
    ///
    /// Returns `Shape` for a zero batch size or an element shape that
    /// already carries a conflicting batch dimension.
    pub fn declare(
        feature_shape: &TensorShape,
        label_shape: Option<&TensorShape>,
        batch_size: usize,
        layout: BatchLayout,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(InputError::shape("batch size must be greater than 0"));
        }

        let features = pin_batch(feature_shape, batch_size, layout)?;
        let labels = label_shape
            .map(|shape| pin_batch(shape, batch_size, layout))
            .transpose()?;

        Ok(Self {
            features,
            labels,
            layout,
            batch_size,
        })
    }

    pub fn features(&self) -> &TensorShape {
        &self.features
    }

    pub fn labels(&self) -> Option<&TensorShape> {
        self.labels.as_ref()
    }

    pub fn layout(&self) -> BatchLayout {
        self.layout
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Checks `batch` against the declared shapes and returns it unchanged.
    pub fn apply<B: Shaped>(&self, batch: B) -> Result<B> {
        check("features", &self.features, batch.feature_shape())?;

        match (&self.labels, batch.label_shape()) {
            (Some(declared), Some(actual)) => check("labels", declared, actual)?,
            (None, None) => {}
            (Some(_), None) => return Err(InputError::shape("batch is missing labels")),
            (None, Some(_)) => {
                return Err(InputError::shape("batch carries undeclared labels"))
            }
        }

        Ok(batch)
    }
}

fn pin_batch(element: &TensorShape, batch_size: usize, layout: BatchLayout) -> Result<TensorShape> {
    let axis = layout.batch_axis(element.rank());
    let declared = element.with_dim_at(axis, None);
    let pinned = TensorShape::unknown(element.rank()).with_dim_at(axis, Some(batch_size));
    declared.merge_with(&pinned)
}

fn check(name: &str, declared: &TensorShape, actual: &[usize]) -> Result<()> {
    if declared.is_compatible_with(actual) {
        Ok(())
    } else {
        Err(InputError::shape(format!(
            "{name} shape {actual:?} does not match declared {declared}"
        )))
    }
}
