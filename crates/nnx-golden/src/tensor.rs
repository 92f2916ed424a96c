//! Dense integer tensors
//!
//! Every pipeline stage produces a fresh [`Tensor`]; nothing here mutates a
//! tensor after construction. Elements are stored widened to `i64`, which
//! holds every element type the accelerators use, including the 48-bit
//! products of the scale stage.

use crate::error::{NnxError, Result};
use crate::integer::IntegerType;
use crate::shapes::Shape;
use serde::{Deserialize, Serialize};

/// Dense row-major integer tensor tagged with its element domain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TensorRepr")]
pub struct Tensor {
    dtype: IntegerType,
    shape: Shape,
    data: Vec<i64>,
}

#[derive(Deserialize)]
struct TensorRepr {
    dtype: IntegerType,
    shape: Shape,
    data: Vec<i64>,
}

impl TryFrom<TensorRepr> for Tensor {
    type Error = NnxError;

    fn try_from(repr: TensorRepr) -> Result<Self> {
        Self::new(repr.dtype, repr.shape, repr.data)
    }
}

impl Tensor {
    /// Create a tensor, checking element count and element range
    ///
    /// # Errors
    ///
    /// Returns error if `data.len()` does not match `shape` or an element is
    /// not representable in `dtype`.
    pub fn new(dtype: IntegerType, shape: impl Into<Shape>, data: Vec<i64>) -> Result<Self> {
        let shape = shape.into();
        if shape.total_elements() != data.len() {
            return Err(NnxError::shape(format!(
                "shape {shape} holds {} elements, got {}",
                shape.total_elements(),
                data.len()
            )));
        }
        if let Some(index) = data.iter().position(|&v| !dtype.contains(v)) {
            return Err(NnxError::ValueOutOfRange {
                value: data[index],
                index,
                min: dtype.min(),
                max: dtype.max(),
            });
        }
        Ok(Self { dtype, shape, data })
    }

    /// Tensor filled with `value`
    ///
    /// # Errors
    ///
    /// Returns error if `value` is not representable in `dtype`.
    pub fn full(dtype: IntegerType, shape: impl Into<Shape>, value: i64) -> Result<Self> {
        let shape = shape.into();
        let len = shape.total_elements();
        Self::new(dtype, shape, vec![value; len])
    }

    /// Single-element tensor of shape `[1]`
    ///
    /// # Errors
    ///
    /// Returns error if `value` is not representable in `dtype`.
    pub fn scalar(dtype: IntegerType, value: i64) -> Result<Self> {
        Self::new(dtype, [1], vec![value])
    }

    /// Element domain
    pub const fn dtype(&self) -> IntegerType {
        self.dtype
    }

    /// Shape
    pub const fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Dimensions
    pub fn dims(&self) -> &[usize] {
        &self.shape.dims
    }

    /// Number of dimensions
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the tensor holds no elements
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Elements in row-major order
    pub fn data(&self) -> &[i64] {
        &self.data
    }

    /// Consume into the row-major element vector
    pub fn into_data(self) -> Vec<i64> {
        self.data
    }

    /// Element at a multi-index
    ///
    /// # Panics
    ///
    /// Panics if `index` has the wrong rank or is out of bounds.
    pub fn at(&self, index: &[usize]) -> i64 {
        assert_eq!(index.len(), self.rank(), "index rank mismatch");
        let flat = index
            .iter()
            .zip(&self.shape.dims)
            .fold(0, |acc, (&i, &d)| {
                assert!(i < d, "index {i} out of bounds for dimension {d}");
                acc * d + i
            });
        self.data[flat]
    }

    /// Check rank and, where given, each dimension
    ///
    /// # Errors
    ///
    /// Returns a shape error naming the tensor on mismatch.
    pub fn expect_dims(&self, name: &str, expected: &[usize]) -> Result<()> {
        if self.dims() == expected {
            Ok(())
        } else {
            Err(NnxError::shape(format!(
                "{name} has shape {}, expected {}",
                self.shape,
                Shape::from(expected)
            )))
        }
    }

    /// Same elements reinterpreted under another element domain
    ///
    /// # Errors
    ///
    /// Returns error if an element is not representable in `dtype`.
    pub fn retyped(&self, dtype: IntegerType) -> Result<Self> {
        Self::new(dtype, self.shape.clone(), self.data.clone())
    }

    /// Elements of a rank-4 `(N, C, H, W)` tensor flattened in `(N, H, W, C)`
    /// order, the order firmware reads activations in
    ///
    /// # Errors
    ///
    /// Returns error if the tensor is not rank 4.
    pub fn to_nhwc(&self) -> Result<Vec<i64>> {
        let [n, c, h, w] = self.dims() else {
            return Err(NnxError::shape(format!(
                "NHWC flattening needs a rank-4 tensor, got {}",
                self.shape
            )));
        };
        let (n, c, h, w) = (*n, *c, *h, *w);
        let mut out = Vec::with_capacity(self.len());
        for ni in 0..n {
            for hi in 0..h {
                for wi in 0..w {
                    for ci in 0..c {
                        out.push(self.data[((ni * c + ci) * h + hi) * w + wi]);
                    }
                }
            }
        }
        Ok(out)
    }
}
