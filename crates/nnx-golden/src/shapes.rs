//! Shapes and convolution geometry

use serde::{Deserialize, Serialize};

/// Tensor shape (dimensions)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Shape {
    /// Dimensions, outermost first (e.g. `[n, c, h, w]`)
    pub dims: Vec<usize>,
}

impl Shape {
    /// Create new shape
    pub const fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Get total number of elements
    #[must_use]
    pub fn total_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Get number of dimensions
    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{dim}")?;
        }
        write!(f, "]")
    }
}

/// Convolution kernel extent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelShape {
    /// Kernel rows
    pub height: usize,
    /// Kernel columns
    pub width: usize,
}

impl KernelShape {
    /// Pointwise kernel
    pub const K1X1: Self = Self::square(1);
    /// 3×3 kernel
    pub const K3X3: Self = Self::square(3);

    /// Square kernel of side `side`
    pub const fn square(side: usize) -> Self {
        Self {
            height: side,
            width: side,
        }
    }

    /// Side length if the kernel is square
    pub const fn side(&self) -> Option<usize> {
        if self.height == self.width {
            Some(self.height)
        } else {
            None
        }
    }

    /// Spatial element count
    pub const fn area(&self) -> usize {
        self.height * self.width
    }
}

impl std::fmt::Display for KernelShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// Convolution stride
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stride {
    /// Vertical step
    pub height: usize,
    /// Horizontal step
    pub width: usize,
}

impl Stride {
    /// Unit stride
    pub const S1X1: Self = Self::square(1);
    /// Stride 2 in both directions
    pub const S2X2: Self = Self::square(2);

    /// Square stride
    pub const fn square(step: usize) -> Self {
        Self {
            height: step,
            width: step,
        }
    }

    /// Step if the stride is square
    pub const fn side(&self) -> Option<usize> {
        if self.height == self.width {
            Some(self.height)
        } else {
            None
        }
    }
}

impl Default for Stride {
    fn default() -> Self {
        Self::S1X1
    }
}

impl std::fmt::Display for Stride {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.height, self.width)
    }
}

/// Zero padding applied around the input
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Padding {
    /// Rows above
    pub top: usize,
    /// Rows below
    pub bottom: usize,
    /// Columns left
    pub left: usize,
    /// Columns right
    pub right: usize,
}

impl Padding {
    /// No padding
    pub const ZERO: Self = Self::uniform(0);

    /// Same padding on every side
    pub const fn uniform(amount: usize) -> Self {
        Self {
            top: amount,
            bottom: amount,
            left: amount,
            right: amount,
        }
    }

    /// Whether every side is zero
    pub const fn is_zero(&self) -> bool {
        self.top == 0 && self.bottom == 0 && self.left == 0 && self.right == 0
    }
}

impl std::fmt::Display for Padding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(top {}, bottom {}, left {}, right {})",
            self.top, self.bottom, self.left, self.right
        )
    }
}

/// Input extent after padding, `None` on overflow
pub const fn padded_size(input: usize, pad_before: usize, pad_after: usize) -> Option<usize> {
    match input.checked_add(pad_before) {
        Some(partial) => partial.checked_add(pad_after),
        None => None,
    }
}

/// Output extent of a strided convolution along one axis, `None` if the
/// kernel does not fit in the padded input or the padded input overflows
pub const fn conv_output_size(
    input: usize,
    pad_before: usize,
    pad_after: usize,
    kernel: usize,
    stride: usize,
) -> Option<usize> {
    let Some(padded) = padded_size(input, pad_before, pad_after) else {
        return None;
    };
    if kernel == 0 || stride == 0 || padded < kernel {
        None
    } else {
        Some((padded - kernel) / stride + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_total_elements() {
        let shape = Shape::new(vec![2, 3, 4]);
        assert_eq!(shape.total_elements(), 24);
    }

    #[test]
    fn test_shape_rank() {
        let shape = Shape::from([1, 16, 8, 8]);
        assert_eq!(shape.rank(), 4);
    }

    #[test]
    fn test_shape_display() {
        let shape = Shape::new(vec![1, 32, 8, 8]);
        assert_eq!(format!("{shape}"), "[1, 32, 8, 8]");
    }

    #[test]
    fn test_same_padding_keeps_extent() {
        assert_eq!(conv_output_size(8, 1, 1, 3, 1), Some(8));
        assert_eq!(conv_output_size(8, 0, 0, 1, 1), Some(8));
        assert_eq!(conv_output_size(8, 1, 1, 3, 2), Some(4));
        assert_eq!(conv_output_size(2, 0, 0, 3, 1), None);
        assert_eq!(conv_output_size(8, usize::MAX, 0, 3, 1), None);
        assert_eq!(conv_output_size(8, 1, usize::MAX, 3, 1), None);
    }

    #[test]
    fn test_geometry_display() {
        assert_eq!(KernelShape::K3X3.to_string(), "3x3");
        assert_eq!(Stride::S2X2.to_string(), "2x2");
        assert!(Padding::ZERO.is_zero());
        assert!(!Padding::uniform(1).is_zero());
    }
}
