//! Host-side matrices in row-major order.

use std::fmt;

use crate::error::MatmulError;

/// Width x height of one matrix. `width` is the number of columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixDims {
    pub width: usize,
    pub height: usize,
}

impl MatrixDims {
    pub const fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub const fn square(n: usize) -> Self {
        Self {
            width: n,
            height: n,
        }
    }

    /// Element count.
    pub const fn len(&self) -> usize {
        self.width * self.height
    }

    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for MatrixDims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A dense row-major `f32` matrix on the host.
#[derive(Debug, Clone, PartialEq)]
pub struct HostMatrix {
    dims: MatrixDims,
    data: Vec<f32>,
}

impl HostMatrix {
    /// Every element set to `value`.
    pub fn filled(dims: MatrixDims, value: f32) -> Self {
        Self {
            dims,
            data: vec![value; dims.len()],
        }
    }

    /// A small repeating pattern, handy for exercising kernels with
    /// non-uniform data.
    pub fn patterned(dims: MatrixDims) -> Self {
        let data = (0..dims.len())
            .map(|i| ((i * 7 + 3) % 13) as f32 * 0.25)
            .collect();
        Self { dims, data }
    }

    pub fn from_vec(dims: MatrixDims, data: Vec<f32>) -> Result<Self, MatmulError> {
        if data.len() != dims.len() {
            return Err(MatmulError::DataSize {
                expected: dims.len(),
                got: data.len(),
            });
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> MatrixDims {
        self.dims
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.dims.width + col]
    }
}

/// Sequential reference product, accumulating in ascending-k order.
///
/// The device kernel sums its partial products in the same order, so for
/// identical inputs the two agree bit for bit, not just approximately.
pub fn multiply_reference(a: &HostMatrix, b: &HostMatrix) -> Result<HostMatrix, MatmulError> {
    if a.dims().width != b.dims().height {
        return Err(MatmulError::DimensionMismatch {
            wa: a.dims().width,
            hb: b.dims().height,
        });
    }
    let out_dims = MatrixDims::new(b.dims().width, a.dims().height);
    let mut out = vec![0.0f32; out_dims.len()];
    for row in 0..out_dims.height {
        for col in 0..out_dims.width {
            let mut sum = 0.0f32;
            for k in 0..a.dims().width {
                sum += a.at(row, k) * b.at(k, col);
            }
            out[row * out_dims.width + col] = sum;
        }
    }
    HostMatrix::from_vec(out_dims, out)
}
