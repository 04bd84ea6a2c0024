//! Error type for matrix setup and the multiply driver.

use thiserror::Error;
use wafer_core::DeviceError;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MatmulError {
    #[error("inner dimensions differ: A is {wa} wide, B is {hb} tall")]
    DimensionMismatch { wa: usize, hb: usize },

    #[error("matrix data has {got} elements, dimensions call for {expected}")]
    DataSize { expected: usize, got: usize },

    #[error("{label} of {value} is not a multiple of the tile edge {tile}")]
    TileMisaligned {
        label: &'static str,
        value: usize,
        tile: usize,
    },

    #[error("unsupported tile edge {0} (supported: 16, 32)")]
    UnsupportedTileEdge(usize),

    #[error("iteration count must be at least 1")]
    ZeroIterations,

    #[error(transparent)]
    Device(#[from] DeviceError),
}
