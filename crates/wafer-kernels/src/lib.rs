//! # wafer-kernels
//!
//! The tiled matrix multiply for the wafer software device: the kernel
//! itself, the host driver that stages/times/validates a run, and the
//! reporting types the CLI prints.
//!
//! - [`matrix`]: host matrices and a sequential reference product
//! - [`kernel`]: the `TILE x TILE` group-shared multiply kernel
//! - [`driver`]: allocate, upload, warm up, time, read back, validate
//! - [`verify`]: exhaustive relative-error validation
//! - [`report`]: the run summary and its console form

pub mod driver;
pub mod error;
pub mod kernel;
pub mod matrix;
pub mod report;
pub mod verify;

pub use driver::{multiply, MultiplyConfig, VAL_A, VAL_B};
pub use error::MatmulError;
pub use kernel::{launch_tiled, TiledMatmul, SUPPORTED_TILE_EDGES};
pub use matrix::{multiply_reference, HostMatrix, MatrixDims};
pub use report::MultiplyReport;
pub use verify::{verify_uniform, Mismatch, EPS};

/// Crate-wide result type.
pub type Result<T> = std::result::Result<T, MatmulError>;
