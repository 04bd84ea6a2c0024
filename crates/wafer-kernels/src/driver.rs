//! Host driver for the timed multiply run.
//!
//! One call to [`multiply`] performs the whole flow: validate the
//! configuration, stage A and B on the device, run one warmup launch,
//! then a timed window of back-to-back launches bracketed by queue
//! events, read C back, and validate every element. Nothing inside the
//! timed window synchronizes; the queue keeps the launches in order.

use tracing::{debug, info};
use wafer_core::{Device, DeviceBuffer, Event};

use crate::error::MatmulError;
use crate::kernel::{launch_tiled, SUPPORTED_TILE_EDGES};
use crate::matrix::{HostMatrix, MatrixDims};
use crate::report::MultiplyReport;
use crate::verify::{verify_uniform, EPS};

/// Fill value for A.
pub const VAL_A: f32 = 1.0;
/// Fill value for B. With these fills every element of C is
/// `width(A) * VAL_B`, which is what validation checks against.
pub const VAL_B: f32 = 0.01;

/// Parameters of one multiply run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplyConfig {
    pub dims_a: MatrixDims,
    pub dims_b: MatrixDims,
    /// Tile edge; groups are `tile_edge x tile_edge` units.
    pub tile_edge: usize,
    /// Timed launches after the warmup.
    pub iterations: usize,
}

impl Default for MultiplyConfig {
    fn default() -> Self {
        Self {
            dims_a: MatrixDims::square(320),
            dims_b: MatrixDims::square(320),
            tile_edge: 32,
            iterations: 300,
        }
    }
}

impl MultiplyConfig {
    /// Reject impossible geometry before any device work happens.
    pub fn validate(&self) -> Result<(), MatmulError> {
        if self.dims_a.width != self.dims_b.height {
            return Err(MatmulError::DimensionMismatch {
                wa: self.dims_a.width,
                hb: self.dims_b.height,
            });
        }
        if !SUPPORTED_TILE_EDGES.contains(&self.tile_edge) {
            return Err(MatmulError::UnsupportedTileEdge(self.tile_edge));
        }
        let edges = [
            ("width of A", self.dims_a.width),
            ("height of A", self.dims_a.height),
            ("width of B", self.dims_b.width),
            ("height of B", self.dims_b.height),
        ];
        for (label, value) in edges {
            if value % self.tile_edge != 0 {
                return Err(MatmulError::TileMisaligned {
                    label,
                    value,
                    tile: self.tile_edge,
                });
            }
        }
        if self.iterations == 0 {
            return Err(MatmulError::ZeroIterations);
        }
        Ok(())
    }

    /// Floating-point operations in one multiply.
    pub fn flops(&self) -> f64 {
        2.0 * self.dims_a.width as f64 * self.dims_a.height as f64 * self.dims_b.width as f64
    }

    /// The uniform value every element of C must take.
    pub fn expected_value(&self) -> f32 {
        self.dims_a.width as f32 * VAL_B
    }

    pub fn output_dims(&self) -> MatrixDims {
        MatrixDims::new(self.dims_b.width, self.dims_a.height)
    }
}

/// Run, time, and validate the tiled multiply on `device`.
pub fn multiply(device: &Device, config: &MultiplyConfig) -> Result<MultiplyReport, MatmulError> {
    config.validate()?;
    info!(
        a = %config.dims_a,
        b = %config.dims_b,
        tile = config.tile_edge,
        iterations = config.iterations,
        device = device.name(),
        "multiply starting"
    );

    let host_a = HostMatrix::filled(config.dims_a, VAL_A);
    let host_b = HostMatrix::filled(config.dims_b, VAL_B);
    let d_a = DeviceBuffer::from_host(device, host_a.as_slice())?;
    let d_b = DeviceBuffer::from_host(device, host_b.as_slice())?;
    let d_c = DeviceBuffer::alloc(device, config.output_dims().len())?;
    debug!(
        bytes = d_a.byte_size() + d_b.byte_size() + d_c.byte_size(),
        "device buffers staged"
    );

    let queue = device.queue();

    // Warmup launch outside the timed window.
    launch_tiled(
        queue,
        config.tile_edge,
        &d_a,
        &d_b,
        &d_c,
        config.dims_a,
        config.dims_b,
    )?;
    queue.synchronize()?;

    let start = Event::new();
    let stop = Event::new();
    queue.record(&start)?;
    for _ in 0..config.iterations {
        launch_tiled(
            queue,
            config.tile_edge,
            &d_a,
            &d_b,
            &d_c,
            config.dims_a,
            config.dims_b,
        )?;
    }
    queue.record(&stop)?;
    stop.synchronize()?;
    // Surface any deferred fault before C is read back.
    queue.synchronize()?;

    let total = start.elapsed(&stop)?;
    let ms_per_multiply = total.as_secs_f64() * 1e3 / config.iterations as f64;
    let flops = config.flops();
    let gflops = (flops * 1e-9) / (ms_per_multiply * 1e-3);

    let result = d_c.to_host();
    let mismatches = verify_uniform(&result, config.expected_value(), config.dims_a.width);
    info!(
        gflops,
        ms_per_multiply,
        mismatches = mismatches.len(),
        "multiply finished"
    );

    Ok(MultiplyReport {
        gflops,
        ms_per_multiply,
        flops_per_multiply: flops,
        group_units: config.tile_edge * config.tile_edge,
        iterations: config.iterations,
        checked: result.len(),
        eps: EPS,
        mismatches,
    })
}
