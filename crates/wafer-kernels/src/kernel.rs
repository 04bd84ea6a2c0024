//! The tiled matrix-multiply kernel.
//!
//! Each group owns one `TILE x TILE` block of C. The kernel walks the
//! inner dimension in tile-wide steps; per step every unit stages one
//! element of A and one of B into group-shared memory, the group
//! barriers, every unit folds the staged tiles into its private
//! accumulator, and the group barriers again before the next step
//! overwrites the staging area. C is written once, after the last step.
//!
//! Accumulation order is fixed (tile steps ascending, k within a tile
//! ascending), so results are bit-identical across devices with any lane
//! count, and match [`multiply_reference`](crate::matrix::multiply_reference).

use std::sync::Arc;

use wafer_core::{DeviceBuffer, DeviceQueue, GroupCtx, Kernel, LaunchConfig};

use crate::error::MatmulError;
use crate::matrix::MatrixDims;

/// Tile edges the dispatcher can instantiate.
pub const SUPPORTED_TILE_EDGES: &[usize] = &[16, 32];

/// C = A x B over `TILE x TILE` groups. Dimensions must be multiples of
/// `TILE`; the driver enforces that before launching.
pub struct TiledMatmul<const TILE: usize> {
    pub a: DeviceBuffer,
    pub b: DeviceBuffer,
    pub c: DeviceBuffer,
    /// Width of A, the length of every dot product.
    pub wa: usize,
    /// Width of B and of C.
    pub wb: usize,
}

impl<const TILE: usize> Kernel for TiledMatmul<TILE> {
    fn name(&self) -> &str {
        "tiled_matmul"
    }

    fn run(&self, ctx: &GroupCtx<'_>) {
        let group = ctx.group();
        let steps = self.wa / TILE;
        // Staging layout: A tile in words [0, TILE^2), B tile after it.
        let b_base = TILE * TILE;
        let shared = ctx.shared();

        let units: Vec<_> = ctx.units().collect();
        let mut acc = vec![0.0f32; units.len()];

        for m in 0..steps {
            for unit in &units {
                let row = group.y * TILE + unit.pos.y;
                let col = group.x * TILE + unit.pos.x;
                shared.store(
                    unit.pos.y * TILE + unit.pos.x,
                    ctx.load(&self.a, row * self.wa + (m * TILE + unit.pos.x)),
                );
                shared.store(
                    b_base + unit.pos.y * TILE + unit.pos.x,
                    ctx.load(&self.b, (m * TILE + unit.pos.y) * self.wb + col),
                );
            }
            // Tiles fully staged before anyone reads them.
            if !ctx.sync() {
                return;
            }
            for (unit, sum) in units.iter().zip(acc.iter_mut()) {
                for k in 0..TILE {
                    *sum += shared.load(unit.pos.y * TILE + k)
                        * shared.load(b_base + k * TILE + unit.pos.x);
                }
            }
            // Everyone done reading before the next step restages.
            if !ctx.sync() {
                return;
            }
        }

        for (unit, &sum) in units.iter().zip(acc.iter()) {
            let row = group.y * TILE + unit.pos.y;
            let col = group.x * TILE + unit.pos.x;
            ctx.store(&self.c, row * self.wb + col, sum);
        }
    }
}

/// Geometry for a tiled multiply: one group per C tile, one unit per C
/// element, staging for one A tile plus one B tile.
pub fn tiled_launch_config(dims_a: MatrixDims, dims_b: MatrixDims, tile: usize) -> LaunchConfig {
    LaunchConfig::grid_2d_shared(
        dims_a.height,
        dims_b.width,
        tile,
        tile,
        2 * tile * tile * 4,
    )
}

/// Submit one tiled multiply with the tile edge picked at runtime.
pub fn launch_tiled(
    queue: &DeviceQueue,
    tile: usize,
    a: &DeviceBuffer,
    b: &DeviceBuffer,
    c: &DeviceBuffer,
    dims_a: MatrixDims,
    dims_b: MatrixDims,
) -> Result<(), MatmulError> {
    let cfg = tiled_launch_config(dims_a, dims_b, tile);
    let (a, b, c) = (a.clone(), b.clone(), c.clone());
    let (wa, wb) = (dims_a.width, dims_b.width);
    match tile {
        16 => queue.launch(cfg, Arc::new(TiledMatmul::<16> { a, b, c, wa, wb }))?,
        32 => queue.launch(cfg, Arc::new(TiledMatmul::<32> { a, b, c, wa, wb }))?,
        other => return Err(MatmulError::UnsupportedTileEdge(other)),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::{multiply_reference, HostMatrix};
    use wafer_core::{Device, DeviceConfig};

    fn device(lanes: usize) -> Device {
        Device::new(DeviceConfig::with_lanes("kernel-test", lanes)).unwrap()
    }

    fn run_device_multiply(
        dev: &Device,
        tile: usize,
        a: &HostMatrix,
        b: &HostMatrix,
    ) -> Vec<f32> {
        let d_a = DeviceBuffer::from_host(dev, a.as_slice()).unwrap();
        let d_b = DeviceBuffer::from_host(dev, b.as_slice()).unwrap();
        let d_c = DeviceBuffer::alloc(dev, a.dims().height * b.dims().width).unwrap();
        launch_tiled(dev.queue(), tile, &d_a, &d_b, &d_c, a.dims(), b.dims()).unwrap();
        dev.synchronize().unwrap();
        d_c.to_host()
    }

    #[test]
    fn test_matches_reference_bit_for_bit() {
        let dev = device(3);
        let a = HostMatrix::patterned(MatrixDims::new(32, 16));
        let b = HostMatrix::patterned(MatrixDims::new(48, 32));
        let want = multiply_reference(&a, &b).unwrap();

        let got = run_device_multiply(&dev, 16, &a, &b);
        assert_eq!(got.len(), want.as_slice().len());
        for (g, w) in got.iter().zip(want.as_slice()) {
            assert_eq!(g.to_bits(), w.to_bits());
        }
    }

    #[test]
    fn test_tile_32_matches_tile_16() {
        let dev = device(4);
        let a = HostMatrix::patterned(MatrixDims::square(64));
        let b = HostMatrix::patterned(MatrixDims::square(64));

        let with_16 = run_device_multiply(&dev, 16, &a, &b);
        let with_32 = run_device_multiply(&dev, 32, &a, &b);
        for (x, y) in with_16.iter().zip(&with_32) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }

    #[test]
    fn test_result_independent_of_lane_count() {
        let a = HostMatrix::patterned(MatrixDims::new(32, 32));
        let b = HostMatrix::patterned(MatrixDims::new(32, 32));
        let mut outputs = Vec::new();
        for lanes in [1, 2, 5, 8] {
            let dev = device(lanes);
            outputs.push(run_device_multiply(&dev, 16, &a, &b));
        }
        for other in &outputs[1..] {
            for (x, y) in outputs[0].iter().zip(other) {
                assert_eq!(x.to_bits(), y.to_bits());
            }
        }
    }

    #[test]
    fn test_launch_config_shape() {
        let cfg = tiled_launch_config(MatrixDims::new(320, 320), MatrixDims::new(320, 320), 32);
        assert_eq!(cfg.grid.count(), 100);
        assert_eq!(cfg.group.count(), 1024);
        assert_eq!(cfg.shared_bytes, 8192);
    }

    #[test]
    fn test_unsupported_tile_rejected_without_submitting() {
        let dev = device(1);
        let a = HostMatrix::filled(MatrixDims::square(16), 1.0);
        let d_a = DeviceBuffer::from_host(&dev, a.as_slice()).unwrap();
        let err = launch_tiled(
            dev.queue(),
            24,
            &d_a,
            &d_a,
            &d_a,
            a.dims(),
            a.dims(),
        )
        .unwrap_err();
        assert_eq!(err, MatmulError::UnsupportedTileEdge(24));
        // Nothing was enqueued, so the queue stays clean.
        dev.synchronize().unwrap();
    }
}
