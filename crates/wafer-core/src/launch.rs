//! Launch geometry: how many groups, how many units per group, and how
//! much group-shared staging memory a kernel gets.

use crate::device::DeviceConfig;
use crate::dim::Dim2;
use crate::error::DeviceError;

/// Geometry for one kernel launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Groups along each axis.
    pub grid: Dim2,
    /// Execution units per group, along each axis.
    pub group: Dim2,
    /// Bytes of group-shared staging memory, word (4-byte) granular.
    pub shared_bytes: usize,
}

impl LaunchConfig {
    /// 2-D launch covering `rows x cols` elements with `group_x x group_y`
    /// units per group. Grid extents round up, so a ragged edge yields
    /// groups that partly fall outside the problem; kernels guard for that
    /// themselves.
    pub fn grid_2d(rows: usize, cols: usize, group_x: usize, group_y: usize) -> Self {
        Self {
            grid: Dim2::new(cols.div_ceil(group_x), rows.div_ceil(group_y)),
            group: Dim2::new(group_x, group_y),
            shared_bytes: 0,
        }
    }

    /// Same as [`grid_2d`](Self::grid_2d) plus a shared staging request.
    pub fn grid_2d_shared(
        rows: usize,
        cols: usize,
        group_x: usize,
        group_y: usize,
        shared_bytes: usize,
    ) -> Self {
        Self {
            shared_bytes,
            ..Self::grid_2d(rows, cols, group_x, group_y)
        }
    }

    /// Shared staging size in 4-byte words.
    pub const fn shared_words(&self) -> usize {
        self.shared_bytes / 4
    }

    /// Check this geometry against a device's limits.
    ///
    /// Runs on the queue thread when the launch is dequeued, not at
    /// submission; a bad geometry therefore surfaces at `synchronize`.
    pub fn validate(&self, limits: &DeviceConfig) -> Result<(), DeviceError> {
        if self.grid.count() == 0 {
            return Err(DeviceError::InvalidLaunch(format!(
                "empty grid {}",
                self.grid
            )));
        }
        if self.group.count() == 0 {
            return Err(DeviceError::InvalidLaunch(format!(
                "empty group {}",
                self.group
            )));
        }
        if self.group.count() > limits.max_group_units {
            return Err(DeviceError::InvalidLaunch(format!(
                "group {} has {} units, device limit is {}",
                self.group,
                self.group.count(),
                limits.max_group_units
            )));
        }
        if self.shared_bytes > limits.max_shared_bytes {
            return Err(DeviceError::InvalidLaunch(format!(
                "shared staging request of {} bytes exceeds device limit of {}",
                self.shared_bytes, limits.max_shared_bytes
            )));
        }
        if self.shared_bytes % 4 != 0 {
            return Err(DeviceError::InvalidLaunch(format!(
                "shared staging request of {} bytes is not word-aligned",
                self.shared_bytes
            )));
        }
        Ok(())
    }
}
