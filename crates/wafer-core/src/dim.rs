//! Two-dimensional extents for grids and groups.

use std::fmt;

/// A 2-D extent or index, `x` fastest-varying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim2 {
    pub x: usize,
    pub y: usize,
}

impl Dim2 {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    /// Square extent, `n` along both axes.
    pub const fn square(n: usize) -> Self {
        Self { x: n, y: n }
    }

    /// Total number of cells covered by this extent.
    pub const fn count(&self) -> usize {
        self.x * self.y
    }

    /// Iterate every index inside this extent in row-major order:
    /// y outermost, x innermost. The flat position of each yielded
    /// index equals `y * self.x + x`.
    pub fn iter(self) -> impl Iterator<Item = Dim2> {
        (0..self.count()).map(move |i| Dim2 {
            x: i % self.x,
            y: i / self.x,
        })
    }
}

impl fmt::Display for Dim2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}
