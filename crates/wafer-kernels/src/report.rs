//! Measurement and validation summary for one multiply run.

use std::fmt;

use crate::verify::Mismatch;

/// How many failing elements the display lists before summarizing.
const MAX_LISTED_MISMATCHES: usize = 10;

/// What one timed-and-validated multiply run produced.
#[derive(Debug, Clone)]
pub struct MultiplyReport {
    /// Sustained throughput over the timed iterations.
    pub gflops: f64,
    /// Wall time of one multiply, averaged over the timed iterations.
    pub ms_per_multiply: f64,
    /// Floating-point operations in one multiply (`2 * wA * hA * wB`).
    pub flops_per_multiply: f64,
    /// Execution units per group (`tile_edge^2`).
    pub group_units: usize,
    pub iterations: usize,
    /// Elements of C that were validated.
    pub checked: usize,
    /// Tolerance the validation used.
    pub eps: f32,
    pub mismatches: Vec<Mismatch>,
}

impl MultiplyReport {
    pub fn passed(&self) -> bool {
        self.mismatches.is_empty()
    }
}

impl fmt::Display for MultiplyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Performance= {:.2} GFlop/s, Time= {:.3} msec, Size= {:.0} Ops, GroupSize= {} units/group",
            self.gflops, self.ms_per_multiply, self.flops_per_multiply, self.group_units
        )?;
        writeln!(
            f,
            "Checking computed result for correctness ({} elements, tolerance {:e}):",
            self.checked, self.eps
        )?;
        for m in self.mismatches.iter().take(MAX_LISTED_MISMATCHES) {
            writeln!(
                f,
                "Error! Matrix[{:05}]={:.8}, ref={:.8} error term is > {:e}",
                m.index, m.got, m.expected, self.eps
            )?;
        }
        if self.mismatches.len() > MAX_LISTED_MISMATCHES {
            writeln!(
                f,
                "... and {} more",
                self.mismatches.len() - MAX_LISTED_MISMATCHES
            )?;
        }
        writeln!(
            f,
            "Result = {}",
            if self.passed() { "PASS" } else { "FAIL" }
        )?;
        write!(
            f,
            "NOTE: timings come from a software device and do not reflect accelerator hardware."
        )
    }
}
