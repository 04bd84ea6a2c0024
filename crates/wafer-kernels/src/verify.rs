//! Result validation against a known uniform product.
//!
//! With A filled by a constant and B filled by `value`, every element of
//! C must equal `dot_length * value`. The check uses the relative error
//! normalized by the dot length, so the tolerance scales with how many
//! rounding steps the accumulator took. The scan is exhaustive: every
//! element is checked and every miss is reported, not just the first.

use rayon::prelude::*;

/// Relative-error tolerance after dot-length normalization.
pub const EPS: f32 = 1e-6;

/// Element counts at or above this go through rayon.
const PAR_THRESHOLD: usize = 1 << 16;

/// One element that failed validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub index: usize,
    pub got: f32,
    pub expected: f32,
    pub rel_err: f32,
}

fn relative_error(got: f32, expected: f32, dot_length: usize) -> f32 {
    let abs_err = (got - expected).abs();
    let abs_val = got.abs();
    abs_err / abs_val / dot_length as f32
}

/// Check every element of `values` against `expected`, in index order.
///
/// An element passes when `|v - expected| / |v| / dot_length <= EPS`.
/// A zero `v` against a nonzero `expected` divides to infinity and
/// fails; `0.0` against `0.0` divides to NaN and passes, NaN comparing
/// false against the tolerance.
pub fn verify_uniform(values: &[f32], expected: f32, dot_length: usize) -> Vec<Mismatch> {
    let check = |(index, &got): (usize, &f32)| -> Option<Mismatch> {
        let rel_err = relative_error(got, expected, dot_length);
        (rel_err > EPS).then_some(Mismatch {
            index,
            got,
            expected,
            rel_err,
        })
    };

    if values.len() >= PAR_THRESHOLD {
        values.par_iter().enumerate().filter_map(check).collect()
    } else {
        values.iter().enumerate().filter_map(check).collect()
    }
}
