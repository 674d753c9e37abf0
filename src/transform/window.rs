//! Analysis windows

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Window shape used by the STFT
///
/// Both windows are sampled at half-integer positions so that no sample is
/// exactly zero; the overlap normalisation of the transform divides by the
/// accumulated window power.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowKind {
    /// `sin(π (t + 0.5) / L)`, the square root of a Hann window
    Sine,
    /// `sin²(π (t + 0.5) / L)`
    Hann,
}

/// Generate a window of `len` samples
pub fn window(kind: WindowKind, len: usize) -> Vec<f64> {
    (0..len)
        .map(|t| {
            let s = (PI * (t as f64 + 0.5) / len as f64).sin();
            match kind {
                WindowKind::Sine => s,
                WindowKind::Hann => s * s,
            }
        })
        .collect()
}
