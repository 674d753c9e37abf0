//! Multichannel Wiener filtering of the mixture
//!
//! Each source carries its own [`WienerConfig`]. For source j,
//! `Σy_j(f,n) = q_j · v_j(f,n) · B_j · R_j(f)` with `q_j` the linear gain,
//! `B_j = [[1, b_j], [b_j, 1]]` the spatial blend and `R_j = A_j A_jᴴ` the
//! spatial covariance. The source image is `y_j(f,n) = W_j x(f,n)` with
//! `W_j = Σy_j Σx⁻¹`, where `Σx = Σ_j Σy_j` plus a diagonal loading
//! proportional to its trace. The loading keeps `Σx` invertible when fewer
//! sources than channels are modelled; with a single source the filter
//! becomes a projection onto its spatial image.
//!
//! With an eigenvalue floor `q_d`, every eigenvalue of `W_j` smaller than
//! `q_d` in magnitude is raised to `q_d` before filtering.

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, Array3, Array4, Axis};
use num_complex::Complex64;
use rayon::prelude::*;

use super::smoothing::smooth_power;
use crate::config::WienerConfig;
use crate::error::SeparationError;
use crate::model::ParameterSet;
use crate::transform::{Spectrogram, Stft};

/// Relative diagonal loading of the mixture covariance
const LOADING: f64 = 1e-9;

/// Absolute loading, so that silent points stay invertible
const MIN_LOADING: f64 = 1e-30;

/// Relative eigenvalue gap below which a 2×2 gain matrix is treated as having
/// a repeated eigenvalue
const REPEATED_EIGENVALUE: f64 = 1e-12;

/// Filtered source images
#[derive(Debug, Clone)]
pub struct WienerOutput<T> {
    /// One image per source, in source order
    pub images: Vec<T>,

    /// Image values that came out non-finite and were replaced with zero
    pub replaced_values: usize,
}

/// Post-processing of one source resolved from its [`WienerConfig`]
struct SourceFilter {
    gain: f64,
    blend: DMatrix<Complex64>,
    floor: Option<f64>,
    power: Array2<f64>,
}

impl SourceFilter {
    fn new(config: &WienerConfig, power: Array2<f64>, channels: usize) -> Self {
        let power = if config.time_smoothing > 0 || config.frequency_smoothing > 0 {
            smooth_power(power.view(), config.time_smoothing, config.frequency_smoothing)
        } else {
            power
        };
        let blend = DMatrix::from_fn(channels, channels, |r, c| {
            Complex64::new(if r == c { 1.0 } else { config.spatial_blend }, 0.0)
        });
        Self {
            gain: config.gain(),
            blend,
            floor: config.eigenvalue_floor().filter(|&q| q > 0.0),
            power,
        }
    }
}

/// Raise every eigenvalue of the 2×2 matrix `w` whose magnitude is below
/// `floor` to `floor`, keeping the eigenvectors
///
/// Uses the spectral projectors `P_k = (w − λ_l I) / (λ_k − λ_l)`, so that
/// `w = λ_1 P_1 + λ_2 P_2`.
fn floor_eigenvalues(w: &DMatrix<Complex64>, floor: f64) -> DMatrix<Complex64> {
    let half_trace = (w[(0, 0)] + w[(1, 1)]) * 0.5;
    let det = w[(0, 0)] * w[(1, 1)] - w[(0, 1)] * w[(1, 0)];
    let root = (half_trace * half_trace - det).sqrt();
    let eigenvalues = [half_trace + root, half_trace - root];
    let target = Complex64::new(floor, 0.0);
    let identity = DMatrix::<Complex64>::identity(2, 2);

    let scale = eigenvalues[0].norm() + eigenvalues[1].norm();
    if (eigenvalues[0] - eigenvalues[1]).norm() <= REPEATED_EIGENVALUE * scale {
        let lambda = half_trace;
        return if lambda.norm() < floor {
            w + identity * (target - lambda)
        } else {
            w.clone()
        };
    }

    let mut out = w.clone();
    for (k, &lambda) in eigenvalues.iter().enumerate() {
        if lambda.norm() < floor {
            let other = eigenvalues[1 - k];
            out += (w - &identity * other) * ((target - lambda) / (lambda - other));
        }
    }
    out
}

/// Filter the mixture spectrogram into one spectrogram per source
///
/// # Errors
///
/// Returns `ProcessingError` when the parameters do not match the
/// spectrogram or an eigenvalue floor is requested for a non-stereo
/// mixture, and `NumericInstability` when a mixture covariance cannot be
/// inverted
pub fn filter(
    spec: &Spectrogram,
    params: &ParameterSet,
) -> Result<WienerOutput<Spectrogram>, SeparationError> {
    params.check_dimensions(spec.channels(), spec.bins(), spec.frames())?;
    let (channels, bins, frames, sources) =
        (spec.channels(), spec.bins(), spec.frames(), params.len());

    let settings: Vec<SourceFilter> = params
        .sources()
        .iter()
        .zip(params.powers())
        .map(|(source, power)| SourceFilter::new(source.wiener(), power, channels))
        .collect();
    if channels != 2 && settings.iter().any(|s| s.floor.is_some()) {
        return Err(SeparationError::ProcessingError(format!(
            "Wiener eigenvalue floor needs 2 channels (has {})",
            channels
        )));
    }

    for (j, (source, resolved)) in params.sources().iter().zip(&settings).enumerate() {
        let wiener = source.wiener();
        log::debug!(
            "Wiener filter for source {}: gain={:.3}, blend={}, smoothing=({}, {}), floor={:?}",
            j,
            resolved.gain,
            wiener.spatial_blend,
            wiener.time_smoothing,
            wiener.frequency_smoothing,
            resolved.floor
        );
    }

    let per_bin = (0..bins)
        .into_par_iter()
        .map(|f| -> Result<(Array3<Complex64>, usize), SeparationError> {
            let spatial: Vec<DMatrix<Complex64>> = params
                .sources()
                .iter()
                .zip(&settings)
                .map(|(s, resolved)| &resolved.blend * s.spatial().covariance(f))
                .collect();
            let mut out = Array3::<Complex64>::zeros((sources, channels, frames));
            let mut replaced = 0usize;

            for n in 0..frames {
                let sigma_y: Vec<DMatrix<Complex64>> = spatial
                    .iter()
                    .zip(&settings)
                    .map(|(r, resolved)| {
                        r * Complex64::new(resolved.gain * resolved.power[[f, n]], 0.0)
                    })
                    .collect();
                let mut sigma_x = DMatrix::<Complex64>::zeros(channels, channels);
                for s in &sigma_y {
                    sigma_x += s;
                }
                let trace = sigma_x.trace().re.abs();
                let loading = LOADING * trace / channels as f64 + MIN_LOADING;
                for c in 0..channels {
                    sigma_x[(c, c)] += Complex64::new(loading, 0.0);
                }
                let inv = sigma_x.try_inverse().ok_or_else(|| {
                    SeparationError::NumericInstability(format!(
                        "mixture covariance is singular at bin {}, frame {}",
                        f, n
                    ))
                })?;

                let x = DVector::from_vec(spec.vector(f, n));
                for (j, (s, resolved)) in sigma_y.iter().zip(&settings).enumerate() {
                    let gain = s * &inv;
                    let gain = match resolved.floor {
                        Some(floor) => floor_eigenvalues(&gain, floor),
                        None => gain,
                    };
                    let y = gain * &x;
                    for c in 0..channels {
                        out[[j, c, n]] = if y[c].is_finite() {
                            y[c]
                        } else {
                            replaced += 1;
                            Complex64::new(0.0, 0.0)
                        };
                    }
                }
            }
            Ok((out, replaced))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut images = Array4::<Complex64>::zeros((sources, channels, bins, frames));
    let mut replaced_values = 0;
    for (f, (block, replaced)) in per_bin.into_iter().enumerate() {
        images.index_axis_mut(Axis(2), f).assign(&block);
        replaced_values += replaced;
    }
    if replaced_values > 0 {
        log::warn!(
            "Wiener filter produced {} non-finite image values, replaced with 0",
            replaced_values
        );
    }

    let images = images
        .outer_iter()
        .map(|image| Spectrogram::from_parts(image.to_owned(), spec.wlen(), spec.samples()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(WienerOutput {
        images,
        replaced_values,
    })
}

/// Filter and bring every source image back to the time domain
///
/// Returns one `(channels, samples)` array per source.
pub fn reconstruct(
    spec: &Spectrogram,
    params: &ParameterSet,
    stft: &Stft,
) -> Result<WienerOutput<Array2<f64>>, SeparationError> {
    let filtered = filter(spec, params)?;
    let images = filtered
        .images
        .iter()
        .map(|y| stft.inverse(y))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(WienerOutput {
        images,
        replaced_values: filtered.replaced_values,
    })
}
