//! Band-limited sample rate conversion
//!
//! Resamples each channel in the frequency domain: the spectrum of the whole
//! signal is truncated (downsampling) or zero-padded (upsampling) to the target
//! length and transformed back. Frequencies above the new Nyquist limit are
//! discarded, so the conversion does not alias, and the duration is preserved.
//!
//! # Example
//!
//! ```no_run
//! use stratum_separation::preprocessing::resample::resample_channel;
//!
//! let samples = vec![0.0f64; 44100];
//! let resampled = resample_channel(&samples, 44100, 16000)?;
//! assert_eq!(resampled.len(), 16000);
//! # Ok::<(), stratum_separation::SeparationError>(())
//! ```

use ndarray::{Array2, ArrayView2};
use rustfft::num_complex::Complex;
use rustfft::FftPlanner;

use crate::error::SeparationError;
use crate::io::{Mixture, STEREO};

/// Output length that preserves the duration of `len` samples
pub fn resampled_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    ((len as f64) * to_rate as f64 / from_rate as f64).round() as usize
}

/// Resample a single channel
///
/// # Errors
///
/// Returns `InvalidInput` if either rate is zero
pub fn resample_channel(
    samples: &[f64],
    from_rate: u32,
    to_rate: u32,
) -> Result<Vec<f64>, SeparationError> {
    if from_rate == 0 || to_rate == 0 {
        return Err(SeparationError::InvalidInput(format!(
            "Invalid sample rates: from={}, to={}",
            from_rate, to_rate
        )));
    }
    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let len_in = samples.len();
    let len_out = resampled_len(len_in, from_rate, to_rate);
    if len_out == 0 {
        return Ok(Vec::new());
    }

    let mut planner = FftPlanner::<f64>::new();
    let forward = planner.plan_fft_forward(len_in);
    let inverse = planner.plan_fft_inverse(len_out);

    let mut spectrum: Vec<Complex<f64>> = samples.iter().map(|&x| Complex::new(x, 0.0)).collect();
    forward.process(&mut spectrum);

    // Positive-frequency half of the shorter length, with the Nyquist bin of an
    // even-length spectrum split (upsampling) or folded (downsampling).
    let n = len_in.min(len_out);
    let mut out = vec![Complex::new(0.0, 0.0); len_out];
    let half = (n / 2).min(len_out / 2);
    for k in 0..=half {
        let mut value = spectrum[k];
        if n % 2 == 0 && k == n / 2 {
            if len_out < len_in {
                value *= 2.0;
            } else if len_out > len_in {
                value *= 0.5;
            }
        }
        out[k] = value;
    }

    // Hermitian completion so that the inverse is real
    let mut k = 1;
    while k < len_out - k {
        out[len_out - k] = out[k].conj();
        k += 1;
    }
    if len_out % 2 == 0 {
        let nyquist = len_out / 2;
        out[nyquist] = Complex::new(out[nyquist].re, 0.0);
    }

    inverse.process(&mut out);

    // rustfft does not normalise; 1/len_out from the inverse and len_out/len_in
    // from the length change leave 1/len_in.
    let scale = 1.0 / len_in as f64;
    Ok(out.iter().map(|z| z.re * scale).collect())
}

/// Resample a `(channels, frames)` stereo signal
///
/// # Errors
///
/// - `UnsupportedFormat` if the signal does not have 2 channels
/// - `InvalidInput` if either rate is zero
pub fn resample(
    samples: ArrayView2<'_, f64>,
    from_rate: u32,
    to_rate: u32,
) -> Result<Array2<f64>, SeparationError> {
    if samples.nrows() != STEREO {
        return Err(SeparationError::UnsupportedFormat(format!(
            "resampler expects {} channels (has {})",
            STEREO,
            samples.nrows()
        )));
    }

    let channels: Vec<Vec<f64>> = samples
        .rows()
        .into_iter()
        .map(|row| resample_channel(&row.to_vec(), from_rate, to_rate))
        .collect::<Result<_, _>>()?;

    let len = channels[0].len();
    Ok(Array2::from_shape_fn((STEREO, len), |(c, t)| channels[c][t]))
}

/// Bring a mixture to the processing rate
///
/// A no-op (clone) when the mixture is already at `to_rate`. Any conversion is
/// logged with the rates and lengths involved.
pub fn resample_mixture(mixture: &Mixture, to_rate: u32) -> Result<Mixture, SeparationError> {
    if mixture.sample_rate() == to_rate {
        log::debug!("Mixture already at {} Hz, no resampling", to_rate);
        return Ok(mixture.clone());
    }

    let resampled = resample(mixture.samples(), mixture.sample_rate(), to_rate)?;
    log::info!(
        "Resampled mixture from {} Hz ({} frames) to {} Hz ({} frames)",
        mixture.sample_rate(),
        mixture.len(),
        to_rate,
        resampled.ncols()
    );
    Mixture::new(resampled, to_rate)
}
