//! Per-frame mixture covariance `R̂x(f,n) = x(f,n) x(f,n)ᴴ`

use nalgebra::DMatrix;
use ndarray::{Array3, Array4, Axis};
use num_complex::Complex64;
use rayon::prelude::*;

use crate::error::SeparationError;
use crate::transform::Spectrogram;

/// Observed covariance of the mixture at every time-frequency point
///
/// Stored as an `(F, N, I, I)` array. Each matrix is the outer product of the
/// observation vector with itself, so it is Hermitian and positive
/// semi-definite by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureCovariance {
    data: Array4<Complex64>,
}

impl MixtureCovariance {
    /// Compute the covariance tensor of a spectrogram, bins in parallel
    pub fn from_spectrogram(spec: &Spectrogram) -> Result<Self, SeparationError> {
        let (channels, bins, frames) = (spec.channels(), spec.bins(), spec.frames());
        if channels == 0 || bins == 0 || frames == 0 {
            return Err(SeparationError::InvalidInput(format!(
                "cannot estimate covariance of an empty spectrogram ({}x{}x{})",
                channels, bins, frames
            )));
        }

        log::debug!(
            "Computing mixture covariance: {} channels, {} bins x {} frames",
            channels,
            bins,
            frames
        );

        let per_bin: Vec<Array3<Complex64>> = (0..bins)
            .into_par_iter()
            .map(|f| {
                let mut block = Array3::<Complex64>::zeros((frames, channels, channels));
                for n in 0..frames {
                    let x = spec.vector(f, n);
                    for i1 in 0..channels {
                        for i2 in 0..channels {
                            block[[n, i1, i2]] = x[i1] * x[i2].conj();
                        }
                    }
                }
                block
            })
            .collect();

        let views: Vec<_> = per_bin.iter().map(|b| b.view()).collect();
        let data = ndarray::stack(Axis(0), &views)
            .map_err(|e| SeparationError::ProcessingError(e.to_string()))?;
        Ok(Self { data })
    }

    /// Wrap an existing `(F, N, I, I)` tensor
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the trailing dimensions are not square or the
    /// tensor is empty
    pub fn from_data(data: Array4<Complex64>) -> Result<Self, SeparationError> {
        let (bins, frames, rows, cols) = data.dim();
        if rows != cols {
            return Err(SeparationError::InvalidInput(format!(
                "covariance matrices are {}x{} and should be square",
                rows, cols
            )));
        }
        if bins == 0 || frames == 0 || rows == 0 {
            return Err(SeparationError::InvalidInput(
                "covariance tensor is empty".to_string(),
            ));
        }
        Ok(Self { data })
    }

    /// Number of channels I
    pub fn channels(&self) -> usize {
        self.data.dim().2
    }

    /// Number of frequency bins F
    pub fn bins(&self) -> usize {
        self.data.dim().0
    }

    /// Number of time frames N
    pub fn frames(&self) -> usize {
        self.data.dim().1
    }

    /// Underlying `(F, N, I, I)` tensor
    pub fn data(&self) -> &Array4<Complex64> {
        &self.data
    }

    /// Covariance matrix at one time-frequency point
    pub fn matrix(&self, bin: usize, frame: usize) -> DMatrix<Complex64> {
        let i = self.channels();
        DMatrix::from_fn(i, i, |r, c| self.data[[bin, frame, r, c]])
    }

    /// Time-averaged power per channel at a bin, `mean_n tr(R̂x(f,n)) / I`
    pub fn mean_channel_power(&self, bin: usize) -> f64 {
        let (i, frames) = (self.channels(), self.frames());
        let total: f64 = (0..frames)
            .map(|n| (0..i).map(|c| self.data[[bin, n, c, c]].re).sum::<f64>())
            .sum();
        total / (frames * i) as f64
    }

    /// Check that every matrix is Hermitian and positive semi-definite
    ///
    /// Positive semi-definiteness is tested with a Cholesky factorisation of
    /// `R + δI`, with `δ` scaled to the trace of `R`.
    ///
    /// # Errors
    ///
    /// Returns `NumericInstability` naming the first offending point
    pub fn validate(&self) -> Result<(), SeparationError> {
        let i = self.channels();
        for f in 0..self.bins() {
            for n in 0..self.frames() {
                let r = self.matrix(f, n);
                let trace: f64 = (0..i).map(|c| r[(c, c)].re).sum();
                if !trace.is_finite() || r.iter().any(|v| !v.is_finite()) {
                    return Err(SeparationError::NumericInstability(format!(
                        "non-finite covariance at bin {}, frame {}",
                        f, n
                    )));
                }
                let tol = 1e-9 * (1.0 + trace.abs());
                let hermitian = (0..i)
                    .all(|a| (0..i).all(|b| (r[(a, b)] - r[(b, a)].conj()).norm() <= tol));
                if !hermitian {
                    return Err(SeparationError::NumericInstability(format!(
                        "covariance at bin {}, frame {} is not Hermitian",
                        f, n
                    )));
                }
                let loaded =
                    &r + DMatrix::<Complex64>::identity(i, i) * Complex64::new(tol, 0.0);
                if loaded.cholesky().is_none() {
                    return Err(SeparationError::NumericInstability(format!(
                        "covariance at bin {}, frame {} is not positive semi-definite",
                        f, n
                    )));
                }
            }
        }
        Ok(())
    }
}
