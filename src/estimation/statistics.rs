//! E-step: posterior sufficient statistics
//!
//! For every time-frequency point, with `A(f)` the I×R mixing matrix
//! (`R = Σ_j R_j`, one column block per source) and `Σs` the R×R diagonal
//! holding each source power `v_j(f,n)` once per column of its block:
//!
//! ```text
//! Σx  = A Σs Aᴴ + σ_f² I
//! Ω   = Σs Aᴴ Σx⁻¹
//! R̂s  = Ω R̂x Ωᴴ + (I − Ω A) Σs
//! R̂xs = R̂x Ωᴴ
//! ```
//!
//! The M-step only needs the per-bin sums of `R̂xs` and `R̂s` over frames and
//! the posterior source powers `ξ_j(f,n)`, the mean of the diagonal of
//! `R̂s(f,n)` over the block of source j.

use std::f64::consts::PI;

use nalgebra::{DMatrix, DVector};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use num_complex::Complex64;
use rayon::prelude::*;

use crate::covariance::MixtureCovariance;
use crate::error::SeparationError;
use crate::model::ParameterSet;

/// Statistics of one frequency bin
struct BinStatistics {
    rxs: DMatrix<Complex64>,
    rs: DMatrix<Complex64>,
    xi: Array2<f64>,
    log_likelihood: f64,
}

/// Output of one E-step
#[derive(Debug, Clone)]
pub struct SufficientStatistics {
    /// `Σ_n R̂xs(f,n)` per bin (I×R)
    pub rxs: Vec<DMatrix<Complex64>>,
    /// `Σ_n R̂s(f,n)` per bin (R×R)
    pub rs: Vec<DMatrix<Complex64>>,
    /// Posterior source power `ξ` as a `(J, F, N)` array
    pub xi: Array3<f64>,
    /// Normalised log-likelihood of the parameters the statistics were computed with
    pub log_likelihood: f64,
}

impl SufficientStatistics {
    /// Run the E-step for every bin in parallel
    ///
    /// `noise` holds the noise variance of every bin.
    ///
    /// # Errors
    ///
    /// Returns `ProcessingError` on dimension mismatch and `NumericInstability`
    /// when a modelled mixture covariance cannot be inverted
    pub fn compute(
        cov: &MixtureCovariance,
        params: &ParameterSet,
        noise: &[f64],
    ) -> Result<Self, SeparationError> {
        params.check_dimensions(cov.channels(), cov.bins(), cov.frames())?;
        if noise.len() != cov.bins() {
            return Err(SeparationError::ProcessingError(format!(
                "noise profile has {} bins but covariance has {}",
                noise.len(),
                cov.bins()
            )));
        }

        let powers = params.powers();
        let (bins, frames, sources) = (cov.bins(), cov.frames(), params.len());

        let per_bin = (0..bins)
            .into_par_iter()
            .map(|f| bin_statistics(cov, params, &powers, noise[f], f))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rxs = Vec::with_capacity(bins);
        let mut rs = Vec::with_capacity(bins);
        let mut xi = Array3::<f64>::zeros((sources, bins, frames));
        let mut total = 0.0;
        for (f, stats) in per_bin.into_iter().enumerate() {
            xi.index_axis_mut(Axis(1), f).assign(&stats.xi);
            rxs.push(stats.rxs);
            rs.push(stats.rs);
            total += stats.log_likelihood;
        }

        Ok(Self {
            rxs,
            rs,
            xi,
            log_likelihood: total / (bins * frames) as f64,
        })
    }

    /// Posterior power of source `j` (F×N)
    pub fn source_power(&self, j: usize) -> ArrayView2<'_, f64> {
        self.xi.index_axis(Axis(0), j)
    }
}

fn bin_statistics(
    cov: &MixtureCovariance,
    params: &ParameterSet,
    powers: &[Array2<f64>],
    noise: f64,
    f: usize,
) -> Result<BinStatistics, SeparationError> {
    let (channels, frames, sources) = (cov.channels(), cov.frames(), params.len());
    let ranges = params.column_ranges();
    let rank = params.total_rank();
    // source owning each column of A
    let owner: Vec<usize> = ranges
        .iter()
        .enumerate()
        .flat_map(|(j, range)| range.clone().map(move |_| j))
        .collect();
    let a = params.mixing_matrix(f);
    let a_h = a.adjoint();
    let identity_i = DMatrix::<Complex64>::identity(channels, channels);
    let identity_r = DMatrix::<Complex64>::identity(rank, rank);
    let noise_cov = &identity_i * Complex64::new(noise, 0.0);

    let mut rxs = DMatrix::<Complex64>::zeros(channels, rank);
    let mut rs = DMatrix::<Complex64>::zeros(rank, rank);
    let mut xi = Array2::<f64>::zeros((sources, frames));
    let mut log_likelihood = 0.0;

    for n in 0..frames {
        let diagonal = DVector::from_fn(rank, |r, _| Complex64::new(powers[owner[r]][[f, n]], 0.0));
        let sigma_s = DMatrix::from_diagonal(&diagonal);
        let sigma_x = &a * &sigma_s * &a_h + &noise_cov;
        let det = sigma_x.determinant().re;
        let inv = sigma_x.try_inverse().ok_or_else(|| {
            SeparationError::NumericInstability(format!(
                "modelled mixture covariance is singular at bin {}, frame {}",
                f, n
            ))
        })?;
        if !(det.is_finite() && det > 0.0) {
            return Err(SeparationError::NumericInstability(format!(
                "modelled mixture covariance has determinant {} at bin {}, frame {}",
                det, f, n
            )));
        }

        let rx = cov.matrix(f, n);
        let omega = &sigma_s * &a_h * &inv;
        let omega_h = omega.adjoint();
        let rs_fn = &omega * &rx * &omega_h + (&identity_r - &omega * &a) * &sigma_s;
        let rxs_fn = &rx * &omega_h;

        log_likelihood -= (&inv * &rx).trace().re + (PI * det).ln();
        for (j, range) in ranges.iter().enumerate() {
            let total: f64 = range.clone().map(|r| rs_fn[(r, r)].re).sum();
            xi[[j, n]] = total / range.len() as f64;
        }
        rxs += rxs_fn;
        rs += rs_fn;
    }

    Ok(BinStatistics {
        rxs,
        rs,
        xi,
        log_likelihood,
    })
}
