//! NMF excitation model
//!
//! The power spectrogram of a source is modelled as `V = W H`, with a basis
//! matrix `W` (F×K) and an activation matrix `H` (K×N). The factors are
//! refined with Itakura–Saito multiplicative updates driven by the posterior
//! source power computed in the E-step.

use ndarray::{Array2, ArrayView2, Zip};
use rand::Rng;

use super::adaptability::Adaptability;
use crate::error::SeparationError;

/// Entries changed by a positivity pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloorReport {
    /// Finite entries raised to the floor
    pub clamped: usize,
    /// NaN or infinite entries replaced by the floor
    pub non_finite: usize,
}

impl FloorReport {
    /// Total number of entries that were changed
    pub fn total(&self) -> usize {
        self.clamped + self.non_finite
    }

    /// Accumulate another report
    pub fn merge(&mut self, other: FloorReport) {
        self.clamped += other.clamped;
        self.non_finite += other.non_finite;
    }
}

/// Basis × activation factorisation of a source's spectral power
#[derive(Debug, Clone, PartialEq)]
pub struct ExcitationModel {
    basis: Array2<f64>,
    activation: Array2<f64>,
    basis_adaptability: Adaptability,
    activation_adaptability: Adaptability,
}

/// Standard normal draw (Box–Muller)
fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

impl ExcitationModel {
    /// Build from explicit factors
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the inner dimensions differ, a factor is empty,
    /// or an entry is negative or non-finite
    pub fn new(
        basis: Array2<f64>,
        activation: Array2<f64>,
        basis_adaptability: Adaptability,
        activation_adaptability: Adaptability,
    ) -> Result<Self, SeparationError> {
        if basis.ncols() != activation.nrows() {
            return Err(SeparationError::InvalidInput(format!(
                "basis has rank {} but activation has rank {}",
                basis.ncols(),
                activation.nrows()
            )));
        }
        if basis.is_empty() || activation.is_empty() {
            return Err(SeparationError::InvalidInput(
                "NMF factors must not be empty".to_string(),
            ));
        }
        if basis
            .iter()
            .chain(activation.iter())
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(SeparationError::InvalidInput(
                "NMF factors must be finite and non-negative".to_string(),
            ));
        }
        Ok(Self {
            basis,
            activation,
            basis_adaptability,
            activation_adaptability,
        })
    }

    /// Random initialisation `0.75 |z| + 0.25`, `z ~ N(0, 1)`, basis first
    pub fn random<R: Rng + ?Sized>(
        bins: usize,
        rank: usize,
        frames: usize,
        basis_adaptability: Adaptability,
        activation_adaptability: Adaptability,
        rng: &mut R,
    ) -> Result<Self, SeparationError> {
        let mut draw = || 0.75 * standard_normal(rng).abs() + 0.25;
        let basis = Array2::from_shape_fn((bins, rank), |_| draw());
        let activation = Array2::from_shape_fn((rank, frames), |_| draw());
        Self::new(
            basis,
            activation,
            basis_adaptability,
            activation_adaptability,
        )
    }

    /// Basis matrix W (F×K)
    pub fn basis(&self) -> &Array2<f64> {
        &self.basis
    }

    /// Activation matrix H (K×N)
    pub fn activation(&self) -> &Array2<f64> {
        &self.activation
    }

    /// Adaptability of W
    pub fn basis_adaptability(&self) -> Adaptability {
        self.basis_adaptability
    }

    /// Adaptability of H
    pub fn activation_adaptability(&self) -> Adaptability {
        self.activation_adaptability
    }

    /// Frequency bins F
    pub fn bins(&self) -> usize {
        self.basis.nrows()
    }

    /// NMF rank K
    pub fn rank(&self) -> usize {
        self.basis.ncols()
    }

    /// Time frames N
    pub fn frames(&self) -> usize {
        self.activation.ncols()
    }

    /// Modelled power spectrogram `W H` (F×N)
    pub fn power(&self) -> Array2<f64> {
        self.basis.dot(&self.activation)
    }

    /// One Itakura–Saito multiplicative update of the free factors
    ///
    /// `xi` is the posterior source power (F×N). Fixed factors are untouched.
    pub fn update(&mut self, xi: ArrayView2<'_, f64>) -> Result<(), SeparationError> {
        if xi.dim() != (self.bins(), self.frames()) {
            return Err(SeparationError::ProcessingError(format!(
                "posterior power is {:?} but the excitation model is {}x{}",
                xi.dim(),
                self.bins(),
                self.frames()
            )));
        }

        if self.basis_adaptability.is_free() {
            let (num, den) = ratio_terms(xi, &self.power());
            let numerator = num.dot(&self.activation.t());
            let denominator = den.dot(&self.activation.t());
            Zip::from(&mut self.basis)
                .and(&numerator)
                .and(&denominator)
                .for_each(|w, &n, &d| *w *= n / d);
        }

        if self.activation_adaptability.is_free() {
            let (num, den) = ratio_terms(xi, &self.power());
            let numerator = self.basis.t().dot(&num);
            let denominator = self.basis.t().dot(&den);
            Zip::from(&mut self.activation)
                .and(&numerator)
                .and(&denominator)
                .for_each(|h, &n, &d| *h *= n / d);
        }

        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn factors_mut(&mut self) -> (&mut Array2<f64>, &mut Array2<f64>) {
        (&mut self.basis, &mut self.activation)
    }

    /// Replace every NaN, infinite or sub-floor entry by `floor`
    pub fn enforce_floor(&mut self, floor: f64) -> FloorReport {
        let mut report = FloorReport::default();
        for v in self.basis.iter_mut().chain(self.activation.iter_mut()) {
            if !v.is_finite() {
                *v = floor;
                report.non_finite += 1;
            } else if *v < floor {
                *v = floor;
                report.clamped += 1;
            }
        }
        report
    }
}

/// `(ξ / V², 1 / V)` element-wise
fn ratio_terms(xi: ArrayView2<'_, f64>, v: &Array2<f64>) -> (Array2<f64>, Array2<f64>) {
    let num = Zip::from(&xi).and(v).map_collect(|&x, &p| x / (p * p));
    let den = v.mapv(|p| 1.0 / p);
    (num, den)
}
