//! Additive noise annealing
//!
//! The E-step adds an isotropic noise covariance `σ_f² I` to the modelled
//! mixture covariance. The noise amplitude starts at a fraction of the mixture
//! power of each bin and shrinks linearly to a smaller fraction over the
//! iteration budget.

use crate::config::NoiseSchedule;
use crate::covariance::MixtureCovariance;

/// Smallest noise variance ever used, so silent bins stay invertible
pub const MIN_NOISE_POWER: f64 = 1e-12;

/// Per-bin noise levels for one EM run
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseProfile {
    mixture_power: Vec<f64>,
    schedule: NoiseSchedule,
    iterations: usize,
}

impl NoiseProfile {
    /// Measure the mixture power of every bin
    pub fn new(cov: &MixtureCovariance, schedule: NoiseSchedule, iterations: usize) -> Self {
        let mixture_power = (0..cov.bins()).map(|f| cov.mean_channel_power(f)).collect();
        Self {
            mixture_power,
            schedule,
            iterations: iterations.max(1),
        }
    }

    /// Time-averaged mixture power per channel at a bin
    pub fn mixture_power(&self, bin: usize) -> f64 {
        self.mixture_power[bin]
    }

    /// Noise variance `σ_f²` at `iteration` (0-based)
    pub fn variance(&self, bin: usize, iteration: usize) -> f64 {
        let power = self.mixture_power[bin];
        let iters = self.iterations as f64;
        let it = iteration.min(self.iterations - 1) as f64;
        let start = (self.schedule.start_ratio * power).sqrt();
        let end = (self.schedule.end_ratio * power).sqrt();
        let sigma = (start * (iters - it - 1.0) + end * (it + 1.0)) / iters;
        (sigma * sigma).max(MIN_NOISE_POWER)
    }

    /// Noise variances of every bin at `iteration`
    pub fn variances(&self, iteration: usize) -> Vec<f64> {
        (0..self.mixture_power.len())
            .map(|f| self.variance(f, iteration))
            .collect()
    }
}
