//! EM parameter estimation
//!
//! - Noise annealing schedule for the E-step
//! - Posterior sufficient statistics (E-step)
//! - The iteration loop with mixing and NMF updates (M-step)

pub mod em;
pub mod noise;
pub mod statistics;

pub use em::{EmEstimator, EmReport, IterationOutcome};
pub use noise::{NoiseProfile, MIN_NOISE_POWER};
pub use statistics::SufficientStatistics;
