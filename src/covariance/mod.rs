//! Mixture covariance estimation
//!
//! Per-frame spatial covariance of the observed mixture, the statistic the EM
//! estimator fits the source model to, plus its binary interchange format.

pub mod estimator;
pub mod tensor;

pub use estimator::MixtureCovariance;
pub use tensor::{load_tensor, read_tensor, save_tensor, write_tensor};
