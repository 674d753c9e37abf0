//! Source image reconstruction
//!
//! Wiener filtering of the mixture spectrogram with the estimated source
//! statistics and per-source post-processing, then the inverse STFT.

pub mod smoothing;
pub mod wiener;

pub use smoothing::{raised_cosine, smooth_power};
pub use wiener::{filter, reconstruct, WienerOutput};
