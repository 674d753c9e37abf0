//! # Stratum Separation
//!
//! Multichannel audio source separation for stereo mixtures, based on a
//! local Gaussian model with NMF spectral priors estimated by EM.
//!
//! ## Features
//!
//! - **Resampling**: Band-limited FFT resampling to the processing rate
//! - **Time-Frequency Analysis**: Sine-window STFT with exact overlap-add inverse
//! - **Source Model**: Rank-R instantaneous or convolutive mixing, NMF excitation
//! - **Estimation**: Generalised EM with noise annealing and positivity control
//! - **Reconstruction**: Per-source multichannel Wiener filtering with smoothing
//! - **Interchange**: XML source documents and binary covariance tensors
//!
//! ## Quick Start
//!
//! ```no_run
//! use stratum_separation::{separate, Mixture, SeparationConfig};
//!
//! let left = vec![0.0f64; 16000];
//! let right = vec![0.0f64; 16000];
//! let mixture = Mixture::from_channels(&left, &right, 16000)?;
//!
//! let result = separate(&mixture, SeparationConfig::default())?;
//! for image in &result.images {
//!     println!("{}: {:.2} s", image.file_name(), image.duration_seconds());
//! }
//! # Ok::<(), stratum_separation::SeparationError>(())
//! ```
//!
//! ## Architecture
//!
//! ```text
//! Mixture → Resample → STFT → {Source Models, Covariance} → EM → Wiener → Images
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod covariance;
pub mod error;
pub mod estimation;
pub mod io;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod preprocessing;
pub mod reconstruction;
pub mod result;
pub mod transform;

use std::path::Path;

// Re-export main types
pub use config::{NoiseSchedule, OutputConfig, SampleFormat, SeparationConfig, WienerConfig};
pub use error::{SeparationError, Stage};
pub use estimation::EmReport;
pub use io::Mixture;
pub use model::{Adaptability, MixingType, ParameterSet, SourceModel};
pub use pipeline::PipelineContext;
pub use preprocessing::channel_mixer::ChannelMixMode;
pub use result::{SeparationMetadata, SeparationResult, SourceImage, StageTiming};
pub use transform::WindowKind;

/// Separate an in-memory stereo mixture
///
/// # Arguments
///
/// * `mixture` - Stereo mixture at any sample rate
/// * `config` - Separation configuration parameters
///
/// # Returns
///
/// One source image per source at `config.target_sample_rate`, plus metadata
///
/// # Errors
///
/// Returns `SeparationError` tagged with the failing stage (invalid
/// configuration, numeric breakdown, EM convergence failure, ...)
///
/// # Example
///
/// ```no_run
/// use stratum_separation::{separate, Mixture, SeparationConfig};
///
/// let mixture = Mixture::from_channels(&vec![0.0; 32000], &vec![0.0; 32000], 16000)?;
/// let config = SeparationConfig { sources: 2, iterations: 50, ..Default::default() };
/// let result = separate(&mixture, config)?;
/// assert_eq!(result.images.len(), 2);
/// # Ok::<(), stratum_separation::SeparationError>(())
/// ```
pub fn separate(
    mixture: &Mixture,
    config: SeparationConfig,
) -> Result<SeparationResult, SeparationError> {
    let mut context = PipelineContext::new(config)?;
    let result = context.run(mixture);
    let finished = context.finish();
    let result = result?;
    finished?;
    Ok(result)
}

/// Separate a stereo audio file and write one WAV file per source
///
/// Source images are written to `output_dir` as `y1.wav`, `y2.wav`, ... (or
/// `{name}.wav` for named sources). With `persist_intermediates`, the
/// intermediate files are written to `output_dir` as well and kept.
///
/// # Errors
///
/// - `InvalidInput` if the file is missing, unreadable or corrupt
/// - `UnsupportedFormat` if it does not have two channels
/// - any pipeline error, tagged with its stage
pub fn separate_file(
    input: &Path,
    output_dir: &Path,
    config: SeparationConfig,
) -> Result<SeparationResult, SeparationError> {
    let mut context = PipelineContext::new(config)?;
    if context.config().persist_intermediates {
        context = context.with_work_dir(output_dir, true);
    }

    let mixture = io::decode_mixture(input).map_err(|e| e.in_stage(Stage::Load))?;
    let result = context.run(&mixture)?;

    let output = context.config().output.clone();
    result
        .write_all(output_dir, &output)
        .map_err(|e| e.in_stage(Stage::Write))?;

    context.finish()?;
    Ok(result)
}
