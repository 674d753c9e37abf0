//! Configuration parameters for source separation

use serde::{Deserialize, Serialize};

use crate::error::SeparationError;
use crate::model::{Adaptability, MixingType};
use crate::preprocessing::channel_mixer::ChannelMixMode;
use crate::transform::window::WindowKind;

/// Analysis sample rate of the pipeline (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

/// Additive noise annealing schedule for the E-step
///
/// The noise standard deviation at bin `f` moves linearly from
/// `sqrt(start_ratio * noise_f)` to `sqrt(end_ratio * noise_f)` over the
/// iteration budget, where `noise_f` is the time-averaged mixture power per
/// channel at that bin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NoiseSchedule {
    /// Noise-to-mixture power ratio at the first iteration (default: 1e-2)
    pub start_ratio: f64,
    /// Noise-to-mixture power ratio at the last iteration (default: 1e-4)
    pub end_ratio: f64,
}

impl Default for NoiseSchedule {
    fn default() -> Self {
        Self {
            start_ratio: 1e-2,
            end_ratio: 1e-4,
        }
    }
}

/// Wiener post-processing applied when reconstructing a source image
///
/// The run-wide value is copied into every source model; sources loaded from
/// a `sources.xml` document carry their own.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WienerConfig {
    /// Source power gain in dB (default: 0.0, no effect)
    pub gain_db: f64,
    /// Off-diagonal entry `b` in [0, 1] of the weighting matrix `[[1, b], [b, 1]]`
    /// that left-multiplies each source's spatial covariance (default: 0.0, identity)
    pub spatial_blend: f64,
    /// Half-width of the raised-cosine smoothing along time frames (default: 0, off)
    pub time_smoothing: usize,
    /// Half-width of the raised-cosine smoothing along frequency bins (default: 0, off)
    pub frequency_smoothing: usize,
    /// Lower bound in dB on the eigenvalue magnitudes of the Wiener gain
    /// matrix (default: None, no floor). Stereo only.
    pub eigenvalue_floor_db: Option<f64>,
}

impl Default for WienerConfig {
    fn default() -> Self {
        Self {
            gain_db: 0.0,
            spatial_blend: 0.0,
            time_smoothing: 0,
            frequency_smoothing: 0,
            eigenvalue_floor_db: None,
        }
    }
}

impl WienerConfig {
    /// Linear power gain `10^(gain_db / 10)`
    pub fn gain(&self) -> f64 {
        10f64.powf(self.gain_db / 10.0)
    }

    /// Linear eigenvalue floor `10^(d / 10)`, if any
    pub fn eigenvalue_floor(&self) -> Option<f64> {
        self.eigenvalue_floor_db.map(|d| 10f64.powf(d / 10.0))
    }

    /// Check every option, returning `InvalidInput` on the first violation
    pub fn validate(&self) -> Result<(), SeparationError> {
        if !self.gain_db.is_finite() {
            return Err(SeparationError::InvalidInput(format!(
                "Wiener gain = {} dB but should be finite",
                self.gain_db
            )));
        }
        if !(0.0..=1.0).contains(&self.spatial_blend) {
            return Err(SeparationError::InvalidInput(format!(
                "Wiener spatial blend = {} but should be inside [0, 1]",
                self.spatial_blend
            )));
        }
        if let Some(d) = self.eigenvalue_floor_db {
            if !d.is_finite() {
                return Err(SeparationError::InvalidInput(format!(
                    "Wiener eigenvalue floor = {} dB but should be finite",
                    d
                )));
            }
        }
        Ok(())
    }
}

/// PCM sample format of written source images
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    /// 16-bit signed integer PCM (clipped to [-1, 1])
    Pcm16,
    /// 32-bit IEEE float
    Float32,
}

/// Output options for source images
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Sample format (default: Pcm16)
    pub sample_format: SampleFormat,
    /// Write mono downmixes made with this mode instead of stereo images
    /// (default: None, stereo)
    pub downmix: Option<ChannelMixMode>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            sample_format: SampleFormat::Pcm16,
            downmix: None,
        }
    }
}

/// Separation configuration parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeparationConfig {
    // EM
    /// EM iteration budget (default: 200)
    pub iterations: usize,

    /// Number of sources J (default: 3)
    pub sources: usize,

    /// NMF rank K shared by all sources (default: 4)
    pub nmf_rank: usize,

    /// Seed for the random NMF initialisation (default: 0x5eed)
    pub seed: u64,

    /// Lower bound enforced on every NMF entry after each M-step (default: 1e-10)
    pub positivity_floor: f64,

    /// Consecutive unstable iterations tolerated before giving up (default: 5)
    pub max_unstable_iterations: usize,

    /// Additive noise annealing schedule
    pub noise: NoiseSchedule,

    // Model
    /// Mixing type of every source (default: Convolutive)
    pub mixing_type: MixingType,

    /// Whether EM updates the spatial components (default: Free)
    pub spatial_adaptability: Adaptability,

    /// Whether EM updates the NMF basis matrices (default: Free)
    pub basis_adaptability: Adaptability,

    /// Whether EM updates the NMF activation matrices (default: Free)
    pub activation_adaptability: Adaptability,

    // Time-frequency analysis
    /// STFT frame length, a power of two (default: 1024)
    pub wlen: usize,

    /// Analysis window (default: Sine)
    pub window: WindowKind,

    /// Processing sample rate in Hz (default: 16000)
    pub target_sample_rate: u32,

    // Reconstruction
    /// Wiener post-processing
    pub wiener: WienerConfig,

    /// Output file options
    pub output: OutputConfig,

    /// Write `sources.xml`, `Rx.bin` and `sources.xml.new` to the work directory
    /// (default: false)
    pub persist_intermediates: bool,
}

impl Default for SeparationConfig {
    fn default() -> Self {
        Self {
            iterations: 200,
            sources: 3,
            nmf_rank: 4,
            seed: 0x5eed,
            positivity_floor: 1e-10,
            max_unstable_iterations: 5,
            noise: NoiseSchedule::default(),
            mixing_type: MixingType::Convolutive,
            spatial_adaptability: Adaptability::Free,
            basis_adaptability: Adaptability::Free,
            activation_adaptability: Adaptability::Free,
            wlen: 1024,
            window: WindowKind::Sine,
            target_sample_rate: DEFAULT_SAMPLE_RATE,
            wiener: WienerConfig::default(),
            output: OutputConfig::default(),
            persist_intermediates: false,
        }
    }
}

impl SeparationConfig {
    /// Number of frequency bins F = wlen / 2 + 1
    pub fn bins(&self) -> usize {
        self.wlen / 2 + 1
    }

    /// Hop size between STFT frames (wlen / 2)
    pub fn hop_size(&self) -> usize {
        self.wlen / 2
    }

    /// Check every parameter, returning `InvalidInput` on the first violation
    pub fn validate(&self) -> Result<(), SeparationError> {
        if self.iterations == 0 {
            return Err(SeparationError::InvalidInput(
                "iterations must be > 0".to_string(),
            ));
        }
        if self.sources == 0 {
            return Err(SeparationError::InvalidInput(
                "source count must be > 0".to_string(),
            ));
        }
        if self.nmf_rank == 0 {
            return Err(SeparationError::InvalidInput(
                "NMF rank must be > 0".to_string(),
            ));
        }
        if self.wlen < 16 || !self.wlen.is_power_of_two() {
            return Err(SeparationError::InvalidInput(format!(
                "wlen must be a power of two >= 16, got {}",
                self.wlen
            )));
        }
        if self.target_sample_rate == 0 {
            return Err(SeparationError::InvalidInput(
                "target sample rate must be > 0".to_string(),
            ));
        }
        if !(self.positivity_floor.is_finite() && self.positivity_floor > 0.0) {
            return Err(SeparationError::InvalidInput(format!(
                "positivity floor must be finite and > 0, got {}",
                self.positivity_floor
            )));
        }
        let ratios = [self.noise.start_ratio, self.noise.end_ratio];
        if ratios.iter().any(|r| !(r.is_finite() && *r > 0.0)) {
            return Err(SeparationError::InvalidInput(format!(
                "noise ratios must be finite and > 0, got start={}, end={}",
                self.noise.start_ratio, self.noise.end_ratio
            )));
        }
        self.wiener.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = SeparationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bins(), 513);
        assert_eq!(config.hop_size(), 512);
        assert_eq!(config.iterations, 200);
        assert_eq!(config.sources, 3);
        assert_eq!(config.nmf_rank, 4);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let bad = [
            SeparationConfig { iterations: 0, ..Default::default() },
            SeparationConfig { sources: 0, ..Default::default() },
            SeparationConfig { nmf_rank: 0, ..Default::default() },
            SeparationConfig { wlen: 1000, ..Default::default() },
            SeparationConfig { wlen: 8, ..Default::default() },
            SeparationConfig { positivity_floor: 0.0, ..Default::default() },
            SeparationConfig {
                noise: NoiseSchedule { start_ratio: -1.0, end_ratio: 1e-4 },
                ..Default::default()
            },
            SeparationConfig {
                wiener: WienerConfig { spatial_blend: 1.5, ..Default::default() },
                ..Default::default()
            },
            SeparationConfig {
                wiener: WienerConfig { gain_db: f64::NAN, ..Default::default() },
                ..Default::default()
            },
            SeparationConfig {
                wiener: WienerConfig {
                    eigenvalue_floor_db: Some(f64::INFINITY),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        for config in bad {
            match config.validate() {
                Err(SeparationError::InvalidInput(_)) => {}
                other => panic!("Expected InvalidInput for {:?}, got {:?}", config, other),
            }
        }
    }

    #[test]
    fn test_wiener_linear_values() {
        let wiener = WienerConfig {
            gain_db: 10.0,
            eigenvalue_floor_db: Some(-20.0),
            ..Default::default()
        };
        assert!((wiener.gain() - 10.0).abs() < 1e-12);
        assert!((wiener.eigenvalue_floor().unwrap() - 0.01).abs() < 1e-15);
        assert_eq!(WienerConfig::default().gain(), 1.0);
        assert_eq!(WienerConfig::default().eigenvalue_floor(), None);
    }
}
