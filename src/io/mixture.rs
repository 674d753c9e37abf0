//! Stereo mixture container

use ndarray::{Array2, ArrayView1, ArrayView2};

use crate::error::SeparationError;

/// Channel count the pipeline operates on
pub const STEREO: usize = 2;

/// Two-channel PCM mixture at a fixed sample rate
///
/// Samples are stored as a `(channels, frames)` array of `f64` normalised to
/// [-1.0, 1.0]. A mixture is immutable once constructed; stages that change
/// the signal (resampling) produce a new `Mixture`.
#[derive(Debug, Clone, PartialEq)]
pub struct Mixture {
    samples: Array2<f64>,
    sample_rate: u32,
}

impl Mixture {
    /// Wrap a `(channels, frames)` sample array
    ///
    /// # Errors
    ///
    /// - `UnsupportedFormat` if the channel count is not 2
    /// - `InvalidInput` if the mixture is empty, the rate is zero, or a sample
    ///   is not finite
    pub fn new(samples: Array2<f64>, sample_rate: u32) -> Result<Self, SeparationError> {
        if samples.nrows() != STEREO {
            return Err(SeparationError::UnsupportedFormat(format!(
                "mixture should have {} channels (has {})",
                STEREO,
                samples.nrows()
            )));
        }
        if samples.ncols() == 0 {
            return Err(SeparationError::InvalidInput(
                "Empty audio samples".to_string(),
            ));
        }
        if sample_rate == 0 {
            return Err(SeparationError::InvalidInput(
                "Invalid sample rate".to_string(),
            ));
        }
        if let Some(pos) = samples.iter().position(|s| !s.is_finite()) {
            return Err(SeparationError::InvalidInput(format!(
                "non-finite sample at index {}",
                pos
            )));
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    /// Build a mixture from left and right channel slices of equal length
    pub fn from_channels(
        left: &[f64],
        right: &[f64],
        sample_rate: u32,
    ) -> Result<Self, SeparationError> {
        if left.len() != right.len() {
            return Err(SeparationError::InvalidInput(format!(
                "channel lengths differ: left={}, right={}",
                left.len(),
                right.len()
            )));
        }
        let samples = Array2::from_shape_fn((STEREO, left.len()), |(c, t)| {
            if c == 0 {
                left[t]
            } else {
                right[t]
            }
        });
        Self::new(samples, sample_rate)
    }

    /// Build a mixture from interleaved samples `[L0, R0, L1, R1, ...]`
    pub fn from_interleaved(
        interleaved: &[f32],
        channels: usize,
        sample_rate: u32,
    ) -> Result<Self, SeparationError> {
        if channels != STEREO {
            return Err(SeparationError::UnsupportedFormat(format!(
                "mixture should have {} channels (has {})",
                STEREO, channels
            )));
        }
        if interleaved.len() % channels != 0 {
            return Err(SeparationError::InvalidInput(format!(
                "{} interleaved samples is not a multiple of {} channels",
                interleaved.len(),
                channels
            )));
        }
        let frames = interleaved.len() / channels;
        let samples = Array2::from_shape_fn((channels, frames), |(c, t)| {
            interleaved[t * channels + c] as f64
        });
        Self::new(samples, sample_rate)
    }

    /// Number of channels (always 2)
    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    /// Number of sample frames per channel
    pub fn len(&self) -> usize {
        self.samples.ncols()
    }

    /// Always false: empty mixtures are rejected at construction
    pub fn is_empty(&self) -> bool {
        self.samples.ncols() == 0
    }

    /// Sample rate in Hz
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// Read-only view of the `(channels, frames)` samples
    pub fn samples(&self) -> ArrayView2<'_, f64> {
        self.samples.view()
    }

    /// Read-only view of one channel
    pub fn channel(&self, index: usize) -> ArrayView1<'_, f64> {
        self.samples.row(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_interleaved_splits_channels() {
        let mix = Mixture::from_interleaved(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3], 2, 16000).unwrap();
        assert_eq!(mix.len(), 3);
        assert_eq!(mix.channels(), 2);
        assert!((mix.channel(0)[2] - 0.3).abs() < 1e-6);
        assert!((mix.channel(1)[1] + 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_wrong_channel_count() {
        let result = Mixture::from_interleaved(&[0.0; 9], 3, 16000);
        assert!(matches!(result, Err(SeparationError::UnsupportedFormat(_))));

        let result = Mixture::new(Array2::zeros((1, 10)), 16000);
        assert!(matches!(result, Err(SeparationError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_rejects_empty_and_non_finite() {
        assert!(matches!(
            Mixture::new(Array2::zeros((2, 0)), 16000),
            Err(SeparationError::InvalidInput(_))
        ));
        assert!(matches!(
            Mixture::from_channels(&[0.0, f64::NAN], &[0.0, 0.0], 16000),
            Err(SeparationError::InvalidInput(_))
        ));
        assert!(matches!(
            Mixture::from_channels(&[0.0], &[0.0], 0),
            Err(SeparationError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_duration() {
        let mix = Mixture::from_channels(&vec![0.0; 8000], &vec![0.0; 8000], 16000).unwrap();
        assert!((mix.duration_seconds() - 0.5).abs() < 1e-12);
    }
}
