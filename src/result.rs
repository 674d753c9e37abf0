//! Separation result types

use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::config::OutputConfig;
use crate::error::SeparationError;
use crate::io::write_wav;
use crate::preprocessing::channel_mixer::downmix;

/// Estimated contribution of one source to the mixture
#[derive(Debug, Clone, PartialEq)]
pub struct SourceImage {
    /// Source index j
    pub index: usize,

    /// Source name, if the model carried one
    pub name: Option<String>,

    /// `(channels, samples)` signal at the processing rate
    pub samples: Array2<f64>,

    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl SourceImage {
    /// Output file name: `{name}.wav`, or `y{j}.wav` counting from 1
    pub fn file_name(&self) -> String {
        match &self.name {
            Some(name) => format!("{}.wav", name),
            None => format!("y{}.wav", self.index + 1),
        }
    }

    /// Number of channels
    pub fn channels(&self) -> usize {
        self.samples.nrows()
    }

    /// Duration in seconds
    pub fn duration_seconds(&self) -> f64 {
        self.samples.ncols() as f64 / self.sample_rate as f64
    }

    /// Write the image into `dir` using `output` options
    ///
    /// Returns the number of clipped samples.
    pub fn write_to(&self, dir: &Path, output: &OutputConfig) -> Result<usize, SeparationError> {
        let path = dir.join(self.file_name());
        match output.downmix {
            Some(mode) => {
                let mono = downmix(self.samples.view(), mode)?;
                write_wav(&path, mono.view(), self.sample_rate, output.sample_format)
            }
            None => write_wav(&path, self.samples.view(), self.sample_rate, output.sample_format),
        }
    }
}

/// Wall-clock time spent in one pipeline stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTiming {
    /// Stage name
    pub stage: String,

    /// Elapsed time in milliseconds
    pub elapsed_ms: f64,
}

/// Separation metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeparationMetadata {
    /// Duration of the input in seconds
    pub duration_seconds: f64,

    /// Sample rate of the input in Hz
    pub input_sample_rate: u32,

    /// Sample rate of the source images in Hz
    pub sample_rate: u32,

    /// Whether the input had to be resampled
    pub resampled: bool,

    /// Number of sources J
    pub sources: usize,

    /// EM iterations executed
    pub iterations: usize,

    /// Log-likelihood after the last EM iteration
    pub final_log_likelihood: Option<f64>,

    /// NMF entries clamped to the positivity floor over the run
    pub clamped_entries: usize,

    /// EM iterations flagged unstable
    pub unstable_iterations: usize,

    /// Source-image values that were not finite and were replaced with zero
    pub replaced_values: usize,

    /// Total processing time in milliseconds
    pub processing_time_ms: f64,

    /// Per-stage timings in execution order
    pub stage_timings: Vec<StageTiming>,
}

/// Complete separation result
#[derive(Debug, Clone)]
pub struct SeparationResult {
    /// One image per source, in source order
    pub images: Vec<SourceImage>,

    /// Run metadata
    pub metadata: SeparationMetadata,
}

impl SeparationResult {
    /// Write every source image into `dir`
    ///
    /// Returns the total number of clipped samples.
    pub fn write_all(&self, dir: &Path, output: &OutputConfig) -> Result<usize, SeparationError> {
        std::fs::create_dir_all(dir)?;
        let mut clipped = 0;
        for image in &self.images {
            clipped += image.write_to(dir, output)?;
        }
        log::info!(
            "Wrote {} source images to {}",
            self.images.len(),
            dir.display()
        );
        Ok(clipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SampleFormat;
    use crate::preprocessing::channel_mixer::ChannelMixMode;

    fn image(index: usize, name: Option<&str>) -> SourceImage {
        SourceImage {
            index,
            name: name.map(str::to_string),
            samples: Array2::from_shape_fn((2, 1600), |(c, t)| {
                0.5 * ((t as f64) * 0.01 * (c + 1) as f64).sin()
            }),
            sample_rate: 16000,
        }
    }

    #[test]
    fn test_file_names() {
        assert_eq!(image(0, None).file_name(), "y1.wav");
        assert_eq!(image(2, None).file_name(), "y3.wav");
        assert_eq!(image(1, Some("bass")).file_name(), "bass.wav");
        assert!((image(0, None).duration_seconds() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_write_stereo_and_downmix() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(0, None);

        img.write_to(dir.path(), &OutputConfig::default()).unwrap();
        let reader = hound::WavReader::open(dir.path().join("y1.wav")).unwrap();
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_rate, 16000);
        assert_eq!(reader.duration(), 1600);

        let mono = OutputConfig {
            sample_format: SampleFormat::Float32,
            downmix: Some(ChannelMixMode::Mono),
        };
        let named = image(1, Some("voice"));
        named.write_to(dir.path(), &mono).unwrap();
        let reader = hound::WavReader::open(dir.path().join("voice.wav")).unwrap();
        assert_eq!(reader.spec().channels, 1);
        assert_eq!(reader.spec().bits_per_sample, 32);
    }

    fn read_mono(path: &Path) -> Vec<f32> {
        let mut reader = hound::WavReader::open(path).unwrap();
        assert_eq!(reader.spec().channels, 1);
        reader.samples::<f32>().map(|s| s.unwrap()).collect()
    }

    #[test]
    fn test_downmix_mode_is_honoured() {
        let dir = tempfile::tempdir().unwrap();
        // hard left: the right channel is silent
        let img = SourceImage {
            index: 0,
            name: None,
            samples: Array2::from_shape_fn((2, 100), |(c, t)| {
                if c == 0 {
                    0.25 * ((t as f64) * 0.2).sin()
                } else {
                    0.0
                }
            }),
            sample_rate: 16000,
        };
        let left: Vec<f32> = img.samples.row(0).iter().map(|&v| v as f32).collect();

        let mut written = Vec::new();
        for mode in [
            ChannelMixMode::Mono,
            ChannelMixMode::Sum,
            ChannelMixMode::Dominant,
        ] {
            let output = OutputConfig {
                sample_format: SampleFormat::Float32,
                downmix: Some(mode),
            };
            let sub = dir.path().join(format!("{:?}", mode));
            std::fs::create_dir_all(&sub).unwrap();
            img.write_to(&sub, &output).unwrap();
            written.push(read_mono(&sub.join("y1.wav")));
        }

        let halved: Vec<f32> = left.iter().map(|v| v * 0.5).collect();
        assert_eq!(written[0], halved);
        assert_eq!(written[1], left);
        assert_eq!(written[2], left);
    }
}
