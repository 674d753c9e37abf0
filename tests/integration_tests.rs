//! Integration tests for the separation pipeline

use std::f64::consts::PI;
use std::path::Path;

use ndarray::Array2;
use stratum_separation::covariance::load_tensor;
use stratum_separation::persist::{
    ModelDocument, COVARIANCE_FILE, ESTIMATED_SOURCES_FILE, SOURCES_FILE,
};
use stratum_separation::{
    separate, separate_file, Adaptability, Mixture, MixingType, SeparationConfig,
    SeparationError,
};

const RATE: u32 = 16000;

/// Stereo image of a sine tone panned with gains `[left, right]`
fn panned_tone(freq: f64, gains: [f64; 2], amplitude: f64, seconds: f64, rate: u32) -> Array2<f64> {
    let len = (seconds * rate as f64) as usize;
    Array2::from_shape_fn((2, len), |(c, t)| {
        gains[c] * amplitude * (2.0 * PI * freq * t as f64 / rate as f64).sin()
    })
}

/// Normalised inner product of two flattened signals
fn correlation(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    assert_eq!(a.dim(), b.dim());
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let na: f64 = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    dot / (na * nb).max(1e-300)
}

fn two_tone_config() -> SeparationConfig {
    SeparationConfig {
        sources: 2,
        nmf_rank: 4,
        iterations: 50,
        mixing_type: MixingType::Instantaneous,
        spatial_adaptability: Adaptability::Free,
        ..Default::default()
    }
}

fn two_tone_mixture() -> (Mixture, Array2<f64>, Array2<f64>) {
    let first = panned_tone(440.0, [0.5, 0.866], 0.4, 2.0, RATE);
    let second = panned_tone(1250.0, [0.866, 0.5], 0.4, 2.0, RATE);
    let mixture = Mixture::new(&first + &second, RATE).unwrap();
    (mixture, first, second)
}

fn write_stereo_wav(path: &Path, samples: &Array2<f64>, rate: u32, channels: u16) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for t in 0..samples.ncols() {
        for c in 0..channels as usize {
            let v = (samples[[c, t]] * i16::MAX as f64).round() as i16;
            writer.write_sample(v).unwrap();
        }
    }
    writer.finalize().unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separate_two_panned_tones() {
        let _ = env_logger::builder().is_test(true).try_init();
        let (mixture, first, second) = two_tone_mixture();

        let result = separate(&mixture, two_tone_config()).expect("Separation should succeed");
        assert_eq!(result.images.len(), 2);
        for image in &result.images {
            assert_eq!(image.samples.dim(), first.dim());
            assert_eq!(image.sample_rate, RATE);
        }

        // Sources are interchangeable, pick the better assignment
        let c = |j: usize, truth: &Array2<f64>| correlation(&result.images[j].samples, truth);
        let direct = c(0, &first) + c(1, &second);
        let swapped = c(0, &second) + c(1, &first);
        let (a, b) = if direct >= swapped { (0, 1) } else { (1, 0) };

        assert!(
            c(a, &first) > 0.9,
            "first tone correlation {:.3}",
            c(a, &first)
        );
        assert!(
            c(b, &second) > 0.9,
            "second tone correlation {:.3}",
            c(b, &second)
        );
        assert!(c(a, &second).abs() < 0.3, "leakage {:.3}", c(a, &second));
        assert!(c(b, &first).abs() < 0.3, "leakage {:.3}", c(b, &first));

        let metadata = &result.metadata;
        assert_eq!(metadata.sources, 2);
        assert_eq!(metadata.iterations, 50);
        assert!(!metadata.resampled);
        assert!(metadata.final_log_likelihood.unwrap().is_finite());
        assert!((metadata.duration_seconds - 2.0).abs() < 1e-9);
        let stages: Vec<&str> = metadata
            .stage_timings
            .iter()
            .map(|t| t.stage.as_str())
            .collect();
        assert!(stages.contains(&"estimation"));
        assert!(stages.contains(&"reconstruction"));
    }

    #[test]
    fn test_images_sum_to_mixture() {
        let (mixture, _, _) = two_tone_mixture();
        let config = SeparationConfig {
            iterations: 10,
            ..two_tone_config()
        };
        let result = separate(&mixture, config).unwrap();

        let mut total = Array2::<f64>::zeros(mixture.samples().dim());
        for image in &result.images {
            total += &image.samples;
        }
        let err = (&total - &mixture.samples())
            .iter()
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt();
        let norm = mixture.samples().iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(err / norm < 1e-3, "relative error {:e}", err / norm);
    }

    #[test]
    fn test_separation_is_deterministic() {
        let (mixture, _, _) = two_tone_mixture();
        let config = SeparationConfig {
            iterations: 15,
            ..two_tone_config()
        };
        let a = separate(&mixture, config.clone()).unwrap();
        let b = separate(&mixture, config).unwrap();
        for (x, y) in a.images.iter().zip(&b.images) {
            assert_eq!(x.samples, y.samples);
        }
        assert_eq!(
            a.metadata.final_log_likelihood,
            b.metadata.final_log_likelihood
        );
    }

    #[test]
    fn test_single_source_returns_mixture() {
        let tone = panned_tone(600.0, [0.707, 0.707], 0.5, 1.0, RATE)
            + panned_tone(1500.0, [0.707, 0.707], 0.2, 1.0, RATE);
        let mixture = Mixture::new(tone.clone(), RATE).unwrap();
        let config = SeparationConfig {
            sources: 1,
            iterations: 20,
            mixing_type: MixingType::Instantaneous,
            ..Default::default()
        };

        let result = separate(&mixture, config).unwrap();
        assert_eq!(result.images.len(), 1);
        let corr = correlation(&result.images[0].samples, &tone);
        assert!(corr > 0.99, "correlation {:.4}", corr);
    }

    #[test]
    fn test_convolutive_model_runs() {
        let (mixture, _, _) = two_tone_mixture();
        let config = SeparationConfig {
            iterations: 10,
            mixing_type: MixingType::Convolutive,
            ..two_tone_config()
        };
        let result = separate(&mixture, config).unwrap();
        assert_eq!(result.images.len(), 2);
        assert!(result
            .images
            .iter()
            .all(|img| img.samples.iter().all(|v| v.is_finite())));
    }

    #[test]
    fn test_separate_file_with_resampling() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mix.wav");
        let output = dir.path().join("out");

        let mix = panned_tone(440.0, [0.5, 0.866], 0.3, 1.0, 44100)
            + panned_tone(1250.0, [0.866, 0.5], 0.3, 1.0, 44100);
        write_stereo_wav(&input, &mix, 44100, 2);

        let config = SeparationConfig {
            iterations: 5,
            ..two_tone_config()
        };
        let result = separate_file(&input, &output, config).unwrap();
        assert!(result.metadata.resampled);
        assert_eq!(result.metadata.input_sample_rate, 44100);
        assert_eq!(result.metadata.sample_rate, RATE);

        for name in ["y1.wav", "y2.wav"] {
            let reader = hound::WavReader::open(output.join(name)).unwrap();
            let spec = reader.spec();
            assert_eq!(spec.channels, 2);
            assert_eq!(spec.sample_rate, RATE);
            assert_eq!(reader.duration(), RATE);
        }
        assert!(!output.join(SOURCES_FILE).exists());
    }

    #[test]
    fn test_mono_file_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mono.wav");
        let tone = panned_tone(440.0, [1.0, 1.0], 0.3, 0.5, RATE);
        write_stereo_wav(&input, &tone, RATE, 1);

        let err = separate_file(&input, dir.path(), SeparationConfig::default()).unwrap_err();
        assert!(matches!(err, SeparationError::UnsupportedFormat(_)));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_missing_file_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = separate_file(
            &dir.path().join("missing.wav"),
            dir.path(),
            SeparationConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, SeparationError::InvalidInput(_)));
        assert!(err.to_string().contains("[load]"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (mixture, _, _) = two_tone_mixture();
        let config = SeparationConfig {
            wlen: 1000,
            ..Default::default()
        };
        let err = separate(&mixture, config).unwrap_err();
        assert!(matches!(err, SeparationError::InvalidInput(_)));
    }

    #[test]
    fn test_intermediate_files_kept_next_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("mix.wav");
        let output = dir.path().join("out");
        let (mixture, _, _) = two_tone_mixture();
        write_stereo_wav(&input, &mixture.samples().to_owned(), RATE, 2);

        let config = SeparationConfig {
            iterations: 4,
            persist_intermediates: true,
            ..two_tone_config()
        };
        separate_file(&input, &output, config.clone()).unwrap();

        for name in [SOURCES_FILE, COVARIANCE_FILE, ESTIMATED_SOURCES_FILE] {
            assert!(output.join(name).exists(), "{} missing", name);
        }

        let initial = ModelDocument::load(&output.join(SOURCES_FILE)).unwrap();
        let estimated = ModelDocument::load(&output.join(ESTIMATED_SOURCES_FILE)).unwrap();
        assert_eq!(initial.wlen, config.wlen);
        assert_eq!(estimated.iterations, 4);
        assert_eq!(estimated.params.len(), 2);
        assert_eq!(estimated.params.bins(), config.bins());

        let cov = load_tensor(&output.join(COVARIANCE_FILE)).unwrap();
        assert_eq!(cov.channels(), 2);
        assert_eq!(cov.bins(), config.bins());
        assert_eq!(cov.frames(), estimated.params.frames());
    }
}
