//! WAV output for estimated source images

use std::path::Path;

use ndarray::ArrayView2;

use crate::config::SampleFormat;
use crate::error::SeparationError;

/// Write a `(channels, frames)` signal to a WAV file
///
/// 16-bit output is clipped to [-1.0, 1.0]; the number of clipped samples is
/// logged and returned so that no alteration goes unreported.
///
/// # Returns
///
/// Number of samples that had to be clipped (always 0 for `Float32`)
pub fn write_wav(
    path: &Path,
    samples: ArrayView2<'_, f64>,
    sample_rate: u32,
    format: SampleFormat,
) -> Result<usize, SeparationError> {
    let channels = samples.nrows();
    if channels == 0 || channels > u16::MAX as usize {
        return Err(SeparationError::InvalidInput(format!(
            "cannot write {} channels",
            channels
        )));
    }

    let spec = hound::WavSpec {
        channels: channels as u16,
        sample_rate,
        bits_per_sample: match format {
            SampleFormat::Pcm16 => 16,
            SampleFormat::Float32 => 32,
        },
        sample_format: match format {
            SampleFormat::Pcm16 => hound::SampleFormat::Int,
            SampleFormat::Float32 => hound::SampleFormat::Float,
        },
    };

    let mut writer = hound::WavWriter::create(path, spec)
        .map_err(|e| SeparationError::Io(format!("cannot open {}: {}", path.display(), e)))?;

    let mut clipped = 0usize;
    for t in 0..samples.ncols() {
        for c in 0..channels {
            let value = samples[[c, t]];
            match format {
                SampleFormat::Pcm16 => {
                    if !(-1.0..=1.0).contains(&value) {
                        clipped += 1;
                    }
                    let scaled = (value.clamp(-1.0, 1.0) * i16::MAX as f64).round() as i16;
                    writer.write_sample(scaled)?;
                }
                SampleFormat::Float32 => writer.write_sample(value as f32)?,
            }
        }
    }
    writer.finalize()?;

    if clipped > 0 {
        log::warn!(
            "Clipped {} of {} samples while writing {}",
            clipped,
            samples.len(),
            path.display()
        );
    }
    log::debug!(
        "Wrote {} frames x {} channels to {}",
        samples.ncols(),
        channels,
        path.display()
    );

    Ok(clipped)
}
