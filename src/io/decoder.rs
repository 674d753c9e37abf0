//! Audio decoding using Symphonia

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};

use super::mixture::{Mixture, STEREO};
use crate::error::SeparationError;

/// Decode an audio file into a stereo [`Mixture`]
///
/// # Arguments
///
/// * `path` - Path to a two-channel audio file (WAV or any format Symphonia probes)
///
/// # Errors
///
/// - `InvalidInput` if the file is missing, unreadable, or its header is corrupt
/// - `UnsupportedFormat` if the file does not have exactly 2 channels
/// - `DecodingError` if a packet cannot be decoded
pub fn decode_mixture(path: &Path) -> Result<Mixture, SeparationError> {
    log::debug!("Decoding audio file: {}", path.display());

    if !path.exists() {
        return Err(SeparationError::InvalidInput(format!(
            "No such file or directory: '{}'",
            path.display()
        )));
    }

    let file = File::open(path).map_err(|e| {
        SeparationError::InvalidInput(format!("cannot open '{}': {}", path.display(), e))
    })?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| {
            SeparationError::InvalidInput(format!(
                "'{}' is not a readable audio file: {}",
                path.display(),
                e
            ))
        })?;
    let mut format = probed.format;

    let track = format.default_track().ok_or_else(|| {
        SeparationError::InvalidInput(format!("'{}' contains no audio track", path.display()))
    })?;
    let track_id = track.id;
    let sample_rate = track.codec_params.sample_rate.ok_or_else(|| {
        SeparationError::InvalidInput(format!("'{}' has no sample rate", path.display()))
    })?;

    if let Some(channels) = track.codec_params.channels {
        if channels.count() != STEREO {
            return Err(SeparationError::UnsupportedFormat(format!(
                "'{}' should have {} channels (has {})",
                path.display(),
                STEREO,
                channels.count()
            )));
        }
    }

    let mut decoder = get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| SeparationError::DecodingError(format!("cannot create decoder: {}", e)))?;

    let mut interleaved: Vec<f32> = Vec::new();
    let mut channel_count = 0usize;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err)) if err.kind() == ErrorKind::UnexpectedEof => break,
            Err(err) => {
                return Err(SeparationError::DecodingError(format!(
                    "cannot read audio packet: {}",
                    err
                )))
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(audio_buffer) => {
                let spec = *audio_buffer.spec();
                channel_count = spec.channels.count();
                if channel_count != STEREO {
                    return Err(SeparationError::UnsupportedFormat(format!(
                        "'{}' should have {} channels (has {})",
                        path.display(),
                        STEREO,
                        channel_count
                    )));
                }
                let mut sample_buffer =
                    SampleBuffer::<f32>::new(audio_buffer.capacity() as u64, spec);
                sample_buffer.copy_interleaved_ref(audio_buffer);
                interleaved.extend_from_slice(sample_buffer.samples());
            }
            Err(SymphoniaError::DecodeError(err)) => {
                log::warn!("Skipping undecodable packet: {}", err);
            }
            Err(err) => {
                return Err(SeparationError::DecodingError(format!(
                    "cannot decode packet: {}",
                    err
                )))
            }
        }
    }

    if interleaved.is_empty() {
        return Err(SeparationError::InvalidInput(format!(
            "'{}' contains no samples",
            path.display()
        )));
    }

    log::debug!(
        "Decoded {} frames at {} Hz from {}",
        interleaved.len() / channel_count.max(1),
        sample_rate,
        path.display()
    );

    Mixture::from_interleaved(&interleaved, channel_count, sample_rate)
}
