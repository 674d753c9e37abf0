//! Channel mixing utilities (stereo to mono conversion)

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::SeparationError;

/// Channel mixing mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelMixMode {
    /// Simple average: (L + R) / 2
    Mono,
    /// Sum: L + R (keeps the level of a source panned hard to one side)
    Sum,
    /// Keep the channel with more energy
    Dominant,
}

/// Convert stereo to mono
///
/// # Arguments
///
/// * `left` - Left channel samples
/// * `right` - Right channel samples
/// * `mode` - Mixing mode
///
/// # Returns
///
/// Mono samples
///
/// # Errors
///
/// Returns `InvalidInput` if the channels differ in length
pub fn stereo_to_mono(
    left: &[f64],
    right: &[f64],
    mode: ChannelMixMode,
) -> Result<Vec<f64>, SeparationError> {
    if left.len() != right.len() {
        return Err(SeparationError::InvalidInput(format!(
            "channel lengths differ: left={}, right={}",
            left.len(),
            right.len()
        )));
    }

    log::debug!("Converting stereo to mono using {:?}", mode);

    let mono = match mode {
        ChannelMixMode::Mono => left
            .iter()
            .zip(right)
            .map(|(l, r)| (l + r) * 0.5)
            .collect(),
        ChannelMixMode::Sum => left.iter().zip(right).map(|(l, r)| l + r).collect(),
        ChannelMixMode::Dominant => {
            let energy_l: f64 = left.iter().map(|x| x * x).sum();
            let energy_r: f64 = right.iter().map(|x| x * x).sum();
            if energy_l >= energy_r {
                left.to_vec()
            } else {
                right.to_vec()
            }
        }
    };
    Ok(mono)
}

/// Downmix a `(2, frames)` image to a `(1, frames)` array
pub fn downmix(
    image: ArrayView2<'_, f64>,
    mode: ChannelMixMode,
) -> Result<Array2<f64>, SeparationError> {
    if image.nrows() != 2 {
        return Err(SeparationError::UnsupportedFormat(format!(
            "downmix expects 2 channels (has {})",
            image.nrows()
        )));
    }
    let left = image.row(0).to_vec();
    let right = image.row(1).to_vec();
    let mono = stereo_to_mono(&left, &right, mode)?;
    let len = mono.len();
    Array2::from_shape_vec((1, len), mono)
        .map_err(|e| SeparationError::ProcessingError(e.to_string()))
}
