//! Raised-cosine smoothing of spectral power

use ndarray::{Array2, ArrayView2, Axis};

/// Normalised kernel `h(i) = 1 + cos(π (i − c) / (c + 1))`, `i = 0..=2c`
pub fn raised_cosine(half_width: usize) -> Vec<f64> {
    let c = half_width as f64;
    let kernel: Vec<f64> = (0..=2 * half_width)
        .map(|i| 1.0 + (std::f64::consts::PI * (i as f64 - c) / (c + 1.0)).cos())
        .collect();
    let sum: f64 = kernel.iter().sum();
    kernel.into_iter().map(|h| h / sum).collect()
}

/// Centred convolution along `axis`
///
/// Near the edges only the in-range taps are used and renormalised, so a
/// constant input stays constant.
fn smooth_axis(power: ArrayView2<'_, f64>, half_width: usize, axis: Axis) -> Array2<f64> {
    let kernel = raised_cosine(half_width);
    let mut out = Array2::<f64>::zeros(power.raw_dim());
    for (lane_in, mut lane_out) in power.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        let len = lane_in.len();
        for t in 0..len {
            let mut acc = 0.0;
            let mut weight = 0.0;
            for (i, h) in kernel.iter().enumerate() {
                let pos = t as isize + i as isize - half_width as isize;
                if pos >= 0 && (pos as usize) < len {
                    acc += h * lane_in[pos as usize];
                    weight += h;
                }
            }
            lane_out[t] = acc / weight;
        }
    }
    out
}

/// Smooth an F×N power spectrogram along time (`time_half_width`) and then
/// frequency (`frequency_half_width`); a half-width of 0 skips that axis
pub fn smooth_power(
    power: ArrayView2<'_, f64>,
    time_half_width: usize,
    frequency_half_width: usize,
) -> Array2<f64> {
    let mut out = power.to_owned();
    if time_half_width > 0 {
        out = smooth_axis(out.view(), time_half_width, Axis(1));
    }
    if frequency_half_width > 0 {
        out = smooth_axis(out.view(), frequency_half_width, Axis(0));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_is_normalised_and_symmetric() {
        for c in 1..5 {
            let h = raised_cosine(c);
            assert_eq!(h.len(), 2 * c + 1);
            assert!((h.iter().sum::<f64>() - 1.0).abs() < 1e-12);
            for i in 0..h.len() {
                assert!((h[i] - h[h.len() - 1 - i]).abs() < 1e-12);
            }
            assert!(h[c] > h[0]);
        }
    }

    #[test]
    fn test_constant_is_preserved() {
        let power = Array2::from_elem((6, 9), 3.0);
        let smoothed = smooth_power(power.view(), 2, 3);
        assert!(smoothed.iter().all(|&v| (v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn test_impulse_spreads_along_time_only() {
        let mut power = Array2::<f64>::zeros((5, 11));
        power[[2, 5]] = 1.0;
        let smoothed = smooth_power(power.view(), 2, 0);
        let h = raised_cosine(2);
        for (i, hv) in h.iter().enumerate() {
            assert!((smoothed[[2, 3 + i]] - hv).abs() < 1e-12);
        }
        assert_eq!(smoothed[[1, 5]], 0.0);
    }

    #[test]
    fn test_zero_width_is_identity() {
        let power = Array2::from_shape_fn((3, 4), |(f, n)| (f * 4 + n) as f64);
        assert_eq!(smooth_power(power.view(), 0, 0), power);
    }
}
