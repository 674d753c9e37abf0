//! Short-time Fourier transform with exact inverse
//!
//! Frames of length `wlen` with hop `wlen / 2`. The signal is placed at offset
//! `wlen / 4` inside a zero-padded buffer of `(N + 1) * wlen / 2` samples, with
//! `N = ceil(2 * samples / wlen)` frames. Each windowed frame is divided by
//! `sqrt(wlen * S(t))`, where `S` is the accumulated squared window, and the
//! inverse multiplies by the window again before overlap-add, so that
//! forward followed by inverse reproduces the input for any window whose
//! overlapped power is non-zero.
//!
//! # Example
//!
//! ```no_run
//! use ndarray::Array2;
//! use stratum_separation::transform::stft::Stft;
//! use stratum_separation::transform::window::WindowKind;
//!
//! let stft = Stft::new(1024, WindowKind::Sine)?;
//! let signal = Array2::<f64>::zeros((2, 16000));
//! let spec = stft.forward(signal.view())?;
//! let back = stft.inverse(&spec)?;
//! assert_eq!(back.dim(), (2, 16000));
//! # Ok::<(), stratum_separation::SeparationError>(())
//! ```

use std::sync::Arc;

use ndarray::{Array2, Array3, ArrayView2};
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};

use super::window::{window, WindowKind};
use crate::error::SeparationError;

/// Number of STFT frames for a signal of `samples` samples
pub fn frame_count(samples: usize, wlen: usize) -> usize {
    (2 * samples).div_ceil(wlen)
}

/// Complex spectrogram indexed by (channel, frequency bin, time frame)
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrogram {
    data: Array3<Complex64>,
    wlen: usize,
    samples: usize,
}

impl Spectrogram {
    /// Wrap a `(channels, bins, frames)` array produced with frame length `wlen`
    /// from a signal of `samples` samples
    pub fn from_parts(
        data: Array3<Complex64>,
        wlen: usize,
        samples: usize,
    ) -> Result<Self, SeparationError> {
        let (_, bins, frames) = data.dim();
        if bins != wlen / 2 + 1 {
            return Err(SeparationError::ProcessingError(format!(
                "spectrogram has {} bins but wlen {} implies {}",
                bins,
                wlen,
                wlen / 2 + 1
            )));
        }
        if frames != frame_count(samples, wlen) {
            return Err(SeparationError::ProcessingError(format!(
                "spectrogram has {} frames but {} samples imply {}",
                frames,
                samples,
                frame_count(samples, wlen)
            )));
        }
        Ok(Self {
            data,
            wlen,
            samples,
        })
    }

    /// Number of channels I
    pub fn channels(&self) -> usize {
        self.data.dim().0
    }

    /// Number of frequency bins F
    pub fn bins(&self) -> usize {
        self.data.dim().1
    }

    /// Number of time frames N
    pub fn frames(&self) -> usize {
        self.data.dim().2
    }

    /// Frame length used by the transform
    pub fn wlen(&self) -> usize {
        self.wlen
    }

    /// Length of the analysed signal in samples
    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Value at (channel, bin, frame)
    pub fn get(&self, channel: usize, bin: usize, frame: usize) -> Complex64 {
        self.data[[channel, bin, frame]]
    }

    /// Observation vector across channels at one time-frequency point
    pub fn vector(&self, bin: usize, frame: usize) -> Vec<Complex64> {
        (0..self.channels())
            .map(|c| self.data[[c, bin, frame]])
            .collect()
    }

    /// Underlying `(channels, bins, frames)` array
    pub fn data(&self) -> &Array3<Complex64> {
        &self.data
    }
}

/// STFT engine holding the window and FFT plans for one frame length
#[derive(Clone)]
pub struct Stft {
    wlen: usize,
    window: Vec<f64>,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for Stft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stft").field("wlen", &self.wlen).finish()
    }
}

impl Stft {
    /// Plan a transform with frame length `wlen`
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` unless `wlen` is a non-zero multiple of 4
    pub fn new(wlen: usize, kind: WindowKind) -> Result<Self, SeparationError> {
        if wlen == 0 || wlen % 4 != 0 {
            return Err(SeparationError::InvalidInput(format!(
                "wlen is {} and should be a multiple of 4",
                wlen
            )));
        }
        let mut planner = FftPlanner::<f64>::new();
        Ok(Self {
            wlen,
            window: window(kind, wlen),
            forward: planner.plan_fft_forward(wlen),
            inverse: planner.plan_fft_inverse(wlen),
        })
    }

    /// Frame length
    pub fn wlen(&self) -> usize {
        self.wlen
    }

    /// Hop size (wlen / 2)
    pub fn hop(&self) -> usize {
        self.wlen / 2
    }

    /// Number of frequency bins (wlen / 2 + 1)
    pub fn bins(&self) -> usize {
        self.wlen / 2 + 1
    }

    /// Accumulated squared window over the padded buffer
    fn window_power(&self, frames: usize) -> Vec<f64> {
        let hop = self.hop();
        let mut power = vec![0.0; (frames + 1) * hop];
        for n in 0..frames {
            for (k, w) in self.window.iter().enumerate() {
                power[n * hop + k] += w * w;
            }
        }
        power
    }

    /// Forward transform of a `(channels, samples)` signal
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the signal is empty
    pub fn forward(&self, signal: ArrayView2<'_, f64>) -> Result<Spectrogram, SeparationError> {
        let (channels, samples) = signal.dim();
        if channels == 0 || samples == 0 {
            return Err(SeparationError::InvalidInput(
                "cannot transform an empty signal".to_string(),
            ));
        }

        let wlen = self.wlen;
        let hop = self.hop();
        let offset = wlen / 4;
        let frames = frame_count(samples, wlen);
        let bins = self.bins();

        log::debug!(
            "STFT forward: {} channels x {} samples, wlen={}, {} bins x {} frames",
            channels,
            samples,
            wlen,
            bins,
            frames
        );

        let norm: Vec<f64> = self
            .window_power(frames)
            .iter()
            .map(|p| (wlen as f64 * p).sqrt())
            .collect();

        let mut data = Array3::<Complex64>::zeros((channels, bins, frames));
        let mut padded = vec![0.0; (frames + 1) * hop];
        let mut buffer = vec![Complex64::new(0.0, 0.0); wlen];

        for c in 0..channels {
            padded.iter_mut().for_each(|v| *v = 0.0);
            for (t, &x) in signal.row(c).iter().enumerate() {
                padded[offset + t] = x;
            }

            for n in 0..frames {
                let start = n * hop;
                for k in 0..wlen {
                    let value = padded[start + k] * self.window[k] / norm[start + k];
                    buffer[k] = Complex64::new(value, 0.0);
                }
                self.forward.process(&mut buffer);
                for f in 0..bins {
                    data[[c, f, n]] = buffer[f];
                }
            }
        }

        Spectrogram::from_parts(data, wlen, samples)
    }

    /// Inverse transform with overlap-add, truncated to the original length
    ///
    /// # Errors
    ///
    /// Returns `ProcessingError` if the spectrogram was built with another frame length
    pub fn inverse(&self, spec: &Spectrogram) -> Result<Array2<f64>, SeparationError> {
        if spec.wlen() != self.wlen {
            return Err(SeparationError::ProcessingError(format!(
                "spectrogram wlen {} does not match transform wlen {}",
                spec.wlen(),
                self.wlen
            )));
        }

        let wlen = self.wlen;
        let hop = self.hop();
        let offset = wlen / 4;
        let bins = spec.bins();
        let frames = spec.frames();
        let channels = spec.channels();
        let samples = spec.samples();

        let norm: Vec<f64> = self
            .window_power(frames)
            .iter()
            .map(|p| (p / wlen as f64).sqrt())
            .collect();

        let mut output = Array2::<f64>::zeros((channels, samples));
        let mut accum = vec![0.0; (frames + 1) * hop];
        let mut buffer = vec![Complex64::new(0.0, 0.0); wlen];
        let scale = 1.0 / wlen as f64;

        for c in 0..channels {
            accum.iter_mut().for_each(|v| *v = 0.0);
            for n in 0..frames {
                for f in 0..bins {
                    buffer[f] = spec.get(c, f, n);
                }
                for f in bins..wlen {
                    buffer[f] = spec.get(c, wlen - f, n).conj();
                }
                self.inverse.process(&mut buffer);

                let start = n * hop;
                for k in 0..wlen {
                    accum[start + k] += buffer[k].re * scale * self.window[k] / norm[start + k];
                }
            }
            for t in 0..samples {
                output[[c, t]] = accum[offset + t];
            }
        }

        Ok(output)
    }
}
