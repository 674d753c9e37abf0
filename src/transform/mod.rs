//! Time-frequency transform
//!
//! Windowed STFT producing a complex spectrogram per channel, with an
//! overlap-add inverse used to bring filtered source images back to the time
//! domain.

pub mod stft;
pub mod window;

pub use stft::{frame_count, Spectrogram, Stft};
pub use window::WindowKind;
