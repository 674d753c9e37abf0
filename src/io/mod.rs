//! Audio I/O modules
//!
//! Mixture container, decoding using Symphonia and WAV output using hound.

pub mod decoder;
pub mod mixture;
pub mod writer;

pub use decoder::decode_mixture;
pub use mixture::{Mixture, STEREO};
pub use writer::write_wav;
