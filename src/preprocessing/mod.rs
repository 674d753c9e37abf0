//! Audio preprocessing modules
//!
//! This module contains utilities for preparing audio for separation and
//! for shaping the output:
//! - Band-limited resampling to the processing rate
//! - Channel mixing (stereo to mono)

pub mod channel_mixer;
pub mod resample;
