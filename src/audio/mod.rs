//! Audio module for playback
//!
//! Decodes sources through an external ffmpeg process

pub mod transcoder;

pub use transcoder::{Transcoder, TranscoderError};
