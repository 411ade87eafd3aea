//! ffmpeg transcoder
//!
//! Spawns one ffmpeg process per track and hands its stdout to songbird
//! as raw 48kHz stereo f32 samples

use songbird::input::{ChildContainer, Input, RawAdapter};
use std::ffi::OsString;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use symphonia_core::io::ReadOnlySource;
use thiserror::Error;
use tracing::{debug, info};

/// Discord voice runs at 48kHz stereo
pub const SAMPLE_RATE: u32 = 48_000;
pub const CHANNELS: u32 = 2;

#[derive(Error, Debug)]
pub enum TranscoderError {
    #[error("ffmpeg not found at {0:?}, install it or set FFMPEG_PATH")]
    NotFound(PathBuf),
    #[error("ffmpeg at {0:?} exited with {1}")]
    Failed(PathBuf, std::process::ExitStatus),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Wrapper around the ffmpeg executable
#[derive(Debug, Clone)]
pub struct Transcoder {
    path: PathBuf,
}

impl Transcoder {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Make sure the binary runs at all
    pub fn check(&self) -> Result<(), TranscoderError> {
        let status = Command::new(&self.path)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| self.spawn_error(e))?;

        if !status.success() {
            return Err(TranscoderError::Failed(self.path.clone(), status));
        }

        info!("Using ffmpeg at {:?}", self.path);
        Ok(())
    }

    /// Arguments decoding `source` to raw PCM on stdout
    pub fn args(source: &str) -> Vec<OsString> {
        let rate = SAMPLE_RATE.to_string();
        let channels = CHANNELS.to_string();
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-nostdin",
            "-i",
            source,
            "-vn",
            "-f",
            "f32le",
            "-ac",
            channels.as_str(),
            "-ar",
            rate.as_str(),
            "pipe:1",
        ]
        .iter()
        .map(OsString::from)
        .collect()
    }

    /// Start ffmpeg for `source` and wrap its output as a songbird input
    ///
    /// The process is killed when the input is dropped.
    pub fn spawn(&self, source: &str) -> Result<Input, TranscoderError> {
        let child = Command::new(&self.path)
            .args(Self::args(source))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        debug!("Spawned ffmpeg (pid {}) for {}", child.id(), source);

        let stream = ReadOnlySource::new(ChildContainer::from(child));
        Ok(RawAdapter::new(stream, SAMPLE_RATE, CHANNELS).into())
    }

    fn spawn_error(&self, e: std::io::Error) -> TranscoderError {
        if e.kind() == ErrorKind::NotFound {
            TranscoderError::NotFound(self.path.clone())
        } else {
            TranscoderError::Io(e)
        }
    }
}
