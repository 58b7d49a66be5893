//! Video encoding behind a sink trait.
//!
//! The production encoder shells out to `ffmpeg`, feeding raw RGB24
//! frames on stdin and producing an H.264 mp4. The trait seam exists so
//! pipeline tests run without the binary installed. Encoding happens
//! inside the pipeline's blocking section, hence the synchronous
//! `std::process` API.

use std::io::Write;
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};

use image::RgbImage;

/// Error type for video encoding.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("ffmpeg binary not found: {0}")]
    NotFound(std::io::Error),

    #[error("ffmpeg execution failed (exit code {exit_code:?}): {stderr}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("frame is {got_width}x{got_height} but the stream is {width}x{height}")]
    FrameSizeMismatch {
        width: u32,
        height: u32,
        got_width: u32,
        got_height: u32,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open video stream accepting frames of one fixed size.
pub trait FrameSink: Send {
    fn append(&mut self, frame: &RgbImage) -> Result<(), EncodeError>;

    /// Flush and close the stream. The output file is only usable after
    /// this returns `Ok`.
    fn finalize(self: Box<Self>) -> Result<(), EncodeError>;
}

/// Opens [`FrameSink`]s at a given output path, size, and frame rate.
pub trait VideoEncoder: Send + Sync {
    fn open(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn FrameSink>, EncodeError>;
}

// ---------------------------------------------------------------------------
// ffmpeg implementation
// ---------------------------------------------------------------------------

/// Encoder backed by an `ffmpeg` subprocess.
pub struct FfmpegEncoder {
    binary: String,
}

impl FfmpegEncoder {
    pub fn new() -> Self {
        Self {
            binary: "ffmpeg".to_string(),
        }
    }

    /// Use an explicit binary path instead of resolving `ffmpeg` on PATH.
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for FfmpegEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoEncoder for FfmpegEncoder {
    fn open(
        &self,
        output: &Path,
        width: u32,
        height: u32,
        fps: u32,
    ) -> Result<Box<dyn FrameSink>, EncodeError> {
        let mut child = Command::new(&self.binary)
            .args([
                "-y",
                "-f",
                "rawvideo",
                "-pix_fmt",
                "rgb24",
                "-s",
                &format!("{width}x{height}"),
                "-r",
                &fps.to_string(),
                "-i",
                "-",
                "-an",
                // yuv420p requires even dimensions.
                "-vf",
                "scale=trunc(iw/2)*2:trunc(ih/2)*2",
                "-c:v",
                "libx264",
                "-pix_fmt",
                "yuv420p",
            ])
            .arg(output)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| {
                if err.kind() == std::io::ErrorKind::NotFound {
                    EncodeError::NotFound(err)
                } else {
                    EncodeError::Io(err)
                }
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncodeError::ExecutionFailed {
                exit_code: None,
                stderr: "ffmpeg stdin was not captured".to_string(),
            })?;

        Ok(Box::new(FfmpegSink {
            child: Some(child),
            stdin: Some(stdin),
            width,
            height,
        }))
    }
}

struct FfmpegSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    width: u32,
    height: u32,
}

impl FrameSink for FfmpegSink {
    fn append(&mut self, frame: &RgbImage) -> Result<(), EncodeError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(EncodeError::FrameSizeMismatch {
                width: self.width,
                height: self.height,
                got_width: frame.width(),
                got_height: frame.height(),
            });
        }
        let stdin = self.stdin.as_mut().ok_or_else(|| EncodeError::ExecutionFailed {
            exit_code: None,
            stderr: "stream already finalized".to_string(),
        })?;
        stdin.write_all(frame.as_raw())?;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<(), EncodeError> {
        // Closing stdin signals end-of-stream to ffmpeg.
        drop(self.stdin.take());
        let child = self.child.take().ok_or_else(|| EncodeError::ExecutionFailed {
            exit_code: None,
            stderr: "stream already finalized".to_string(),
        })?;
        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(EncodeError::ExecutionFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        // A sink abandoned without finalize (cancelled run) must not
        // leave a zombie encoder behind.
        if let Some(mut child) = self.child.take() {
            drop(self.stdin.take());
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
