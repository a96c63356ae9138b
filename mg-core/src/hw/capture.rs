//! Meter frame acquisition
//!
//! A frame is an image file on disk; the reader consumes it by path.

use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

use crate::error::{MeterGuardError, Result};

/// One captured image of the meter face
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub path: PathBuf,
}

/// Source of meter frames
#[cfg_attr(test, mockall::automock)]
pub trait FrameSource: Send + Sync {
    fn capture(&self) -> Result<Frame>;
}

/// Captures frames by running an external grabber (`fswebcam` by default)
pub struct CommandFrameSource {
    command: String,
    device: String,
    width: u32,
    height: u32,
    output: PathBuf,
}

impl CommandFrameSource {
    pub fn new(
        command: impl Into<String>,
        device: impl Into<String>,
        width: u32,
        height: u32,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            command: command.into(),
            device: device.into(),
            width,
            height,
            output: output.into(),
        }
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    fn args(&self) -> Vec<String> {
        vec![
            "-q".to_string(),
            "--no-banner".to_string(),
            "-d".to_string(),
            self.device.clone(),
            "-r".to_string(),
            format!("{}x{}", self.width, self.height),
            self.output.to_string_lossy().into_owned(),
        ]
    }
}

impl FrameSource for CommandFrameSource {
    fn capture(&self) -> Result<Frame> {
        // A stale frame must never be read as a fresh one
        if self.output.exists() {
            std::fs::remove_file(&self.output).map_err(|e| {
                MeterGuardError::CaptureFailure(format!(
                    "cannot clear previous frame {:?}: {}",
                    self.output, e
                ))
            })?;
        }

        let output = Command::new(&self.command)
            .args(self.args())
            .output()
            .map_err(|e| {
                MeterGuardError::CaptureFailure(format!("failed to run {}: {}", self.command, e))
            })?;

        if !output.status.success() {
            return Err(MeterGuardError::CaptureFailure(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        if !self.output.exists() {
            return Err(MeterGuardError::CaptureFailure(format!(
                "{} produced no image at {:?}",
                self.command, self.output
            )));
        }

        debug!(path = ?self.output, "Captured meter frame");
        Ok(Frame { path: self.output.clone() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_include_geometry_and_device() {
        let source = CommandFrameSource::new("fswebcam", "/dev/video2", 640, 480, "/tmp/f.jpg");
        let args = source.args();
        assert!(args.windows(2).any(|w| w[0] == "-d" && w[1] == "/dev/video2"));
        assert!(args.windows(2).any(|w| w[0] == "-r" && w[1] == "640x480"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/f.jpg"));
    }

    #[test]
    fn test_missing_command_is_capture_failure() {
        let dir = tempfile::tempdir().unwrap();
        let source = CommandFrameSource::new(
            "/nonexistent/grabber",
            "/dev/video0",
            640,
            480,
            dir.path().join("frame.jpg"),
        );
        assert!(matches!(source.capture(), Err(MeterGuardError::CaptureFailure(_))));
    }

    #[test]
    fn test_command_without_output_is_capture_failure() {
        let dir = tempfile::tempdir().unwrap();
        let frame = dir.path().join("frame.jpg");
        std::fs::write(&frame, b"old").unwrap();

        // `true` succeeds without writing anything
        let source = CommandFrameSource::new("true", "/dev/video0", 640, 480, &frame);
        assert!(matches!(source.capture(), Err(MeterGuardError::CaptureFailure(_))));
        assert!(!frame.exists());
    }
}
