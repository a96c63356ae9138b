//! Optical digit recognition

use std::process::Command;
use tracing::trace;

use crate::constants::sensing;
use crate::error::{MeterGuardError, Result};
use crate::hw::capture::Frame;

/// Turns a frame into the raw characters printed on the meter
#[cfg_attr(test, mockall::automock)]
pub trait DigitReader: Send + Sync {
    fn recognize(&self, frame: &Frame) -> Result<String>;
}

/// Runs the `tesseract` CLI against the frame file
pub struct TesseractReader {
    command: String,
    digits_only: bool,
}

impl TesseractReader {
    pub fn new(command: impl Into<String>, digits_only: bool) -> Self {
        Self {
            command: command.into(),
            digits_only,
        }
    }

    fn args(&self, frame: &Frame) -> Vec<String> {
        let mut args = vec![
            frame.path.to_string_lossy().into_owned(),
            "stdout".to_string(),
            "--oem".to_string(),
            sensing::TESSERACT_OEM.to_string(),
            "--psm".to_string(),
            sensing::TESSERACT_PSM.to_string(),
        ];
        if self.digits_only {
            args.push(sensing::TESSERACT_DIGITS_CONFIG.to_string());
        }
        args
    }
}

impl DigitReader for TesseractReader {
    fn recognize(&self, frame: &Frame) -> Result<String> {
        let output = Command::new(&self.command)
            .args(self.args(frame))
            .output()
            .map_err(|e| MeterGuardError::Reader(format!("failed to run {}: {}", self.command, e)))?;

        if !output.status.success() {
            return Err(MeterGuardError::Reader(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        trace!(raw = %text.trim(), "Reader output");
        Ok(text)
    }
}
