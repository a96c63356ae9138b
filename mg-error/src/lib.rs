//! Unified error handling for MeterGuard
//!
//! This crate provides a single error type used across all MeterGuard components.
//! It uses thiserror for ergonomic error definitions with proper Display and Error trait impls.

use std::io;
use std::path::PathBuf;

/// Result type alias using MeterGuardError
pub type Result<T> = std::result::Result<T, MeterGuardError>;

/// Unified error type for all MeterGuard operations
#[derive(thiserror::Error, Debug)]
pub enum MeterGuardError {
    // ============================================================================
    // I/O and Storage Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Store error: {0}")]
    Store(String),

    // ============================================================================
    // Hardware Errors
    // ============================================================================
    #[error("Failed to drive GPIO pin {pin}: {reason}")]
    HardwareWrite {
        pin: u32,
        reason: String,
    },

    #[error("Relay pins have been released")]
    RelaysReleased,

    // ============================================================================
    // Sensing Errors
    // ============================================================================
    #[error("Frame capture failed: {0}")]
    CaptureFailure(String),

    #[error("No digits recognized in frame")]
    RecognitionEmpty,

    #[error("Digit reader failed: {0}")]
    Reader(String),

    // ============================================================================
    // Command Errors
    // ============================================================================
    #[error("Relay {0} not found")]
    RelayNotFound(u8),

    #[error("Group {0} not found")]
    GroupNotFound(u32),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    // ============================================================================
    // Daemon and IPC Errors
    // ============================================================================
    #[error("Daemon not available")]
    DaemonNotAvailable,

    #[error("Daemon connection failed: {0}")]
    DaemonConnection(String),

    #[error("Daemon response error: {0}")]
    DaemonResponse(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),
}

impl MeterGuardError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid configuration error for a named field
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a hardware write error for a pin
    pub fn hardware(pin: u32, reason: impl Into<String>) -> Self {
        Self::HardwareWrite {
            pin,
            reason: reason.into(),
        }
    }

    /// Create a store error from a string
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create an invalid command error from a string
    pub fn invalid_command(msg: impl Into<String>) -> Self {
        Self::InvalidCommand(msg.into())
    }

    /// True for errors that reference an unknown relay or group
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::RelayNotFound(_) | Self::GroupNotFound(_))
    }

    /// True for errors raised by the storage layer
    pub fn is_storage(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::FileRead { .. }
                | Self::FileWrite { .. }
                | Self::JsonParse(_)
                | Self::Store(_)
        )
    }
}

// Allow converting from String to MeterGuardError
impl From<String> for MeterGuardError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to MeterGuardError
impl From<&str> for MeterGuardError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(MeterGuardError::RelayNotFound(3).is_not_found());
        assert!(MeterGuardError::GroupNotFound(9).is_not_found());
        assert!(!MeterGuardError::RecognitionEmpty.is_not_found());
    }

    #[test]
    fn test_display_messages() {
        let err = MeterGuardError::hardware(17, "permission denied");
        assert_eq!(err.to_string(), "Failed to drive GPIO pin 17: permission denied");

        let err = MeterGuardError::invalid_config("safety.threshold_kwh", "must be positive");
        assert_eq!(
            err.to_string(),
            "Invalid configuration value for safety.threshold_kwh: must be positive"
        );
    }

    #[test]
    fn test_storage_classification() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert!(MeterGuardError::from(io).is_storage());
        assert!(MeterGuardError::store("locked").is_storage());
        assert!(!MeterGuardError::from("plain").is_storage());
    }
}
