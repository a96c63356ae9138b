//! Error types for mg-core
//!
//! Re-exported from mg-error so every crate shares one error enum.

pub use mg_error::{MeterGuardError, Result};

use mg_protocol::ErrorKind;

/// Protocol category reported to control-surface clients
pub fn error_kind(err: &MeterGuardError) -> ErrorKind {
    match err {
        e if e.is_not_found() => ErrorKind::NotFound,
        e if e.is_storage() => ErrorKind::Storage,
        MeterGuardError::HardwareWrite { .. } | MeterGuardError::RelaysReleased => {
            ErrorKind::Hardware
        }
        MeterGuardError::InvalidCommand(_) | MeterGuardError::InvalidConfig { .. } => {
            ErrorKind::InvalidRequest
        }
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(error_kind(&MeterGuardError::RelayNotFound(4)), ErrorKind::NotFound);
        assert_eq!(error_kind(&MeterGuardError::GroupNotFound(9)), ErrorKind::NotFound);
        assert_eq!(error_kind(&MeterGuardError::store("disk full")), ErrorKind::Storage);
        assert_eq!(error_kind(&MeterGuardError::hardware(17, "EIO")), ErrorKind::Hardware);
        assert_eq!(error_kind(&MeterGuardError::RelaysReleased), ErrorKind::Hardware);
        assert_eq!(
            error_kind(&MeterGuardError::invalid_command("empty name")),
            ErrorKind::InvalidRequest
        );
        assert_eq!(error_kind(&MeterGuardError::RecognitionEmpty), ErrorKind::Internal);
    }
}
