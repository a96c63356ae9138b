//! Input validation for MeterGuard
//!
//! Everything arriving from the control socket or the config file passes
//! through here before it reaches the registry.

use crate::constants::relays;
use crate::data::types::Pin;
use crate::error::{MeterGuardError, Result};

/// Validates a relay or group label and returns it trimmed
pub fn validate_name(name: &str) -> Result<String> {
    mg_protocol::validate_name(name).map_err(MeterGuardError::invalid_command)?;
    Ok(name.trim().to_string())
}

/// Validates a GPIO line number from the pin map
pub fn validate_pin(pin: Pin) -> Result<Pin> {
    if pin > relays::MAX_PIN {
        return Err(MeterGuardError::invalid_config(
            "relays.pins",
            format!("pin {} exceeds maximum {}", pin, relays::MAX_PIN),
        ));
    }
    Ok(pin)
}

/// Validates a parsed meter value
pub fn validate_reading_value(value: f64) -> Result<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(MeterGuardError::generic(format!(
            "reading {} is not a non-negative finite number",
            value
        )));
    }
    Ok(value)
}
