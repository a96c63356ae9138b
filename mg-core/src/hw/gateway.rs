//! Logical relay state to electrical level translation

use tracing::{debug, warn};

use crate::data::Pin;
use crate::error::{MeterGuardError, Result};
use crate::hw::control::{Actuator, Level};

/// Single path through which relay pins are written
///
/// Only the state coordinator holds one, so every physical write happens
/// inside its exclusion domain.
pub struct ActuationGateway {
    actuator: Box<dyn Actuator>,
    /// Relay boards that energise on a low input
    active_low: bool,
}

impl ActuationGateway {
    pub fn new(actuator: Box<dyn Actuator>, active_low: bool) -> Self {
        Self { actuator, active_low }
    }

    pub fn active_low(&self) -> bool {
        self.active_low
    }

    /// Electrical level that puts a relay in logical state `on`
    pub fn level_for(&self, on: bool) -> Level {
        match (on, self.active_low) {
            (true, false) | (false, true) => Level::High,
            (true, true) | (false, false) => Level::Low,
        }
    }

    pub fn prepare(&mut self, pin: Pin) -> Result<()> {
        self.actuator.setup_output(pin).map_err(|e| as_hardware(pin, e))
    }

    /// Drive `pin` so its relay is logically `on`
    pub fn apply(&mut self, pin: Pin, on: bool) -> Result<()> {
        let level = self.level_for(on);
        debug!(pin, on, ?level, "Driving relay pin");
        self.actuator
            .set_level(pin, level)
            .map_err(|e| as_hardware(pin, e))
    }

    pub fn release(&mut self, pin: Pin) {
        if let Err(e) = self.actuator.release(pin) {
            warn!(pin, "Failed to release relay pin: {}", e);
        }
    }
}

fn as_hardware(pin: Pin, err: MeterGuardError) -> MeterGuardError {
    match err {
        e @ MeterGuardError::HardwareWrite { .. } => e,
        other => MeterGuardError::hardware(pin, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::control::MockActuator;
    use mockall::predicate::eq;

    #[test]
    fn test_level_mapping() {
        let low = ActuationGateway::new(Box::new(MockActuator::new()), true);
        assert_eq!(low.level_for(true), Level::Low);
        assert_eq!(low.level_for(false), Level::High);

        let high = ActuationGateway::new(Box::new(MockActuator::new()), false);
        assert_eq!(high.level_for(true), Level::High);
        assert_eq!(high.level_for(false), Level::Low);
    }

    #[test]
    fn test_apply_writes_inverted_level() {
        let mut mock = MockActuator::new();
        mock.expect_set_level()
            .with(eq(17), eq(Level::Low))
            .times(1)
            .returning(|_, _| Ok(()));

        let mut gateway = ActuationGateway::new(Box::new(mock), true);
        gateway.apply(17, true).unwrap();
    }

    #[test]
    fn test_apply_normalizes_errors_to_hardware() {
        let mut mock = MockActuator::new();
        mock.expect_set_level()
            .returning(|_, _| Err(MeterGuardError::generic("bus fault")));

        let mut gateway = ActuationGateway::new(Box::new(mock), false);
        let err = gateway.apply(6, false).unwrap_err();
        match err {
            MeterGuardError::HardwareWrite { pin, reason } => {
                assert_eq!(pin, 6);
                assert!(reason.contains("bus fault"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
