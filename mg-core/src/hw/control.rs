//! GPIO output control
//!
//! Relays hang off plain GPIO lines driven through the Linux sysfs
//! interface. A line must be exported and switched to output before its
//! value file accepts writes.
//!
//! # Levels
//!
//! The [`Actuator`] only knows electrical levels. Whether `High` means
//! "relay energised" depends on the board; see
//! [`ActuationGateway`](crate::hw::ActuationGateway).

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::constants::timing;
use crate::data::Pin;
use crate::error::{MeterGuardError, Result};

/// Electrical level of an output line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    fn as_sysfs(self) -> &'static str {
        match self {
            Level::Low => "0",
            Level::High => "1",
        }
    }
}

/// Something that can drive output pins
#[cfg_attr(test, mockall::automock)]
pub trait Actuator: Send {
    /// Claim `pin` as an output; called once before the first write
    fn setup_output(&mut self, pin: Pin) -> Result<()> {
        let _ = pin;
        Ok(())
    }

    fn set_level(&mut self, pin: Pin, level: Level) -> Result<()>;

    /// Give the line back to the kernel
    fn release(&mut self, pin: Pin) -> Result<()> {
        let _ = pin;
        Ok(())
    }
}

/// Sysfs GPIO backend (`/sys/class/gpio`)
pub struct SysfsGpio {
    base: PathBuf,
    exported: HashSet<Pin>,
}

impl SysfsGpio {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            exported: HashSet::new(),
        }
    }

    fn line_dir(&self, pin: Pin) -> PathBuf {
        self.base.join(format!("gpio{}", pin))
    }

    fn write_attr(path: &Path, pin: Pin, value: &str) -> Result<()> {
        fs::write(path, value).map_err(|e| {
            MeterGuardError::hardware(pin, format!("write '{}' to {:?}: {}", value, path, e))
        })
    }
}

impl Actuator for SysfsGpio {
    fn setup_output(&mut self, pin: Pin) -> Result<()> {
        let line = self.line_dir(pin);
        if !line.exists() {
            Self::write_attr(&self.base.join("export"), pin, &pin.to_string())?;
            // udev fixes permissions on the new directory asynchronously
            std::thread::sleep(timing::GPIO_EXPORT_SETTLE);
        }
        Self::write_attr(&line.join("direction"), pin, "out")?;
        self.exported.insert(pin);
        debug!(pin, "GPIO configured as output");
        Ok(())
    }

    fn set_level(&mut self, pin: Pin, level: Level) -> Result<()> {
        if !self.exported.contains(&pin) {
            self.setup_output(pin)?;
        }
        Self::write_attr(&self.line_dir(pin).join("value"), pin, level.as_sysfs())
    }

    fn release(&mut self, pin: Pin) -> Result<()> {
        if self.exported.remove(&pin) {
            if let Err(e) = Self::write_attr(&self.base.join("unexport"), pin, &pin.to_string()) {
                warn!(pin, "Failed to unexport GPIO: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }
}
