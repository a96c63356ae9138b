//! Daemon settings
//!
//! Stored as JSON in /etc/meterguard/config.json (see
//! [`paths::config_path`](crate::constants::paths::config_path)). Every field
//! has a default, so a partial or missing file is valid.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::constants::{paths, relays, safety, sensing, storage};
use crate::data::{validate_pin, write_atomic, Pin};
use crate::error::{MeterGuardError, Result};

/// Complete daemon configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub sensing: SensingSettings,

    #[serde(default)]
    pub safety: SafetySettings,

    #[serde(default)]
    pub relays: RelaySettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub daemon: DaemonSettings,
}

/// Frame capture and recognition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensingSettings {
    /// Seconds between scheduled cycles
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    /// Restrict the reader to digits
    #[serde(default = "default_true")]
    pub digits_only: bool,

    #[serde(default = "default_capture_command")]
    pub capture_command: String,

    #[serde(default = "default_capture_device")]
    pub capture_device: String,

    #[serde(default = "default_frame_width")]
    pub frame_width: u32,

    #[serde(default = "default_frame_height")]
    pub frame_height: u32,

    #[serde(default = "default_tesseract_command")]
    pub tesseract_command: String,
}

/// Consumption cutoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetySettings {
    /// Readings strictly above this switch every relay off (kWh)
    #[serde(default = "default_threshold")]
    pub threshold_kwh: f64,
}

/// Relay bank wiring
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelaySettings {
    /// GPIO line per relay slot, slot 1 first
    #[serde(default = "default_pins")]
    pub pins: Vec<Pin>,

    /// Board energises a relay on a low input
    #[serde(default = "default_true")]
    pub active_low: bool,

    #[serde(default = "default_gpio_base")]
    pub gpio_base: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Readings included in a snapshot
    #[serde(default = "default_snapshot_readings")]
    pub snapshot_readings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonSettings {
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,
}

fn default_true() -> bool { true }
fn default_interval() -> u64 { sensing::DEFAULT_INTERVAL_SECS }
fn default_capture_command() -> String { sensing::DEFAULT_CAPTURE_COMMAND.to_string() }
fn default_capture_device() -> String { sensing::DEFAULT_CAPTURE_DEVICE.to_string() }
fn default_frame_width() -> u32 { sensing::DEFAULT_FRAME_WIDTH }
fn default_frame_height() -> u32 { sensing::DEFAULT_FRAME_HEIGHT }
fn default_tesseract_command() -> String { sensing::DEFAULT_TESSERACT_COMMAND.to_string() }
fn default_threshold() -> f64 { safety::DEFAULT_THRESHOLD_KWH }
fn default_pins() -> Vec<Pin> { relays::DEFAULT_PINS.to_vec() }
fn default_gpio_base() -> PathBuf { PathBuf::from(paths::GPIO_BASE) }
fn default_data_dir() -> PathBuf { PathBuf::from(paths::DATA_DIR) }
fn default_snapshot_readings() -> usize { storage::DEFAULT_SNAPSHOT_READINGS }
fn default_socket_path() -> PathBuf { PathBuf::from(paths::SOCKET_PATH) }

impl Default for SensingSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            digits_only: true,
            capture_command: default_capture_command(),
            capture_device: default_capture_device(),
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            tesseract_command: default_tesseract_command(),
        }
    }
}

impl Default for SafetySettings {
    fn default() -> Self {
        Self { threshold_kwh: default_threshold() }
    }
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            pins: default_pins(),
            active_low: true,
            gpio_base: default_gpio_base(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_readings: default_snapshot_readings(),
        }
    }
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self { socket_path: default_socket_path() }
    }
}

impl Settings {
    /// Check every field; the first problem found is returned
    pub fn validate(&self) -> Result<()> {
        let s = &self.sensing;
        if !(sensing::MIN_INTERVAL_SECS..=sensing::MAX_INTERVAL_SECS).contains(&s.interval_secs) {
            return Err(MeterGuardError::invalid_config(
                "sensing.interval_secs",
                format!(
                    "must be between {} and {}",
                    sensing::MIN_INTERVAL_SECS,
                    sensing::MAX_INTERVAL_SECS
                ),
            ));
        }
        if s.frame_width == 0 || s.frame_height == 0 {
            return Err(MeterGuardError::invalid_config("sensing.frame_width", "frame size must be non-zero"));
        }
        for (field, value) in [
            ("sensing.capture_command", &s.capture_command),
            ("sensing.capture_device", &s.capture_device),
            ("sensing.tesseract_command", &s.tesseract_command),
        ] {
            if value.trim().is_empty() {
                return Err(MeterGuardError::invalid_config(field, "cannot be empty"));
            }
        }

        let threshold = self.safety.threshold_kwh;
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(MeterGuardError::invalid_config(
                "safety.threshold_kwh",
                "must be a positive number",
            ));
        }

        let pins = &self.relays.pins;
        if pins.is_empty() {
            return Err(MeterGuardError::invalid_config("relays.pins", "at least one relay is required"));
        }
        if pins.len() > relays::MAX_RELAYS {
            return Err(MeterGuardError::invalid_config(
                "relays.pins",
                format!("at most {} relays are supported", relays::MAX_RELAYS),
            ));
        }
        let mut seen = HashSet::new();
        for pin in pins {
            validate_pin(*pin)?;
            if !seen.insert(*pin) {
                return Err(MeterGuardError::invalid_config(
                    "relays.pins",
                    format!("pin {} listed twice", pin),
                ));
            }
        }

        let window = self.storage.snapshot_readings;
        if window == 0 || window > storage::MAX_SNAPSHOT_READINGS {
            return Err(MeterGuardError::invalid_config(
                "storage.snapshot_readings",
                format!("must be between 1 and {}", storage::MAX_SNAPSHOT_READINGS),
            ));
        }

        if !self.daemon.socket_path.is_absolute() {
            return Err(MeterGuardError::invalid_config("daemon.socket_path", "must be an absolute path"));
        }

        Ok(())
    }

    pub fn registry_path(&self) -> PathBuf {
        self.storage.data_dir.join(paths::REGISTRY_FILE)
    }

    pub fn readings_path(&self) -> PathBuf {
        self.storage.data_dir.join(paths::READINGS_FILE)
    }

    pub fn frame_path(&self) -> PathBuf {
        self.storage.data_dir.join(paths::FRAME_FILE)
    }
}

/// Load and validate settings; a missing file yields defaults
pub fn load_settings(path: &Path) -> Result<Settings> {
    let settings = if path.exists() {
        let content = fs::read_to_string(path).map_err(|e| {
            MeterGuardError::config(format!("Failed to read settings file {:?}: {}", path, e))
        })?;
        let settings: Settings = serde_json::from_str(&content).map_err(|e| {
            MeterGuardError::config(format!("Failed to parse settings JSON: {}", e))
        })?;
        debug!("Loaded settings from {:?}", path);
        settings
    } else {
        info!("No settings at {:?}, using defaults", path);
        Settings::default()
    };

    settings.validate()?;
    Ok(settings)
}

pub fn save_settings(path: &Path, settings: &Settings) -> Result<()> {
    settings.validate()?;
    let json = serde_json::to_vec_pretty(settings)?;
    write_atomic(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_settings(&dir.path().join("config.json")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.sensing.interval_secs, 60);
        assert_eq!(settings.safety.threshold_kwh, 5000.0);
        assert_eq!(settings.relays.pins, vec![17, 27, 22, 23, 24, 25, 5, 6]);
        assert!(settings.relays.active_low);
        assert_eq!(settings.storage.snapshot_readings, 20);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"safety":{"threshold_kwh":1200.5},"relays":{"pins":[5,6]}}"#).unwrap();

        let settings = load_settings(&path).unwrap();
        assert_eq!(settings.safety.threshold_kwh, 1200.5);
        assert_eq!(settings.relays.pins, vec![5, 6]);
        assert!(settings.relays.active_low);
        assert_eq!(settings.sensing.tesseract_command, "tesseract");
    }

    #[test]
    fn test_validate_reports_field() {
        let mut settings = Settings::default();
        settings.sensing.interval_secs = 1;
        match settings.validate() {
            Err(MeterGuardError::InvalidConfig { field, .. }) => {
                assert_eq!(field, "sensing.interval_secs")
            }
            other => panic!("unexpected: {other:?}"),
        }

        let mut settings = Settings::default();
        settings.relays.pins = vec![17, 17];
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.safety.threshold_kwh = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.relays.pins.clear();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ nope").unwrap();
        assert!(matches!(load_settings(&path), Err(MeterGuardError::Config(_))));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc").join("config.json");
        let mut settings = Settings::default();
        settings.storage.data_dir = dir.path().join("data");
        settings.sensing.digits_only = false;

        save_settings(&path, &settings).unwrap();
        assert_eq!(load_settings(&path).unwrap(), settings);
        assert_eq!(settings.registry_path(), dir.path().join("data").join("registry.json"));
    }
}
