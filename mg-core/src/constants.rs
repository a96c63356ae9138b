//! Constants and configuration values for MeterGuard
//!
//! Centralizes all magic numbers, paths, and configuration defaults.
//! Never use magic numbers in other files - add them here first.

use std::time::Duration;

/// System paths
pub mod paths {
    use std::path::PathBuf;

    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/meterguard";

    /// Main configuration file inside CONFIG_DIR
    pub const CONFIG_FILE: &str = "config.json";

    /// Environment variable overriding the configuration file location
    pub const CONFIG_ENV: &str = "METERGUARD_CONFIG";

    /// Persistent state directory (registry, reading log, captured frames)
    pub const DATA_DIR: &str = "/var/lib/meterguard";

    /// Relay/group registry document
    pub const REGISTRY_FILE: &str = "registry.json";

    /// Append-only reading log (one JSON object per line)
    pub const READINGS_FILE: &str = "readings.jsonl";

    /// Most recent captured meter frame
    pub const FRAME_FILE: &str = "frame.jpg";

    /// Control socket
    pub const SOCKET_PATH: &str = "/run/meterguard.sock";

    /// Linux sysfs GPIO class directory
    pub const GPIO_BASE: &str = "/sys/class/gpio";

    /// Resolve the configuration file, honouring METERGUARD_CONFIG
    pub fn config_path() -> PathBuf {
        match std::env::var(CONFIG_ENV) {
            Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
            _ => PathBuf::from(CONFIG_DIR).join(CONFIG_FILE),
        }
    }
}

/// Relay bank defaults
pub mod relays {
    /// BCM pins of the stock 8-channel board, slot 1 first
    pub const DEFAULT_PINS: [u32; 8] = [17, 27, 22, 23, 24, 25, 5, 6];

    /// Estimated load attached to a freshly provisioned relay (watts)
    pub const DEFAULT_ESTIMATED_WATTS: f64 = 100.0;

    /// Maximum relays a registry may hold (slot ids are u8)
    pub const MAX_RELAYS: usize = 32;

    /// Highest GPIO number accepted in the pin map
    pub const MAX_PIN: u32 = 1023;

    /// Group created alongside the default relays
    pub const DEFAULT_GROUP_ID: u32 = 1;
    pub const DEFAULT_GROUP_NAME: &str = "General";

    /// Group id meaning "not in any group"
    pub const UNGROUPED: u32 = 0;

    /// Label given to a provisioned relay slot
    pub fn default_name(slot: u8) -> String {
        format!("Relay {}", slot)
    }
}

/// Sensing cycle defaults
pub mod sensing {
    /// Seconds between scheduled cycles
    pub const DEFAULT_INTERVAL_SECS: u64 = 60;

    /// Shortest interval accepted (the camera needs time to settle)
    pub const MIN_INTERVAL_SECS: u64 = 5;

    /// Longest interval accepted (one day)
    pub const MAX_INTERVAL_SECS: u64 = 86_400;

    /// Low resolution is enough for seven-segment digits and keeps OCR fast
    pub const DEFAULT_FRAME_WIDTH: u32 = 640;
    pub const DEFAULT_FRAME_HEIGHT: u32 = 480;

    pub const DEFAULT_CAPTURE_COMMAND: &str = "fswebcam";
    pub const DEFAULT_CAPTURE_DEVICE: &str = "/dev/video0";
    pub const DEFAULT_TESSERACT_COMMAND: &str = "tesseract";

    /// LSTM + legacy engine
    pub const TESSERACT_OEM: &str = "3";

    /// Assume a single uniform block of text
    pub const TESSERACT_PSM: &str = "6";

    /// Tesseract config file restricting output to digits
    pub const TESSERACT_DIGITS_CONFIG: &str = "digits";
}

/// Safety cutoff defaults
pub mod safety {
    /// Readings above this switch every relay off (kWh)
    pub const DEFAULT_THRESHOLD_KWH: f64 = 5000.0;
}

/// Storage defaults
pub mod storage {
    /// Readings returned with a snapshot
    pub const DEFAULT_SNAPSHOT_READINGS: usize = 20;

    /// Upper bound for the snapshot window
    pub const MAX_SNAPSHOT_READINGS: usize = 1000;

    /// Registry document schema version
    pub const REGISTRY_VERSION: u32 = 1;
}

/// Timing values
pub mod timing {
    use super::Duration;

    /// Time for udev to fix permissions on a freshly exported GPIO
    pub const GPIO_EXPORT_SETTLE: Duration = Duration::from_millis(100);

    /// Client socket read/write timeout (a sensing cycle can take a few seconds)
    pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(15);
}
