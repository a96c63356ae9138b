//! MeterGuard Core Library
//!
//! Meter sensing and relay safety coordination for a single-board controller.
//!
//! # Features
//!
//! - **Relay Registry**: Relay slots, pin mapping, group membership and logical state
//! - **State Coordinator**: One exclusion domain for every registry change and its pin write
//! - **Sensing Cycle**: Frame capture, digit recognition, reading log and safety cutoff
//! - **Persistence**: Atomic JSON registry and append-only reading log
//! - **Daemon Client**: Control-socket client used by the CLI
//!
//! # Module Structure
//!
//! - `hw/` - Hardware collaborators (GPIO, capture, recognition)
//! - `data/` - Data types, registry, persistence, validation
//! - `engine/` - Coordinator, reading log, safety monitor, sensing cycle
//!
//! # Example
//!
//! ```no_run
//! use mg_core::{ActuationGateway, MemoryRegistryStore, StateCoordinator, SysfsGpio};
//!
//! let gateway = ActuationGateway::new(Box::new(SysfsGpio::new("/sys/class/gpio")), true);
//! let coordinator =
//!     StateCoordinator::open(Box::new(MemoryRegistryStore::new()), gateway, &[17, 27]).unwrap();
//! coordinator.restore();
//! coordinator.toggle(1).unwrap();
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod constants;
pub mod daemon_client;
pub mod error;
pub mod settings;

// Re-export primary types from data/
pub use data::{
    ActuationReport, Group, GroupId, Pin, Reading, Registry, Relay, RelayId,
};

// Re-export persistence from data/
pub use data::{
    write_atomic, JsonRegistryStore, JsonlReadingStore, MemoryReadingStore,
    MemoryRegistryStore, ReadingStore, RegistryStore,
};

// Re-export validation functions from data/
pub use data::{validate_name, validate_pin, validate_reading_value};

// Re-export error types
pub use error::{error_kind, MeterGuardError, Result};

// Re-export engine types
pub use engine::{
    extract_digits, CycleOutcome, EmergencyStop, ReadingLog, SafetyDecision, SafetyMonitor,
    SensingCycle, StateCoordinator,
};

// Re-export hardware collaborators from hw/
pub use hw::{
    ActuationGateway, Actuator, CommandFrameSource, DigitReader, Frame, FrameSource, Level,
    SysfsGpio, TesseractReader,
};

// Re-export settings
pub use settings::{
    load_settings, save_settings, DaemonSettings, RelaySettings, SafetySettings,
    SensingSettings, Settings, StorageSettings,
};

// Re-export daemon client
pub use daemon_client::{is_daemon_available, ping_daemon, DaemonClient};

/// Build a snapshot DTO from a registry and the newest readings
pub fn snapshot_info(registry: &Registry, readings: &[Reading]) -> mg_protocol::Snapshot {
    mg_protocol::Snapshot {
        readings: readings.iter().map(Reading::to_info).collect(),
        relays: registry.relays().map(Relay::to_info).collect(),
        groups: registry.to_group_infos(),
    }
}
