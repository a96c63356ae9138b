//! Core data types for relays, groups and meter readings

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::relays;

/// Physical relay slot (1..=N)
pub type RelayId = u8;

/// Group identifier; 0 means ungrouped
pub type GroupId = u32;

/// GPIO line number driving a relay
pub type Pin = u32;

/// A relay channel on the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relay {
    pub id: RelayId,
    /// Fixed at provisioning
    pub pin: Pin,
    pub name: String,
    #[serde(default)]
    pub group_id: GroupId,
    /// Logical state; the gateway decides the electrical level
    #[serde(default)]
    pub on: bool,
    /// Estimated load of the attached appliance in watts
    #[serde(default = "default_estimated_watts")]
    pub estimated_watts: f64,
}

fn default_estimated_watts() -> f64 {
    relays::DEFAULT_ESTIMATED_WATTS
}

impl Relay {
    /// A freshly provisioned relay: off, ungrouped, default label
    pub fn provisioned(id: RelayId, pin: Pin) -> Self {
        Self {
            id,
            pin,
            name: relays::default_name(id),
            group_id: relays::UNGROUPED,
            on: false,
            estimated_watts: relays::DEFAULT_ESTIMATED_WATTS,
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.group_id != relays::UNGROUPED
    }

    pub fn to_info(&self) -> mg_protocol::RelayInfo {
        mg_protocol::RelayInfo {
            id: self.id,
            pin: self.pin,
            name: self.name.clone(),
            group_id: self.group_id,
            on: self.on,
            estimated_watts: self.estimated_watts,
        }
    }
}

/// Named collection of relays
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
}

/// One sensed meter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Meter value in kWh
    pub value: f64,
}

impl Reading {
    pub fn to_info(&self) -> mg_protocol::ReadingInfo {
        mg_protocol::ReadingInfo {
            timestamp: self.timestamp.to_rfc3339(),
            value_kwh: self.value,
        }
    }
}

/// Result of a multi-pin actuation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActuationReport {
    /// Relays whose logical state was set
    pub targeted: usize,
    /// Pins that accepted the write
    pub affected: usize,
    /// Pins whose write failed
    pub failed_pins: Vec<Pin>,
}

impl ActuationReport {
    pub fn is_clean(&self) -> bool {
        self.failed_pins.is_empty()
    }

    pub fn to_info(&self) -> mg_protocol::ActuationReportInfo {
        mg_protocol::ActuationReportInfo {
            targeted: self.targeted,
            affected: self.affected,
            failed_pins: self.failed_pins.clone(),
        }
    }
}
