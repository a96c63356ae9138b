//! Coordination engine
//!
//! The state coordinator, the reading log, the safety policy and the
//! sensing cycle that ties them together.

mod coordinator;
mod readings;
mod safety;
mod sensing;

pub use coordinator::{EmergencyStop, StateCoordinator};
pub use readings::ReadingLog;
pub use safety::{SafetyDecision, SafetyMonitor};
pub use sensing::{extract_digits, CycleOutcome, SensingCycle};
