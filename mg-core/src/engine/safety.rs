//! Consumption ceiling policy

use tracing::{debug, error};

use crate::data::Reading;
use crate::engine::coordinator::EmergencyStop;

/// What a reading requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyDecision {
    Normal,
    Cutoff,
}

/// Stateless threshold check; every exceeding value trips again
#[derive(Debug, Clone, Copy)]
pub struct SafetyMonitor {
    threshold: f64,
}

impl SafetyMonitor {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Strictly above the threshold trips; equal does not
    pub fn decide(&self, value: f64) -> SafetyDecision {
        if value > self.threshold {
            SafetyDecision::Cutoff
        } else {
            SafetyDecision::Normal
        }
    }

    /// Apply the decision for `value`; returns whether the cutoff fired
    pub fn evaluate(&self, value: f64, stop: &dyn EmergencyStop) -> bool {
        match self.decide(value) {
            SafetyDecision::Normal => {
                debug!(value, threshold = self.threshold, "Reading within limit");
                false
            }
            SafetyDecision::Cutoff => {
                error!(
                    value,
                    threshold = self.threshold,
                    "Reading exceeds consumption limit, switching all relays off"
                );
                stop.emergency_all_off();
                true
            }
        }
    }

    pub fn status(&self, last: Option<&Reading>) -> mg_protocol::SafetyInfo {
        mg_protocol::SafetyInfo {
            threshold_kwh: self.threshold,
            last_reading: last.map(Reading::to_info),
            over_threshold: last
                .map(|r| self.decide(r.value) == SafetyDecision::Cutoff)
                .unwrap_or(false),
        }
    }
}
