//! State coordinator
//!
//! Owns the authoritative relay/group registry together with the actuation
//! gateway. Both live behind one mutex, so a registry change and the pin
//! write that matches it are never observed apart. Readers take published
//! snapshots and never enter that mutex.
//!
//! # Ordering
//!
//! - Single-relay toggles write the pin first and commit the registry
//!   second. If the commit fails the pin is driven back.
//! - Multi-relay operations commit first and then write every pin. Per-pin
//!   failures are counted in the returned [`ActuationReport`].
//! - The emergency cutoff always moves the in-memory registry to all-off and
//!   always attempts every pin, whatever the store says.
//! - After [`StateCoordinator::release`] no operation writes a pin again.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::constants::relays;
use crate::data::{
    validate_name, ActuationReport, GroupId, Pin, Registry, RegistryStore, Relay, RelayId,
};
use crate::error::{MeterGuardError, Result};
use crate::hw::ActuationGateway;

/// Something that can force every relay off
pub trait EmergencyStop: Send + Sync {
    fn emergency_all_off(&self) -> ActuationReport;
}

struct Inner {
    registry: Registry,
    gateway: ActuationGateway,
    store: Box<dyn RegistryStore>,
    released: bool,
}

impl Inner {
    fn ensure_claimed(&self) -> Result<()> {
        if self.released {
            return Err(MeterGuardError::RelaysReleased);
        }
        Ok(())
    }

    /// Write `on` to every listed pin, counting failures
    fn drive(&mut self, targets: &[(RelayId, Pin)], on: bool) -> ActuationReport {
        let mut report = ActuationReport {
            targeted: targets.len(),
            ..ActuationReport::default()
        };
        for (relay, pin) in targets {
            match self.gateway.apply(*pin, on) {
                Ok(()) => report.affected += 1,
                Err(e) => {
                    warn!(relay = *relay, pin = *pin, "Relay write failed: {}", e);
                    report.failed_pins.push(*pin);
                }
            }
        }
        report
    }

    /// Set the logical state of `targets`, commit, then drive the pins
    fn set_many(&mut self, targets: Vec<(RelayId, Pin)>, on: bool) -> Result<ActuationReport> {
        let mut next = self.registry.clone();
        for (relay, _) in &targets {
            next.set_state(*relay, on)?;
        }
        self.store.commit(&next)?;
        self.registry = next;
        Ok(self.drive(&targets, on))
    }

    fn commit(&mut self, next: Registry) -> Result<()> {
        self.store.commit(&next)?;
        self.registry = next;
        Ok(())
    }
}

/// Serializes every relay and group mutation with its physical effect
pub struct StateCoordinator {
    inner: Mutex<Inner>,
    snapshot: RwLock<Arc<Registry>>,
}

impl StateCoordinator {
    /// Load the registry, seeding it from `pins` when the store is empty
    ///
    /// Pins are claimed as outputs but not written; call [`restore`](Self::restore)
    /// to reapply the persisted state.
    pub fn open(
        mut store: Box<dyn RegistryStore>,
        mut gateway: ActuationGateway,
        pins: &[Pin],
    ) -> Result<Self> {
        let registry = match store.load()? {
            Some(registry) if !registry.is_empty() => {
                if registry.pins() != pins {
                    warn!(
                        "Configured pins {:?} differ from provisioned pins {:?}; keeping provisioned mapping",
                        pins,
                        registry.pins()
                    );
                }
                registry
            }
            _ => {
                let registry = Registry::provision(pins)?;
                store.commit(&registry)?;
                info!(
                    "Provisioned {} relays and group '{}'",
                    pins.len(),
                    relays::DEFAULT_GROUP_NAME
                );
                registry
            }
        };

        for relay in registry.relays() {
            if let Err(e) = gateway.prepare(relay.pin) {
                warn!(relay = relay.id, pin = relay.pin, "Could not claim relay pin: {}", e);
            }
        }

        let snapshot = RwLock::new(Arc::new(registry.clone()));
        Ok(Self {
            inner: Mutex::new(Inner { registry, gateway, store, released: false }),
            snapshot,
        })
    }

    fn publish(&self, inner: &Inner) {
        *self.snapshot.write() = Arc::new(inner.registry.clone());
    }

    /// Read-only view, stale by at most the operation in flight
    pub fn snapshot(&self) -> Arc<Registry> {
        Arc::clone(&self.snapshot.read())
    }

    /// Drive every pin to its persisted logical state
    pub fn restore(&self) -> ActuationReport {
        let mut inner = self.inner.lock();
        let mut report = ActuationReport::default();
        if inner.released {
            warn!("Relay pins already released, skipping restore");
            return report;
        }
        let relays: Vec<(RelayId, Pin, bool)> = inner
            .registry
            .relays()
            .map(|r| (r.id, r.pin, r.on))
            .collect();

        for (relay, pin, on) in relays {
            report.targeted += 1;
            match inner.gateway.apply(pin, on) {
                Ok(()) => report.affected += 1,
                Err(e) => {
                    warn!(relay, pin, "Failed to restore relay state: {}", e);
                    report.failed_pins.push(pin);
                }
            }
        }
        info!(
            "Restored {} of {} relays to persisted state",
            report.affected, report.targeted
        );
        report
    }

    /// Flip one relay
    pub fn toggle(&self, relay_id: RelayId) -> Result<Relay> {
        let mut inner = self.inner.lock();
        inner.ensure_claimed()?;
        let current = inner.registry.relay(relay_id)?.clone();
        let target = !current.on;

        inner.gateway.apply(current.pin, target)?;

        let mut next = inner.registry.clone();
        next.set_state(relay_id, target)?;
        if let Err(e) = inner.store.commit(&next) {
            error!(relay = relay_id, "Failed to persist toggle, reverting pin: {}", e);
            if let Err(revert) = inner.gateway.apply(current.pin, current.on) {
                error!(relay = relay_id, pin = current.pin, "Pin revert failed: {}", revert);
            }
            return Err(e);
        }
        inner.registry = next;
        self.publish(&inner);

        info!(relay = relay_id, pin = current.pin, on = target, "Relay toggled");
        inner.registry.relay(relay_id).cloned()
    }

    /// Switch every relay on or off
    pub fn set_global(&self, on: bool) -> Result<ActuationReport> {
        let mut inner = self.inner.lock();
        inner.ensure_claimed()?;
        let targets: Vec<(RelayId, Pin)> =
            inner.registry.relays().map(|r| (r.id, r.pin)).collect();
        let report = inner.set_many(targets, on)?;
        self.publish(&inner);

        info!(on, affected = report.affected, failed = report.failed_pins.len(), "Global switch");
        Ok(report)
    }

    /// Switch every member of a group
    pub fn set_group(&self, group_id: GroupId, on: bool) -> Result<ActuationReport> {
        let mut inner = self.inner.lock();
        inner.ensure_claimed()?;
        if group_id == relays::UNGROUPED {
            return Err(MeterGuardError::GroupNotFound(group_id));
        }
        inner.registry.group(group_id)?;

        let targets: Vec<(RelayId, Pin)> = inner
            .registry
            .relays()
            .filter(|r| r.group_id == group_id)
            .map(|r| (r.id, r.pin))
            .collect();
        if targets.is_empty() {
            debug!(group = group_id, "Group has no members");
            return Ok(ActuationReport::default());
        }

        let report = inner.set_many(targets, on)?;
        self.publish(&inner);

        info!(group = group_id, on, affected = report.affected, "Group switch");
        Ok(report)
    }

    pub fn rename(&self, relay_id: RelayId, name: &str) -> Result<Relay> {
        let name = validate_name(name)?;
        let mut inner = self.inner.lock();

        let mut next = inner.registry.clone();
        next.rename(relay_id, name)?;
        inner.commit(next)?;
        self.publish(&inner);

        debug!(relay = relay_id, "Relay renamed");
        inner.registry.relay(relay_id).cloned()
    }

    /// Create a group and move the listed relays into it
    ///
    /// A relay already in another group leaves it. Unknown relay ids reject
    /// the whole request.
    pub fn create_group(&self, name: &str, relay_ids: &[RelayId]) -> Result<GroupId> {
        let name = validate_name(name)?;
        let mut inner = self.inner.lock();

        for id in relay_ids {
            inner.registry.relay(*id)?;
        }

        let mut next = inner.registry.clone();
        let group_id = next.insert_group(name);
        for id in relay_ids {
            next.assign(*id, group_id)?;
        }
        inner.commit(next)?;
        self.publish(&inner);

        info!(group = group_id, members = relay_ids.len(), "Group created");
        Ok(group_id)
    }

    /// Ungroup every member, then remove the group; returns the member count
    pub fn delete_group(&self, group_id: GroupId) -> Result<usize> {
        let mut inner = self.inner.lock();
        if group_id == relays::UNGROUPED {
            return Err(MeterGuardError::GroupNotFound(group_id));
        }
        inner.registry.group(group_id)?;

        let mut next = inner.registry.clone();
        let detached = next.detach_members(group_id);
        next.remove_group(group_id)?;
        inner.commit(next)?;
        self.publish(&inner);

        info!(group = group_id, detached, "Group deleted");
        Ok(detached)
    }

    /// Unclaim every pin at shutdown
    ///
    /// Later switching operations fail with
    /// [`MeterGuardError::RelaysReleased`] instead of claiming a pin again.
    pub fn release(&self) {
        let mut inner = self.inner.lock();
        if inner.released {
            return;
        }
        inner.released = true;
        let pins = inner.registry.pins();
        for pin in pins {
            inner.gateway.release(pin);
        }
        debug!("Relay pins released");
    }
}

impl EmergencyStop for StateCoordinator {
    fn emergency_all_off(&self) -> ActuationReport {
        let mut inner = self.inner.lock();
        let targets: Vec<(RelayId, Pin)> =
            inner.registry.relays().map(|r| (r.id, r.pin)).collect();

        inner.registry.all_off();
        let registry = inner.registry.clone();
        if let Err(e) = inner.store.commit(&registry) {
            error!("Emergency all-off could not be persisted: {}", e);
        }
        self.publish(&inner);

        if inner.released {
            warn!("Relay pins already released, emergency all-off recorded without pin writes");
            return ActuationReport {
                targeted: targets.len(),
                failed_pins: targets.iter().map(|(_, pin)| *pin).collect(),
                ..ActuationReport::default()
            };
        }
        let report = inner.drive(&targets, false);
        error!(
            affected = report.affected,
            failed = report.failed_pins.len(),
            "Emergency all-off issued"
        );
        report
    }
}
