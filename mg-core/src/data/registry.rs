//! Relay and group registry
//!
//! Plain data: the registry never touches hardware or disk. The
//! [`StateCoordinator`](crate::engine::StateCoordinator) owns the
//! authoritative copy and pairs every state change with the matching pin write.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::constants::{relays, storage};
use crate::data::types::{Group, GroupId, Pin, Relay, RelayId};
use crate::error::{MeterGuardError, Result};

/// Relays keyed by slot and groups keyed by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub version: u32,
    relays: BTreeMap<RelayId, Relay>,
    groups: BTreeMap<GroupId, Group>,
    /// Group ids are never reused
    next_group_id: GroupId,
}

impl Default for Registry {
    fn default() -> Self {
        Self {
            version: storage::REGISTRY_VERSION,
            relays: BTreeMap::new(),
            groups: BTreeMap::new(),
            next_group_id: relays::DEFAULT_GROUP_ID,
        }
    }
}

impl Registry {
    /// Seed one relay per pin (slot `i + 1` gets `pins[i]`) plus the default group
    pub fn provision(pins: &[Pin]) -> Result<Self> {
        if pins.len() > relays::MAX_RELAYS {
            return Err(MeterGuardError::invalid_config(
                "relays.pins",
                format!("at most {} relays are supported", relays::MAX_RELAYS),
            ));
        }

        let mut registry = Self::default();
        for (index, pin) in pins.iter().enumerate() {
            let id = (index + 1) as RelayId;
            registry.relays.insert(id, Relay::provisioned(id, *pin));
        }
        registry.insert_group(relays::DEFAULT_GROUP_NAME.to_string());
        registry.validate()?;
        Ok(registry)
    }

    /// Check structural invariants after loading from disk
    pub fn validate(&self) -> Result<()> {
        let mut pins = HashSet::new();
        for (id, relay) in &self.relays {
            if *id != relay.id || *id == 0 {
                return Err(MeterGuardError::store(format!(
                    "relay entry {} has mismatched id {}",
                    id, relay.id
                )));
            }
            if !pins.insert(relay.pin) {
                return Err(MeterGuardError::store(format!(
                    "pin {} is mapped to more than one relay",
                    relay.pin
                )));
            }
            if relay.is_grouped() && !self.groups.contains_key(&relay.group_id) {
                return Err(MeterGuardError::store(format!(
                    "relay {} references missing group {}",
                    relay.id, relay.group_id
                )));
            }
        }
        for (id, group) in &self.groups {
            if *id != group.id || *id == relays::UNGROUPED {
                return Err(MeterGuardError::store(format!(
                    "group entry {} has mismatched id {}",
                    id, group.id
                )));
            }
            if *id >= self.next_group_id {
                return Err(MeterGuardError::store(format!(
                    "group {} is not below the next allocated id {}",
                    id, self.next_group_id
                )));
            }
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub fn relay(&self, id: RelayId) -> Result<&Relay> {
        self.relays.get(&id).ok_or(MeterGuardError::RelayNotFound(id))
    }

    fn relay_mut(&mut self, id: RelayId) -> Result<&mut Relay> {
        self.relays.get_mut(&id).ok_or(MeterGuardError::RelayNotFound(id))
    }

    /// Relays in slot order
    pub fn relays(&self) -> impl Iterator<Item = &Relay> {
        self.relays.values()
    }

    pub fn group(&self, id: GroupId) -> Result<&Group> {
        self.groups.get(&id).ok_or(MeterGuardError::GroupNotFound(id))
    }

    /// Groups in id order
    pub fn groups(&self) -> impl Iterator<Item = &Group> {
        self.groups.values()
    }

    /// Relay ids currently assigned to `group_id`
    pub fn members(&self, group_id: GroupId) -> Vec<RelayId> {
        self.relays
            .values()
            .filter(|r| r.group_id == group_id)
            .map(|r| r.id)
            .collect()
    }

    /// Pins in slot order, for comparing against the configured mapping
    pub fn pins(&self) -> Vec<Pin> {
        self.relays.values().map(|r| r.pin).collect()
    }

    /// Mark every relay off
    pub fn all_off(&mut self) {
        for relay in self.relays.values_mut() {
            relay.on = false;
        }
    }

    pub fn set_state(&mut self, id: RelayId, on: bool) -> Result<()> {
        self.relay_mut(id)?.on = on;
        Ok(())
    }

    pub fn rename(&mut self, id: RelayId, name: String) -> Result<()> {
        self.relay_mut(id)?.name = name;
        Ok(())
    }

    /// Create a group and return its freshly allocated id
    pub fn insert_group(&mut self, name: String) -> GroupId {
        let id = self.next_group_id;
        self.next_group_id += 1;
        self.groups.insert(id, Group { id, name });
        id
    }

    /// Point a relay at a group, replacing any earlier membership
    pub fn assign(&mut self, relay_id: RelayId, group_id: GroupId) -> Result<()> {
        if group_id != relays::UNGROUPED {
            self.group(group_id)?;
        }
        self.relay_mut(relay_id)?.group_id = group_id;
        Ok(())
    }

    /// Ungroup every member of `group_id`; returns how many were detached
    pub fn detach_members(&mut self, group_id: GroupId) -> usize {
        let mut detached = 0;
        for relay in self.relays.values_mut().filter(|r| r.group_id == group_id) {
            relay.group_id = relays::UNGROUPED;
            detached += 1;
        }
        detached
    }

    /// Remove a group record; members must already be detached
    pub fn remove_group(&mut self, group_id: GroupId) -> Result<Group> {
        if self.relays.values().any(|r| r.group_id == group_id) {
            return Err(MeterGuardError::invalid_command(format!(
                "group {} still has members",
                group_id
            )));
        }
        self.groups
            .remove(&group_id)
            .ok_or(MeterGuardError::GroupNotFound(group_id))
    }

    pub fn to_group_infos(&self) -> Vec<mg_protocol::GroupInfo> {
        self.groups
            .values()
            .map(|g| mg_protocol::GroupInfo {
                id: g.id,
                name: g.name.clone(),
                members: self.members(g.id),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::provision(&[17, 27, 22, 23]).unwrap()
    }

    #[test]
    fn test_provision_layout() {
        let reg = registry();
        let ids: Vec<_> = reg.relays().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(reg.relay(2).unwrap().pin, 27);
        assert_eq!(reg.group(1).unwrap().name, "General");
        assert!(reg.relays().all(|r| !r.on && r.group_id == 0));
    }

    #[test]
    fn test_provision_rejects_duplicate_pins() {
        let err = Registry::provision(&[17, 17]).unwrap_err();
        assert!(err.to_string().contains("pin 17"));
    }

    #[test]
    fn test_all_off_clears_every_relay() {
        let mut registry = Registry::provision(&[17, 27, 22]).unwrap();
        registry.set_state(1, true).unwrap();
        registry.set_state(3, true).unwrap();

        registry.all_off();
        assert!(registry.relays().all(|r| !r.on));
        assert_eq!(registry.relays().count(), 3);
    }

    #[test]
    fn test_unknown_relay_is_not_found() {
        let mut reg = registry();
        assert!(matches!(reg.set_state(9, true), Err(MeterGuardError::RelayNotFound(9))));
        assert!(matches!(reg.relay(0), Err(MeterGuardError::RelayNotFound(0))));
    }

    #[test]
    fn test_group_ids_are_not_reused() {
        let mut reg = registry();
        let a = reg.insert_group("A".into());
        reg.remove_group(a).unwrap();
        let b = reg.insert_group("B".into());
        assert_eq!(a, 2);
        assert_eq!(b, 3);
    }

    #[test]
    fn test_assign_last_wins() {
        let mut reg = registry();
        let a = reg.insert_group("A".into());
        let b = reg.insert_group("B".into());
        reg.assign(1, a).unwrap();
        reg.assign(1, b).unwrap();
        assert_eq!(reg.relay(1).unwrap().group_id, b);
        assert!(reg.members(a).is_empty());
        assert_eq!(reg.members(b), vec![1]);
    }

    #[test]
    fn test_assign_to_missing_group_fails() {
        let mut reg = registry();
        assert!(matches!(reg.assign(1, 42), Err(MeterGuardError::GroupNotFound(42))));
        assert_eq!(reg.relay(1).unwrap().group_id, 0);
    }

    #[test]
    fn test_remove_group_requires_detach() {
        let mut reg = registry();
        let g = reg.insert_group("Kitchen".into());
        reg.assign(2, g).unwrap();
        reg.assign(3, g).unwrap();
        assert!(reg.remove_group(g).is_err());

        assert_eq!(reg.detach_members(g), 2);
        reg.remove_group(g).unwrap();
        assert!(reg.group(g).is_err());
        assert_eq!(reg.relays().count(), 4);
    }

    #[test]
    fn test_validate_catches_dangling_group() {
        let mut reg = registry();
        let g = reg.insert_group("Kitchen".into());
        reg.assign(1, g).unwrap();
        reg.groups.remove(&g);
        assert!(reg.validate().is_err());
    }

    #[test]
    fn test_serde_roundtrip_keeps_counter() {
        let mut reg = registry();
        reg.insert_group("Lab".into());
        let json = serde_json::to_string(&reg).unwrap();
        let back: Registry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, reg);
        back.validate().unwrap();
    }
}
