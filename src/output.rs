/*
 * This file is part of MeterGuard.
 *
 * Copyright (C) 2025 MeterGuard contributors
 *
 * MeterGuard is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * MeterGuard is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with MeterGuard. If not, see <https://www.gnu.org/licenses/>.
 */

//! Plain-text rendering of daemon responses

use std::fmt::Write;

use mg_protocol::{
    ActuationReportInfo, CycleInfo, GroupInfo, ReadingInfo, RelayInfo, SafetyInfo, Snapshot,
};

pub fn format_relays(relays: &[RelayInfo], groups: &[GroupInfo]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Relays ({}):", relays.len());
    let _ = writeln!(out, "  {:>3}  {:>4}  {:<20}  {:<16}  {:<5}  {:>7}", "ID", "PIN", "NAME", "GROUP", "STATE", "WATTS");
    for relay in relays {
        let group = if relay.group_id == 0 {
            "-".to_string()
        } else {
            groups
                .iter()
                .find(|g| g.id == relay.group_id)
                .map(|g| g.name.clone())
                .unwrap_or_else(|| relay.group_id.to_string())
        };
        let _ = writeln!(
            out,
            "  {:>3}  {:>4}  {:<20}  {:<16}  {:<5}  {:>7.0}",
            relay.id,
            relay.pin,
            relay.name,
            group,
            if relay.on { "on" } else { "off" },
            relay.estimated_watts
        );
    }
    out
}

pub fn format_groups(groups: &[GroupInfo]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Groups ({}):", groups.len());
    for group in groups {
        let members: Vec<String> = group.members.iter().map(u8::to_string).collect();
        let members = if members.is_empty() { "(empty)".to_string() } else { members.join(", ") };
        let _ = writeln!(out, "  [{}] {}: {}", group.id, group.name, members);
    }
    out
}

/// Oldest first, as the daemon returns them
pub fn format_readings(readings: &[ReadingInfo]) -> String {
    if readings.is_empty() {
        return "No readings recorded\n".to_string();
    }
    let mut out = String::new();
    let _ = writeln!(out, "Readings ({}):", readings.len());
    for reading in readings {
        let _ = writeln!(out, "  {}  {:>10.1} kWh", reading.timestamp, reading.value_kwh);
    }
    out
}

pub fn format_snapshot(snapshot: &Snapshot) -> String {
    let mut out = String::from("MeterGuard Status\n=================\n\n");
    out.push_str(&format_relays(&snapshot.relays, &snapshot.groups));
    out.push('\n');
    out.push_str(&format_groups(&snapshot.groups));
    out.push('\n');
    out.push_str(&format_readings(&snapshot.readings));
    out
}

pub fn format_relay(relay: &RelayInfo) -> String {
    format!(
        "Relay {} ({}) on pin {} is {}\n",
        relay.id,
        relay.name,
        relay.pin,
        if relay.on { "on" } else { "off" }
    )
}

pub fn format_report(report: &ActuationReportInfo) -> String {
    let mut out = format!("Switched {} of {} relays\n", report.affected, report.targeted);
    if !report.failed_pins.is_empty() {
        let pins: Vec<String> = report.failed_pins.iter().map(u32::to_string).collect();
        let _ = writeln!(out, "Warning: pin write failed on {}", pins.join(", "));
    }
    out
}

pub fn format_safety(safety: &SafetyInfo) -> String {
    let mut out = format!("Threshold: {:.1} kWh\n", safety.threshold_kwh);
    match &safety.last_reading {
        Some(reading) => {
            let _ = writeln!(out, "Latest:    {:.1} kWh at {}", reading.value_kwh, reading.timestamp);
        }
        None => out.push_str("Latest:    none\n"),
    }
    let _ = writeln!(out, "Status:    {}", if safety.over_threshold { "OVER THRESHOLD" } else { "normal" });
    out
}

pub fn format_cycle(cycle: &CycleInfo) -> String {
    let mut out = format!("Cycle: {}\n", cycle.outcome);
    if let Some(value) = cycle.value_kwh {
        let _ = writeln!(out, "Value: {:.1} kWh", value);
    }
    if cycle.tripped {
        out.push_str("Safety cutoff: all relays switched off\n");
    }
    out
}
