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

//! Command Line Interface

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use mg_protocol::Request;

#[derive(Parser, Debug)]
#[command(name = "meterguard")]
#[command(version)]
#[command(about = "MeterGuard - meter sensing and relay safety control")]
#[command(long_about = "MeterGuard - meter sensing and relay safety control

Talks to the meterguardd daemon over its Unix socket.

EXAMPLES:
    meterguard status                  Relays, groups and recent readings
    meterguard toggle 3                Flip relay 3
    meterguard rename 3 Heater         Rename relay 3
    meterguard all off                 Switch every relay off
    meterguard group-create Kitchen 1 2
    meterguard group 2 on              Switch every relay in group 2 on
    meterguard sense                   Run a sensing cycle now
    meterguard safety                  Threshold and latest reading

FILES:
    /etc/meterguard/config.json        Daemon settings (socket path is read from here)")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Daemon socket path
    #[arg(short, long, global = true)]
    pub socket: Option<PathBuf>,

    /// Print raw JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Show relays, groups and recent readings
    Status,
    /// Show recent meter readings
    Readings {
        /// Only the newest N readings
        #[arg(short = 'n', long)]
        limit: Option<usize>,
    },
    /// Flip one relay
    Toggle { relay_id: u8 },
    /// Rename one relay
    Rename { relay_id: u8, name: String },
    /// Switch every relay on or off
    All { state: Switch },
    /// Switch every relay in a group on or off
    Group { group_id: u32, state: Switch },
    /// Create a group and move relays into it
    GroupCreate {
        name: String,
        #[arg(required = true)]
        relay_ids: Vec<u8>,
    },
    /// Delete a group; its relays become ungrouped
    GroupDelete { group_id: u32 },
    /// Run a sensing cycle immediately
    Sense,
    /// Show the safety threshold and latest reading
    Safety,
    /// Check that the daemon answers
    Ping,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Switch {
    On,
    Off,
}

impl Switch {
    pub fn is_on(self) -> bool {
        self == Switch::On
    }
}

impl Commands {
    /// The daemon request this command sends
    pub fn to_request(&self) -> Request {
        match self {
            Commands::Status | Commands::Readings { .. } => Request::GetSnapshot,
            Commands::Toggle { relay_id } => Request::Toggle { relay_id: *relay_id },
            Commands::Rename { relay_id, name } => Request::Rename {
                relay_id: *relay_id,
                name: name.clone(),
            },
            Commands::All { state } => Request::SetGlobal { on: state.is_on() },
            Commands::Group { group_id, state } => Request::SetGroup {
                group_id: *group_id,
                on: state.is_on(),
            },
            Commands::GroupCreate { name, relay_ids } => Request::CreateGroup {
                name: name.clone(),
                relay_ids: relay_ids.clone(),
            },
            Commands::GroupDelete { group_id } => Request::DeleteGroup { group_id: *group_id },
            Commands::Sense => Request::RunSensingCycle,
            Commands::Safety => Request::SafetyStatus,
            Commands::Ping => Request::Ping,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("meterguard").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = parse(&["status", "--json", "--socket", "/tmp/mg.sock"]);
        assert!(cli.json);
        assert_eq!(cli.socket, Some(PathBuf::from("/tmp/mg.sock")));
        assert_eq!(cli.command, Commands::Status);
    }

    #[test]
    fn test_switch_values() {
        let cli = parse(&["group", "2", "off"]);
        assert_eq!(cli.command.to_request(), Request::SetGroup { group_id: 2, on: false });
        assert!(Cli::try_parse_from(["meterguard", "all", "maybe"]).is_err());
    }

    #[test]
    fn test_group_create_needs_members() {
        assert!(Cli::try_parse_from(["meterguard", "group-create", "Kitchen"]).is_err());
        let cli = parse(&["group-create", "Kitchen", "1", "4"]);
        assert_eq!(
            cli.command.to_request(),
            Request::CreateGroup { name: "Kitchen".into(), relay_ids: vec![1, 4] }
        );
    }

    #[test]
    fn test_readings_uses_snapshot() {
        let cli = parse(&["readings", "-n", "5"]);
        assert_eq!(cli.command, Commands::Readings { limit: Some(5) });
        assert_eq!(cli.command.to_request(), Request::GetSnapshot);
    }
}
