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

use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::Parser;

use meterguard::output;
use meterguard::{Cli, Commands};
use mg_core::constants::paths;
use mg_core::{DaemonClient, MeterGuardError};
use mg_protocol::ResponseData;

/// Socket from `--socket`, else from the daemon settings file, else the default
fn socket_path(cli: &Cli) -> PathBuf {
    if let Some(path) = &cli.socket {
        return path.clone();
    }
    mg_core::load_settings(&paths::config_path())
        .map(|s| s.daemon.socket_path)
        .unwrap_or_else(|_| PathBuf::from(paths::SOCKET_PATH))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn missing(what: &str) -> anyhow::Error {
    anyhow!("Daemon response did not include {}", what)
}

fn render(command: &Commands, data: ResponseData, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Status => {
            let snapshot = data.snapshot.ok_or_else(|| missing("a snapshot"))?;
            if json {
                return print_json(&snapshot);
            }
            print!("{}", output::format_snapshot(&snapshot));
        }
        Commands::Readings { limit } => {
            let snapshot = data.snapshot.ok_or_else(|| missing("a snapshot"))?;
            let readings = &snapshot.readings;
            let skip = limit.map_or(0, |n| readings.len().saturating_sub(n));
            let readings = &readings[skip..];
            if json {
                return print_json(readings);
            }
            print!("{}", output::format_readings(readings));
        }
        Commands::Toggle { .. } | Commands::Rename { .. } => {
            let relay = data.relay.ok_or_else(|| missing("a relay"))?;
            if json {
                return print_json(&relay);
            }
            print!("{}", output::format_relay(&relay));
        }
        Commands::All { .. } | Commands::Group { .. } => {
            let report = data.report.ok_or_else(|| missing("a report"))?;
            if json {
                return print_json(&report);
            }
            print!("{}", output::format_report(&report));
        }
        Commands::GroupCreate { name, .. } => {
            let id = data.group_id.ok_or_else(|| missing("a group id"))?;
            if json {
                return print_json(&serde_json::json!({ "group_id": id }));
            }
            println!("Created group '{}' with ID: {}", name, id);
        }
        Commands::GroupDelete { group_id } => {
            let detached = data.value.unwrap_or_else(|| "0".to_string());
            if json {
                return print_json(&serde_json::json!({ "group_id": group_id, "detached": detached }));
            }
            println!("Deleted group {} ({} relays now ungrouped)", group_id, detached);
        }
        Commands::Sense => {
            let cycle = data.cycle.ok_or_else(|| missing("a cycle result"))?;
            if json {
                return print_json(&cycle);
            }
            print!("{}", output::format_cycle(&cycle));
        }
        Commands::Safety => {
            let safety = data.safety.ok_or_else(|| missing("a safety status"))?;
            if json {
                return print_json(&safety);
            }
            print!("{}", output::format_safety(&safety));
        }
        Commands::Ping => {
            println!("{}", data.value.unwrap_or_else(|| "pong".to_string()));
        }
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let socket = socket_path(&cli);

    let mut client = match DaemonClient::connect(&socket) {
        Ok(client) => client,
        Err(MeterGuardError::DaemonNotAvailable) => {
            eprintln!("Error: meterguardd is not running (no socket at {})", socket.display());
            eprintln!("Start it with: sudo systemctl start meterguardd");
            std::process::exit(2);
        }
        Err(e) => return Err(e).context("connecting to meterguardd"),
    };

    let data = client
        .call(cli.command.to_request())
        .with_context(|| format!("{} failed", cli.command.to_request().type_name()))?;

    render(&cli.command, data, cli.json)
}
