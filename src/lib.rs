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

//! MeterGuard - operator CLI for the meterguardd daemon
//!
//! Argument parsing and output formatting live here so they can be tested
//! without a running daemon.

pub mod cli;
pub mod output;

pub use cli::{Cli, Commands, Switch};
