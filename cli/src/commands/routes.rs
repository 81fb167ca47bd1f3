// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `bulwark routes`: print the route requirement table.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write as _;
use std::path::PathBuf;

use bulwark_core::domain::gate_config::GateConfig;
use bulwark_core::domain::route::RouteTable;

pub fn handle_command(config_override: Option<PathBuf>) -> Result<()> {
    let config = GateConfig::load_or_default(config_override).context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    println!("{}", "Route requirements:".bold());
    print!("{}", render_table(&config.route_table(), config.spec.rate_limit.global_cap));
    Ok(())
}

/// One line per route: method, path, capabilities and effective ceiling.
pub fn render_table(table: &RouteTable, global_cap: u32) -> String {
    let mut out = String::new();
    for (key, requirement) in table.entries() {
        let ceiling = requirement.limit.ceiling().min(global_cap);
        let _ = writeln!(
            out,
            "  {:<6} {:<20} {:<28} {}/{} (ceiling {})",
            key.method,
            key.path,
            requirement.capabilities.to_strings().join(","),
            requirement.limit.base_quota,
            requirement.limit.burst,
            ceiling
        );
    }
    out
}
