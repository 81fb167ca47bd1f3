// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bulwark_core::application::request_gate::RequestGate;
use bulwark_core::domain::events::NullEventSink;
use bulwark_core::domain::gate_config::GateConfig;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,

        /// Also resolve the token secret or key and build the gate
        #[arg(long)]
        strict: bool,
    },

    /// Generate a configuration file with default values
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./bulwark.yaml")]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub fn handle_command(command: ConfigCommand, config_override: Option<PathBuf>) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths),
        ConfigCommand::Validate { file, strict } => validate(file.or(config_override), strict),
        ConfigCommand::Generate { output, force } => generate(&output, force),
    }
}

fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  1. --config flag: {}", path.display()),
            None => println!("  1. --config flag: {}", "(not set)".dimmed()),
        }
        println!(
            "  2. BULWARK_CONFIG_PATH: {}",
            std::env::var("BULWARK_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./bulwark.yaml");
        println!("  4. ~/.bulwark/config.yaml");
        println!("  5. /etc/bulwark/config.yaml");
        println!();
    }

    let config = GateConfig::load_or_default(config_override).context("Failed to load configuration")?;

    println!("{}", "Current configuration:".bold());
    println!();
    print!("{}", render_summary(&config));
    Ok(())
}

/// Human-readable summary. Secrets are never printed.
pub fn render_summary(config: &GateConfig) -> String {
    let token = &config.spec.token;
    let limits = &config.spec.rate_limit;
    let mut out = String::new();

    let _ = writeln!(out, "Deployment: {}", config.metadata.name);
    let _ = writeln!(out);
    let _ = writeln!(out, "Token:");
    let _ = writeln!(out, "  Algorithm: {}", token.algorithm);
    let _ = writeln!(out, "  Issuer: {}", token.issuer);
    let _ = writeln!(out, "  Audience: {}", token.audience);
    if token.is_hmac() {
        let source = match token.secret.as_deref() {
            Some(s) if s.starts_with("env:") => s.to_string(),
            Some(_) => "<inline, redacted>".to_string(),
            None => "(missing)".to_string(),
        };
        let _ = writeln!(out, "  Secret: {}", source);
    } else if let Some(path) = &token.public_key_path {
        let _ = writeln!(out, "  Public key: {}", path.display());
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "Rate limit:");
    let _ = writeln!(out, "  Window: {}s", limits.window.as_secs());
    let _ = writeln!(out, "  Global cap: {}", limits.global_cap);
    let _ = writeln!(
        out,
        "  Penalty: x{} per malformed event, floor {}",
        limits.penalty_factor, limits.min_multiplier
    );
    let _ = writeln!(out, "  Block threshold: {}", limits.block_threshold);
    let _ = writeln!(
        out,
        "  Decay: +{} every {}s",
        limits.decay_step,
        limits.decay_interval.as_secs()
    );
    let _ = writeln!(out, "  Max tracked identities: {}", limits.max_tracked_identities);
    let _ = writeln!(out);
    let _ = writeln!(out, "Routes: {}", config.spec.routes.len());
    out
}

fn validate(config_path: Option<PathBuf>, strict: bool) -> Result<()> {
    println!("Validating configuration...");

    let config = GateConfig::load_or_default(config_path).context("Failed to load configuration")?;
    check(&config, strict)?;

    println!("{}", "✓ Configuration is valid".green());
    Ok(())
}

/// Structural validation, plus gate construction when `strict`.
pub fn check(config: &GateConfig, strict: bool) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    if strict {
        RequestGate::from_config(config, Arc::new(NullEventSink)).context("Failed to build request gate")?;
    }
    Ok(())
}

fn generate(output: &Path, force: bool) -> Result<()> {
    write_default(output, force)?;
    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );
    Ok(())
}

pub fn write_default(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", output.display());
    }
    let yaml = GateConfig::default().to_yaml_string()?;
    std::fs::write(output, yaml).with_context(|| format!("Failed to write config to {:?}", output))?;
    Ok(())
}
