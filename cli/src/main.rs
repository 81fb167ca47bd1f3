// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Bulwark Operator CLI
//!
//! The `bulwark` binary inspects gate configuration and reproduces gate
//! decisions offline.
//!
//! ## Commands
//!
//! - `bulwark config show|validate|generate` - Configuration management
//! - `bulwark routes` - Print the route requirement table
//! - `bulwark fingerprint` - Fingerprint a credential read from stdin
//! - `bulwark admit --method GET --path /users` - Dry-run one request through the gate

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use bulwark_cli::commands::{self, AdmitArgs, ConfigCommand};

/// Bulwark - request gate for internal service APIs
#[derive(Parser)]
#[command(name = "bulwark")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "BULWARK_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "BULWARK_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Print the route requirement table
    #[command(name = "routes")]
    Routes,

    /// Print the log fingerprint of a credential read from stdin
    #[command(name = "fingerprint")]
    Fingerprint,

    /// Run one request through the configured gate without serving it
    #[command(name = "admit")]
    Admit(AdmitArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_json)?;

    match cli.command {
        Some(Commands::Config { command }) => commands::config::handle_command(command, cli.config),
        Some(Commands::Routes) => commands::routes::handle_command(cli.config),
        Some(Commands::Fingerprint) => commands::fingerprint::handle_command(),
        Some(Commands::Admit(args)) => commands::admit::handle_command(args, cli.config),
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, json: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if json {
        builder.json().init();
    } else {
        builder.with_target(false).compact().init();
    }

    Ok(())
}
