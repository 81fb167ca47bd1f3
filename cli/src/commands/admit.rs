// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `bulwark admit`: dry-run requests through a gate built from the active
//! configuration and print each decision with the security events it raised.
//!
//! State lives only for the duration of the command, so this reproduces how a
//! fresh gate treats a credential; it never touches a running service.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use bulwark_core::application::request_gate::{Admission, RequestGate};
use bulwark_core::domain::errors::GateError;
use bulwark_core::domain::events::SecurityEvent;
use bulwark_core::domain::gate_config::GateConfig;
use bulwark_core::domain::identity::IdentityFingerprint;
use bulwark_core::infrastructure::event_bus::SecurityEventBus;

#[derive(Args, Debug, Clone)]
pub struct AdmitArgs {
    /// HTTP method of the simulated request
    #[arg(long, default_value = "GET")]
    pub method: String,

    /// Request path, e.g. /users/user-001
    #[arg(long)]
    pub path: String,

    /// Send the request this many times
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,

    /// Record this many malformed-payload penalties before the first request
    #[arg(long, default_value_t = 0)]
    pub malformed: u32,

    /// Do not read a credential; simulate a request without one
    #[arg(long)]
    pub anonymous: bool,

    /// Print security events as JSON lines
    #[arg(long)]
    pub events: bool,
}

/// Outcome of one simulated request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Allowed { limit: u32, remaining: u32 },
    Rejected { status: u16, category: &'static str, detail: String },
}

impl Outcome {
    fn from_result(result: Result<Admission, GateError>) -> Self {
        match result {
            Ok(admission) => Self::Allowed {
                limit: admission.limit,
                remaining: admission.remaining,
            },
            Err(err) => Self::Rejected {
                status: err.status_code(),
                category: err.category(),
                detail: err.to_string(),
            },
        }
    }
}

pub fn handle_command(args: AdmitArgs, config_override: Option<PathBuf>) -> Result<()> {
    let credential = if args.anonymous {
        None
    } else {
        let mut input = String::new();
        std::io::stdin()
            .read_to_string(&mut input)
            .context("Failed to read credential from stdin")?;
        Some(input.trim().to_string()).filter(|c| !c.is_empty())
    };

    let config = GateConfig::load_or_default(config_override).context("Failed to load configuration")?;
    let (outcomes, events) = simulate(&config, credential.as_deref(), &args)?;

    for (i, outcome) in outcomes.iter().enumerate() {
        match outcome {
            Outcome::Allowed { limit, remaining } => println!(
                "#{:<3} {} limit={} remaining={}",
                i + 1,
                "allowed".green(),
                limit,
                remaining
            ),
            Outcome::Rejected { status, category, detail } => println!(
                "#{:<3} {} {} {} ({})",
                i + 1,
                "rejected".red(),
                status,
                category,
                detail
            ),
        }
    }

    if args.events {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
    }
    Ok(())
}

/// Build a gate from `config` and run the requested sequence against it.
pub fn simulate(
    config: &GateConfig,
    credential: Option<&str>,
    args: &AdmitArgs,
) -> Result<(Vec<Outcome>, Vec<SecurityEvent>)> {
    tracing::debug!(method = %args.method, path = %args.path, repeat = args.repeat, "Simulating gate admission");
    let bus = SecurityEventBus::new(1024);
    let mut rx = bus.subscribe();
    let gate = RequestGate::from_config(config, Arc::new(bus)).context("Failed to build request gate")?;

    if let Some(credential) = credential {
        let fingerprint = IdentityFingerprint::from_credential(credential);
        for _ in 0..args.malformed {
            // A block is reported by the following admit call.
            let _ = gate.record_malformed(&fingerprint, "cli_simulated");
        }
    }

    let outcomes = (0..args.repeat.max(1))
        .map(|_| Outcome::from_result(gate.admit(credential, &args.method, &args.path)))
        .collect();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    Ok((outcomes, events))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(method: &str, path: &str) -> AdmitArgs {
        AdmitArgs {
            method: method.to_string(),
            path: path.to_string(),
            repeat: 1,
            malformed: 0,
            anonymous: false,
            events: false,
        }
    }

    fn config() -> GateConfig {
        let mut config = GateConfig::default();
        config.spec.token.secret = Some("cli-test-secret".to_string());
        config
    }

    #[test]
    fn test_missing_credential_rejected_with_401() {
        let (outcomes, events) = simulate(&config(), None, &args("GET", "/users")).unwrap();
        assert_eq!(
            outcomes,
            vec![Outcome::Rejected {
                status: 401,
                category: "authentication_failed",
                detail: "missing authentication token".to_string(),
            }]
        );
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "auth.failure");
    }

    #[test]
    fn test_garbage_credential_never_logged() {
        let (outcomes, events) = simulate(&config(), Some("garbage-token"), &args("GET", "/users")).unwrap();
        assert!(matches!(outcomes[0], Outcome::Rejected { status: 401, .. }));
        let expected = IdentityFingerprint::from_credential("garbage-token");
        assert_eq!(events[0].fingerprint(), Some(&expected));
        assert!(!serde_json::to_string(&events[0]).unwrap().contains("garbage-token"));
    }

    #[test]
    fn test_invalid_config_is_an_error() {
        let mut config = config();
        config.kind = "Other".to_string();
        assert!(simulate(&config, None, &args("GET", "/users")).is_err());
    }
}
