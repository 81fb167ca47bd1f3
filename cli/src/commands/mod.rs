// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the bulwark CLI

pub mod admit;
pub mod config;
pub mod fingerprint;
pub mod routes;

pub use self::admit::AdmitArgs;
pub use self::config::ConfigCommand;
