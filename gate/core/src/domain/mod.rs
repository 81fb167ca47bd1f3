// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Value objects, error taxonomy and configuration shared by every gate stage.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure types; no I/O beyond config file loading

pub mod identity;
pub mod capability;
pub mod route;
pub mod errors;
pub mod events;
pub mod clock;
pub mod gate_config;
