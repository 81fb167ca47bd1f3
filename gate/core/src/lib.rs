// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Bulwark Core
//!
//! Three-stage request gate for internal service-to-service APIs.
//!
//! ```text
//! raw credential + (method, path)
//!   └─ TokenValidator::validate      ← 401 family
//!   └─ ScopeAuthorizer::authorize    ← 403 family
//!   └─ RateLimiter::check            ← 429 family
//!         └─ handler (external)
//! ```
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain types, gate services, event sinks and the HTTP adapter

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
