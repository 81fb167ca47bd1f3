// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Route Requirement Table
//!
//! Static mapping `(method, path) → (required capabilities, rate-limit base/burst)`,
//! built once at startup from [`crate::domain::gate_config::GateConfig`].
//!
//! Lookup tries the exact path first, then the path's first segment, so
//! `/users/user-001` resolves to the `/users` entry. A route with no entry has
//! no requirement to check against and the gate refuses it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::capability::{Capability, CapabilitySet};

/// HTTP method + path prefix identifying a gated operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub method: String,
    pub path: String,
}

impl RouteKey {
    /// Method is normalised to upper case; a trailing slash is dropped.
    pub fn new(method: impl AsRef<str>, path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        let trimmed = if path.len() > 1 { path.trim_end_matches('/') } else { path };
        Self {
            method: method.as_ref().to_ascii_uppercase(),
            path: trimmed.to_string(),
        }
    }

    /// `/users/user-001` → `Some("/users")`; single-segment paths → `None`.
    fn first_segment(&self) -> Option<RouteKey> {
        let rest = self.path.strip_prefix('/')?;
        let (head, tail) = rest.split_once('/')?;
        if head.is_empty() || tail.is_empty() {
            return None;
        }
        Some(RouteKey {
            method: self.method.clone(),
            path: format!("/{}", head),
        })
    }
}

impl std::fmt::Display for RouteKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Per-route quota: `base_quota` requests per window plus `burst` headroom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteLimit {
    pub base_quota: u32,
    pub burst: u32,
}

impl RouteLimit {
    pub fn new(base_quota: u32, burst: u32) -> Self {
        Self { base_quota, burst }
    }

    pub fn ceiling(&self) -> u32 {
        self.base_quota.saturating_add(self.burst)
    }
}

impl Default for RouteLimit {
    fn default() -> Self {
        Self { base_quota: 60, burst: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRequirement {
    pub capabilities: CapabilitySet,
    pub limit: RouteLimit,
}

/// A route lookup hit: the key that matched and what it demands.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRoute {
    pub key: RouteKey,
    pub requirement: RouteRequirement,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<RouteKey, RouteRequirement>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a route. Returns the previous requirement, if any.
    pub fn insert(&mut self, key: RouteKey, requirement: RouteRequirement) -> Option<RouteRequirement> {
        self.routes.insert(key, requirement)
    }

    pub fn get(&self, key: &RouteKey) -> Option<&RouteRequirement> {
        self.routes.get(key)
    }

    pub fn resolve(&self, method: &str, path: &str) -> Option<ResolvedRoute> {
        let exact = RouteKey::new(method, path);
        if let Some(requirement) = self.routes.get(&exact) {
            return Some(ResolvedRoute { key: exact, requirement: requirement.clone() });
        }
        let prefix = exact.first_segment()?;
        self.routes.get(&prefix).map(|requirement| ResolvedRoute {
            key: prefix,
            requirement: requirement.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Routes sorted by path then method, for display.
    pub fn entries(&self) -> Vec<(&RouteKey, &RouteRequirement)> {
        let mut entries: Vec<_> = self.routes.iter().collect();
        entries.sort_by(|a, b| (&a.0.path, &a.0.method).cmp(&(&b.0.path, &b.0.method)));
        entries
    }

    /// The built-in table for the metrics and users resources.
    pub fn builtin() -> Self {
        let metrics = RouteLimit::new(120, 20);
        let users = RouteLimit::new(30, 5);
        let mut table = Self::new();
        for (method, path, cap, limit) in [
            ("GET", "/metrics", Capability::ReadMetrics, metrics),
            ("POST", "/metrics", Capability::WriteMetrics, metrics),
            ("PATCH", "/metrics", Capability::WriteMetrics, metrics),
            ("GET", "/users", Capability::ReadUsers, users),
            ("PUT", "/users", Capability::AdminUsers, users),
        ] {
            table.insert(
                RouteKey::new(method, path),
                RouteRequirement {
                    capabilities: CapabilitySet::from([cap]),
                    limit,
                },
            );
        }
        table
    }
}
