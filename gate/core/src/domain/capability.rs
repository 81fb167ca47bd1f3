// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Capabilities
//!
//! A [`Capability`] grants exactly one class of operation. Capabilities are an
//! enumerated type rather than free strings, so a typo in a route table fails
//! at load time instead of silently granting or denying access.
//!
//! ## Non-inheritance
//!
//! There is no ordering or implication between variants: `admin:users` does
//! **not** satisfy a requirement for `read:users`. Authorization is plain set
//! difference ([`CapabilitySet::missing`]).

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use thiserror::Error;

/// Named permission in `action:resource` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "read:metrics")]
    ReadMetrics,
    #[serde(rename = "write:metrics")]
    WriteMetrics,
    #[serde(rename = "read:users")]
    ReadUsers,
    #[serde(rename = "admin:users")]
    AdminUsers,
}

impl Capability {
    pub const ALL: [Capability; 4] = [
        Capability::ReadMetrics,
        Capability::WriteMetrics,
        Capability::ReadUsers,
        Capability::AdminUsers,
    ];

    /// Wire form used in token `scopes` claims and route configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ReadMetrics => "read:metrics",
            Capability::WriteMetrics => "write:metrics",
            Capability::ReadUsers => "read:users",
            Capability::AdminUsers => "admin:users",
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .into_iter()
            .find(|cap| cap.as_str() == s)
            .ok_or_else(|| UnknownCapability(s.to_string()))
    }
}

/// Ordered set of capabilities, used both for what a caller holds and for
/// what an operation requires.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse token scope strings. Unknown entries are returned separately;
    /// they can never satisfy a requirement.
    pub fn from_scopes<I, S>(scopes: I) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut known = BTreeSet::new();
        let mut unknown = Vec::new();
        for scope in scopes {
            match scope.as_ref().parse::<Capability>() {
                Ok(cap) => {
                    known.insert(cap);
                }
                Err(UnknownCapability(raw)) => unknown.push(raw),
            }
        }
        (Self(known), unknown)
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn insert(&mut self, capability: Capability) -> bool {
        self.0.insert(capability)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }

    /// `required − self`: capabilities demanded by `required` that this set lacks.
    pub fn missing(&self, required: &CapabilitySet) -> CapabilitySet {
        Self(required.0.difference(&self.0).copied().collect())
    }

    /// Wire strings, sorted, for event payloads.
    pub fn to_strings(&self) -> Vec<String> {
        self.0.iter().map(|cap| cap.as_str().to_string()).collect()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Capability; N]> for CapabilitySet {
    fn from(caps: [Capability; N]) -> Self {
        caps.into_iter().collect()
    }
}
