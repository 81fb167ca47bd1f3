// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Caller Identity
//!
//! [`IdentityFingerprint`] is the only correlation key that leaves the
//! validator. The raw bearer credential is hashed once and dropped; every
//! event, rate-limit record and log line refers to the fingerprint instead.
//!
//! [`ValidatedClaims`] is the bundle handed to downstream handlers after all
//! three gate stages pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::capability::CapabilitySet;

/// Number of hex characters kept from the SHA-256 digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Deterministic, one-way, fixed-length digest of a bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityFingerprint(String);

impl IdentityFingerprint {
    /// Derive the fingerprint of a raw credential.
    pub fn from_credential(credential: &str) -> Self {
        let digest = Sha256::digest(credential.as_bytes());
        let mut encoded = hex::encode(digest);
        encoded.truncate(FINGERPRINT_LEN);
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for IdentityFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Claims that survived signature, freshness, issuer and audience checks.
///
/// Only constructed by [`crate::application::token_validator::TokenValidator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedClaims {
    pub subject: String,
    pub capabilities: CapabilitySet,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub issuer: String,
    pub audience: String,
    pub fingerprint: IdentityFingerprint,
}
