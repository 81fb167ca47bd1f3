// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Token Validator (gate stage 1)
//!
//! Turns an optional bearer credential into [`ValidatedClaims`] or an
//! [`AuthenticationError`].
//!
//! ## Check order
//!
//! ```text
//! credential present?            → Missing
//! fingerprint = sha256(credential)[..16]
//! signature + algorithm           → Invalid
//! exp < now (injected clock)      → Expired
//! claim shape                     → Invalid
//! iss == expected                 → Invalid
//! expected ∈ aud                  → Invalid
//! ```
//!
//! `jsonwebtoken` only verifies the signature and decodes the payload into a
//! JSON value. Expiry is read from that value before the payload is mapped
//! onto [`TokenClaims`], so an expired token is reported as expired even when
//! its other claims are malformed. Library error text never leaves this
//! module; only a fixed error kind label reaches the event sink.

use anyhow::Context;
use chrono::{DateTime, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use crate::domain::capability::CapabilitySet;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::errors::AuthenticationError;
use crate::domain::events::{sanitize_for_log, NullEventSink, SecurityEvent, SecurityEventSink};
use crate::domain::gate_config::TokenSettings;
use crate::domain::identity::{IdentityFingerprint, ValidatedClaims};

/// JWT `aud` claim: either a single string or an array of strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AudienceClaim {
    Single(String),
    Multiple(Vec<String>),
}

impl AudienceClaim {
    pub fn contains(&self, audience: &str) -> bool {
        match self {
            Self::Single(aud) => aud == audience,
            Self::Multiple(auds) => auds.iter().any(|aud| aud == audience),
        }
    }
}

/// Wire claims. Every field is required; a token missing any of them fails
/// to deserialize and is rejected as invalid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub scopes: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: AudienceClaim,
}

pub struct TokenValidator {
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    expected_issuer: String,
    expected_audience: String,
    clock: Arc<dyn Clock>,
    events: Arc<dyn SecurityEventSink>,
}

impl TokenValidator {
    /// HMAC validator (`HS256`, `HS384`, `HS512`).
    pub fn from_secret(
        secret: &[u8],
        algorithm: Algorithm,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> anyhow::Result<Self> {
        if secret.is_empty() {
            anyhow::bail!("token secret must not be empty");
        }
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            anyhow::bail!("{:?} is not an HMAC algorithm", algorithm);
        }
        Self::build(DecodingKey::from_secret(secret), algorithm, expected_issuer, expected_audience)
    }

    /// RS256 validator from a PEM-encoded public key.
    pub fn from_rsa_pem(pem: &str, expected_issuer: &str, expected_audience: &str) -> anyhow::Result<Self> {
        let decoding_key = DecodingKey::from_rsa_pem(pem.as_bytes()).context("invalid RSA public key")?;
        Self::build(decoding_key, Algorithm::RS256, expected_issuer, expected_audience)
    }

    /// Build from the `spec.token` section of a gate config.
    pub fn from_settings(settings: &TokenSettings) -> anyhow::Result<Self> {
        let algorithm = Algorithm::from_str(&settings.algorithm)
            .map_err(|_| anyhow::anyhow!("unsupported token algorithm: {}", settings.algorithm))?;
        match algorithm {
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
                let secret = settings.resolve_secret()?;
                Self::from_secret(secret.as_bytes(), algorithm, &settings.issuer, &settings.audience)
            }
            Algorithm::RS256 => {
                let path = settings
                    .public_key_path
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("spec.token.public_key_path is required for RS256"))?;
                let pem = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read public key {:?}", path))?;
                Self::from_rsa_pem(&pem, &settings.issuer, &settings.audience)
            }
            other => anyhow::bail!("unsupported token algorithm: {:?}", other),
        }
    }

    fn build(
        decoding_key: DecodingKey,
        algorithm: Algorithm,
        expected_issuer: &str,
        expected_audience: &str,
    ) -> anyhow::Result<Self> {
        if expected_issuer.is_empty() {
            anyhow::bail!("expected_issuer must not be empty");
        }
        if expected_audience.is_empty() {
            anyhow::bail!("expected_audience must not be empty");
        }
        Ok(Self {
            decoding_key,
            algorithm,
            expected_issuer: expected_issuer.to_string(),
            expected_audience: expected_audience.to_string(),
            clock: Arc::new(SystemClock),
            events: Arc::new(NullEventSink),
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn SecurityEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Validate a bearer credential. Emits exactly one `auth.*` event.
    pub fn validate(&self, credential: Option<&str>) -> Result<ValidatedClaims, AuthenticationError> {
        let Some(credential) = credential else {
            self.reject(None, AuthenticationError::Missing, None);
            return Err(AuthenticationError::Missing);
        };

        let fingerprint = IdentityFingerprint::from_credential(credential);

        let payload = match decode::<serde_json::Value>(credential, &self.decoding_key, &self.validation()) {
            Ok(data) => data.claims,
            Err(e) => {
                self.reject(Some(fingerprint), AuthenticationError::Invalid, Some(error_label(e.kind())));
                return Err(AuthenticationError::Invalid);
            }
        };

        // Freshness is decided before the payload has to match the claim shape.
        if let Err((err, label)) = self.check_expiry(&payload) {
            self.reject(Some(fingerprint), err.clone(), Some(label));
            return Err(err);
        }

        let claims = match serde_json::from_value::<TokenClaims>(payload) {
            Ok(claims) => claims,
            Err(_) => {
                self.reject(Some(fingerprint), AuthenticationError::Invalid, Some("Json"));
                return Err(AuthenticationError::Invalid);
            }
        };

        match self.check_claims(&claims) {
            Ok((issued_at, expires_at)) => {
                let (capabilities, unrecognized) = CapabilitySet::from_scopes(&claims.scopes);
                if !unrecognized.is_empty() {
                    debug!(
                        fingerprint = %fingerprint,
                        count = unrecognized.len(),
                        "Dropping unrecognized scopes from token"
                    );
                }
                let audience = self.expected_audience.clone();
                self.events.emit(SecurityEvent::AuthSucceeded {
                    fingerprint: fingerprint.clone(),
                    subject: sanitize_for_log(&claims.sub),
                    scope_count: capabilities.len(),
                    unrecognized_scopes: unrecognized.len(),
                    occurred_at: self.clock.now(),
                });
                metrics::counter!("bulwark_gate_decisions_total", "stage" => "authentication", "outcome" => "allowed")
                    .increment(1);
                Ok(ValidatedClaims {
                    subject: claims.sub,
                    capabilities,
                    issued_at,
                    expires_at,
                    issuer: claims.iss,
                    audience,
                    fingerprint,
                })
            }
            Err((err, label)) => {
                self.reject(Some(fingerprint), err.clone(), Some(label));
                Err(err)
            }
        }
    }

    /// Signature and algorithm only. Claim checks run here against the
    /// injected clock, after the signature is known to be good.
    fn validation(&self) -> Validation {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        validation
    }

    /// `exp` is read from the raw payload so an expired token reports
    /// `Expired` whatever the state of its other claims.
    fn check_expiry(&self, payload: &serde_json::Value) -> Result<(), (AuthenticationError, &'static str)> {
        let exp = payload
            .get("exp")
            .and_then(serde_json::Value::as_i64)
            .ok_or((AuthenticationError::Invalid, "MissingRequiredClaim"))?;
        let expires_at =
            DateTime::<Utc>::from_timestamp(exp, 0).ok_or((AuthenticationError::Invalid, "ExpOutOfRange"))?;
        if expires_at < self.clock.now() {
            return Err((AuthenticationError::Expired, "ExpiredSignature"));
        }
        Ok(())
    }

    /// Issuer, audience and subject checks on well-formed claims.
    fn check_claims(
        &self,
        claims: &TokenClaims,
    ) -> Result<(DateTime<Utc>, DateTime<Utc>), (AuthenticationError, &'static str)> {
        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or((AuthenticationError::Invalid, "ExpOutOfRange"))?;

        let issued_at = DateTime::<Utc>::from_timestamp(claims.iat, 0)
            .ok_or((AuthenticationError::Invalid, "IatOutOfRange"))?;

        if claims.iss != self.expected_issuer {
            return Err((AuthenticationError::Invalid, "InvalidIssuer"));
        }
        if !claims.aud.contains(&self.expected_audience) {
            return Err((AuthenticationError::Invalid, "InvalidAudience"));
        }
        if claims.sub.trim().is_empty() {
            return Err((AuthenticationError::Invalid, "EmptySubject"));
        }

        Ok((issued_at, expires_at))
    }

    fn reject(&self, fingerprint: Option<IdentityFingerprint>, err: AuthenticationError, error_type: Option<&str>) {
        self.events.emit(SecurityEvent::AuthFailed {
            fingerprint,
            reason: err.reason().to_string(),
            error_type: error_type.map(str::to_string),
            occurred_at: self.clock.now(),
        });
        metrics::counter!("bulwark_gate_decisions_total", "stage" => "authentication", "outcome" => err.reason())
            .increment(1);
    }
}

/// Fixed label for a decoder error. Never includes library message text.
fn error_label(kind: &ErrorKind) -> &'static str {
    match kind {
        ErrorKind::InvalidToken => "InvalidToken",
        ErrorKind::InvalidSignature => "InvalidSignature",
        ErrorKind::InvalidAlgorithm => "InvalidAlgorithm",
        ErrorKind::MissingRequiredClaim(_) => "MissingRequiredClaim",
        ErrorKind::ExpiredSignature => "ExpiredSignature",
        ErrorKind::InvalidIssuer => "InvalidIssuer",
        ErrorKind::InvalidAudience => "InvalidAudience",
        ErrorKind::ImmatureSignature => "ImmatureSignature",
        ErrorKind::Base64(_) => "Base64",
        ErrorKind::Json(_) => "Json",
        ErrorKind::Utf8(_) => "Utf8",
        _ => "Other",
    }
}
