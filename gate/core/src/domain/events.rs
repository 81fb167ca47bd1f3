// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Security Events
//!
//! Every gate decision produces one [`SecurityEvent`]. Events are forensic
//! records: they carry the identity fingerprint, an [`AbuseClass`] and the
//! decision detail, and never the raw credential or request payload values.
//!
//! Free-text fields (reasons, routes, subjects) pass through
//! [`sanitize_for_log`] at construction so a hostile caller cannot inject
//! line breaks or unbounded strings into downstream log pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::identity::IdentityFingerprint;

/// Maximum characters kept from a free-text field.
pub const MAX_FIELD_LEN: usize = 100;

/// Abuse classification attached to each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbuseClass {
    Benign,
    Malformed,
    Probing,
    EscalationAttempt,
    RateExceeded,
    ReplaySuspected,
}

impl AbuseClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Benign => "BENIGN",
            Self::Malformed => "MALFORMED",
            Self::Probing => "PROBING",
            Self::EscalationAttempt => "ESCALATION_ATTEMPT",
            Self::RateExceeded => "RATE_EXCEEDED",
            Self::ReplaySuspected => "REPLAY_SUSPECTED",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SecurityEvent {
    AuthSucceeded {
        fingerprint: IdentityFingerprint,
        subject: String,
        scope_count: usize,
        unrecognized_scopes: usize,
        occurred_at: DateTime<Utc>,
    },
    AuthFailed {
        fingerprint: Option<IdentityFingerprint>,
        reason: String,
        /// Library error kind, kept for forensics only (`InvalidSignature`, ...).
        error_type: Option<String>,
        occurred_at: DateTime<Utc>,
    },
    AuthzSucceeded {
        fingerprint: IdentityFingerprint,
        route: String,
        scopes_used: Vec<String>,
        occurred_at: DateTime<Utc>,
    },
    AuthzFailed {
        fingerprint: IdentityFingerprint,
        route: String,
        required_scopes: Vec<String>,
        provided_scopes: Vec<String>,
        missing_scopes: Vec<String>,
        occurred_at: DateTime<Utc>,
    },
    RateLimitExceeded {
        fingerprint: IdentityFingerprint,
        route: String,
        limit: u32,
        window_seconds: u64,
        occurred_at: DateTime<Utc>,
    },
    RateLimitPenalty {
        fingerprint: IdentityFingerprint,
        reason: String,
        penalty_multiplier: f64,
        malformed_count: u32,
        occurred_at: DateTime<Utc>,
    },
    RateLimitBlocked {
        fingerprint: IdentityFingerprint,
        reason: String,
        malformed_count: u32,
        retry_after_seconds: u64,
        occurred_at: DateTime<Utc>,
    },
    ValidationFailed {
        fingerprint: Option<IdentityFingerprint>,
        route: String,
        error_count: usize,
        error_fields: Vec<String>,
        occurred_at: DateTime<Utc>,
    },
    RequestCompleted {
        fingerprint: Option<IdentityFingerprint>,
        method: String,
        route: String,
        status_code: u16,
        duration_ms: f64,
        occurred_at: DateTime<Utc>,
    },
}

impl SecurityEvent {
    /// Dotted event name used by log consumers (`auth.failure`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            Self::AuthSucceeded { .. } => "auth.success",
            Self::AuthFailed { .. } => "auth.failure",
            Self::AuthzSucceeded { .. } => "authz.success",
            Self::AuthzFailed { .. } => "authz.failure",
            Self::RateLimitExceeded { .. } => "rate_limit.exceeded",
            Self::RateLimitPenalty { .. } => "rate_limit.penalty",
            Self::RateLimitBlocked { .. } => "rate_limit.blocked",
            Self::ValidationFailed { .. } => "validation.failure",
            Self::RequestCompleted { .. } => "request.complete",
        }
    }

    pub fn abuse_class(&self) -> AbuseClass {
        match self {
            Self::AuthSucceeded { .. }
            | Self::AuthzSucceeded { .. }
            | Self::RequestCompleted { .. } => AbuseClass::Benign,
            Self::AuthFailed { .. } => AbuseClass::Probing,
            Self::AuthzFailed { .. } => AbuseClass::EscalationAttempt,
            Self::RateLimitExceeded { .. } => AbuseClass::RateExceeded,
            Self::RateLimitPenalty { .. }
            | Self::RateLimitBlocked { .. }
            | Self::ValidationFailed { .. } => AbuseClass::Malformed,
        }
    }

    pub fn fingerprint(&self) -> Option<&IdentityFingerprint> {
        match self {
            Self::AuthSucceeded { fingerprint, .. }
            | Self::AuthzSucceeded { fingerprint, .. }
            | Self::AuthzFailed { fingerprint, .. }
            | Self::RateLimitExceeded { fingerprint, .. }
            | Self::RateLimitPenalty { fingerprint, .. }
            | Self::RateLimitBlocked { fingerprint, .. } => Some(fingerprint),
            Self::AuthFailed { fingerprint, .. }
            | Self::ValidationFailed { fingerprint, .. }
            | Self::RequestCompleted { fingerprint, .. } => fingerprint.as_ref(),
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::AuthSucceeded { occurred_at, .. }
            | Self::AuthFailed { occurred_at, .. }
            | Self::AuthzSucceeded { occurred_at, .. }
            | Self::AuthzFailed { occurred_at, .. }
            | Self::RateLimitExceeded { occurred_at, .. }
            | Self::RateLimitPenalty { occurred_at, .. }
            | Self::RateLimitBlocked { occurred_at, .. }
            | Self::ValidationFailed { occurred_at, .. }
            | Self::RequestCompleted { occurred_at, .. } => *occurred_at,
        }
    }
}

/// Receiver of gate decision events.
///
/// Implementations must not block and must not fail the caller: an
/// unavailable sink loses events, it never delays or changes a decision.
pub trait SecurityEventSink: Send + Sync {
    fn emit(&self, event: SecurityEvent);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventSink;

impl SecurityEventSink for NullEventSink {
    fn emit(&self, _event: SecurityEvent) {}
}

/// Replace control characters with `?` and cap length at [`MAX_FIELD_LEN`].
pub fn sanitize_for_log(value: &str) -> String {
    let mut out = String::with_capacity(value.len().min(MAX_FIELD_LEN + 16));
    for (count, c) in value.chars().enumerate() {
        if count == MAX_FIELD_LEN {
            out.push_str("...<truncated>");
            return out;
        }
        out.push(if c.is_control() { '?' } else { c });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_replaces_control_chars() {
        assert_eq!(sanitize_for_log("a\nb\r\tc\u{1b}[31m"), "a?b??c?[31m");
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(250);
        let out = sanitize_for_log(&long);
        assert!(out.starts_with(&"x".repeat(MAX_FIELD_LEN)));
        assert!(out.ends_with("...<truncated>"));
        assert_eq!(out.chars().count(), MAX_FIELD_LEN + "...<truncated>".len());
    }

    #[test]
    fn test_sanitize_keeps_short_values() {
        assert_eq!(sanitize_for_log("/metrics"), "/metrics");
        assert_eq!(sanitize_for_log(&"y".repeat(MAX_FIELD_LEN)), "y".repeat(MAX_FIELD_LEN));
    }

    #[test]
    fn test_event_classification() {
        let event = SecurityEvent::AuthFailed {
            fingerprint: None,
            reason: "missing_token".to_string(),
            error_type: None,
            occurred_at: Utc::now(),
        };
        assert_eq!(event.name(), "auth.failure");
        assert_eq!(event.abuse_class(), AbuseClass::Probing);
        assert!(event.fingerprint().is_none());

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "auth_failed");
    }
}
