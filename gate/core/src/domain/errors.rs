// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Gate Error Taxonomy
//!
//! | Family | HTTP | Identity resolved? |
//! |--------|------|--------------------|
//! | [`AuthenticationError`] | 401 | no |
//! | [`AuthorizationError`] | 403 | yes, capability check failed |
//! | [`RateLimitError`] | 429 | yes, quota or abuse block |
//!
//! `Display` strings are generic on purpose: they are the only text a caller
//! may ever see. Scope detail for authorization failures is carried in the
//! error for the event sink and the HTTP adapter drops it.

use std::time::Duration;
use thiserror::Error;

use crate::domain::capability::CapabilitySet;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthenticationError {
    #[error("missing authentication token")]
    Missing,

    #[error("invalid token")]
    Invalid,

    #[error("token expired")]
    Expired,
}

impl AuthenticationError {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Missing => "missing_token",
            Self::Invalid => "invalid_token",
            Self::Expired => "expired_token",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    #[error("insufficient scope")]
    InsufficientScope {
        missing: CapabilitySet,
        required: CapabilitySet,
        possessed: CapabilitySet,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded")]
    QuotaExceeded { limit: u32, retry_after: Duration },

    #[error("temporarily blocked due to repeated malformed requests")]
    Blocked { retry_after: Duration },
}

impl RateLimitError {
    pub fn retry_after(&self) -> Duration {
        match self {
            Self::QuotaExceeded { retry_after, .. } | Self::Blocked { retry_after } => *retry_after,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::QuotaExceeded { .. } => "quota_exceeded",
            Self::Blocked { .. } => "blocked",
        }
    }
}

/// Any rejection produced by the gate. Every variant is terminal for the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),

    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
}

impl GateError {
    /// Which gate stage rejected the request.
    pub fn stage(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::Authorization(_) => "authorization",
            Self::RateLimit(_) => "rate_limit",
        }
    }

    /// HTTP status the serving layer answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Authentication(_) => 401,
            Self::Authorization(_) => 403,
            Self::RateLimit(_) => 429,
        }
    }

    /// Category string exposed in the sanitized error envelope.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication_failed",
            Self::Authorization(_) => "insufficient_scope",
            Self::RateLimit(_) => "rate_limited",
        }
    }
}
