// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! HTTP adapter (axum)
//!
//! Wires the [`RequestGate`] in front of a router and maps gate errors to
//! responses:
//!
//! | Error | Status | Headers |
//! |-------|--------|---------|
//! | authentication | 401 | `WWW-Authenticate: Bearer` |
//! | authorization | 403 | |
//! | rate limit | 429 | `Retry-After`, `X-RateLimit-Limit`, `X-RateLimit-Remaining` |
//!
//! Bodies use one sanitized [`ErrorEnvelope`]. Fingerprints, claims and
//! library error text never appear in a response.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::application::request_gate::RequestGate;
use crate::domain::errors::{GateError, RateLimitError};
use crate::domain::events::{sanitize_for_log, SecurityEvent};
use crate::domain::identity::{IdentityFingerprint, ValidatedClaims};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");

/// Error body returned for every rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: String,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorEnvelope {
    pub fn new(category: &str, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            error: category.to_string(),
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let envelope = ErrorEnvelope::new(self.category(), self.to_string());
        let mut headers = HeaderMap::new();

        match &self {
            GateError::Authentication(_) => {
                headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            }
            GateError::Authorization(_) => {}
            GateError::RateLimit(err) => {
                let limit = match err {
                    RateLimitError::QuotaExceeded { limit, .. } => *limit,
                    RateLimitError::Blocked { .. } => 0,
                };
                headers.insert(header::RETRY_AFTER, HeaderValue::from(err.retry_after().as_secs()));
                headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit));
                headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u32));
            }
        }
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        (status, headers, Json(envelope)).into_response()
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
///
/// Any other scheme, an empty token or a non-UTF-8 header counts as absent.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

/// Gate middleware for `axum::middleware::from_fn_with_state`.
///
/// On success the [`ValidatedClaims`] are placed in request extensions for the
/// handler and the quota headers are added to its response. Every request ends
/// with one `request.complete` event.
pub async fn gate_middleware(State(gate): State<Arc<RequestGate>>, mut request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().as_str().to_string();
    let path = request.uri().path().to_string();
    let credential = bearer_token(request.headers());

    let (response, fingerprint) = match gate.admit(credential.as_deref(), &method, &path) {
        Ok(admission) => {
            let fingerprint = admission.claims.fingerprint.clone();
            request.extensions_mut().insert(admission.claims);

            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(admission.limit));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(admission.remaining));
            (response, Some(fingerprint))
        }
        Err(err) => (
            err.into_response(),
            credential.as_deref().map(IdentityFingerprint::from_credential),
        ),
    };

    gate.emit(SecurityEvent::RequestCompleted {
        fingerprint,
        method,
        route: sanitize_for_log(&path),
        status_code: response.status().as_u16(),
        duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        occurred_at: gate.clock().now(),
    });

    response
}

/// Reject a request whose payload failed validation and penalise the caller.
///
/// Only field names are logged, never their values. Answers 422, or 429 when
/// this penalty blocks the caller.
pub fn reject_malformed(gate: &RequestGate, claims: &ValidatedClaims, route: &str, fields: &[&str]) -> Response {
    gate.emit(SecurityEvent::ValidationFailed {
        fingerprint: Some(claims.fingerprint.clone()),
        route: sanitize_for_log(route),
        error_count: fields.len(),
        error_fields: fields.iter().map(|f| sanitize_for_log(f)).collect(),
        occurred_at: gate.clock().now(),
    });

    match gate.record_malformed(&claims.fingerprint, "validation_failure") {
        Ok(()) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorEnvelope::new(
                "validation_error",
                format!("Request validation failed: {} error(s)", fields.len()),
            )),
        )
            .into_response(),
        Err(err) => GateError::from(err).into_response(),
    }
}
