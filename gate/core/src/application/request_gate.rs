// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Request Gate
//!
//! Composes the three stages in order and owns the route requirement table.
//!
//! ```text
//! (credential, method, path)
//!   ├─ TokenValidator::validate   → AuthenticationError
//!   ├─ RouteTable::resolve        unmapped → Invalid (fail closed)
//!   ├─ ScopeAuthorizer::authorize → AuthorizationError
//!   └─ RateLimiter::check         → RateLimitError
//! ```
//!
//! Each stage short-circuits. A panic inside any stage is caught and turned
//! into `AuthenticationError::Invalid`: an internal fault never lets a
//! request through.

use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

use crate::application::rate_limiter::RateLimiter;
use crate::application::scope_authorizer::ScopeAuthorizer;
use crate::application::token_validator::TokenValidator;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::errors::{AuthenticationError, GateError, RateLimitError};
use crate::domain::events::{SecurityEvent, SecurityEventSink};
use crate::domain::gate_config::GateConfig;
use crate::domain::identity::{IdentityFingerprint, ValidatedClaims};
use crate::domain::route::{ResolvedRoute, RouteKey, RouteRequirement, RouteTable};

/// A request that passed every stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    pub claims: ValidatedClaims,
    /// Table entry the request matched.
    pub route: RouteKey,
    /// Effective limit charged against, and what is left of it.
    pub limit: u32,
    pub remaining: u32,
}

pub struct RequestGate {
    validator: TokenValidator,
    authorizer: ScopeAuthorizer,
    limiter: Arc<RateLimiter>,
    routes: RwLock<RouteTable>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn SecurityEventSink>,
}

impl RequestGate {
    pub fn new(
        validator: TokenValidator,
        authorizer: ScopeAuthorizer,
        limiter: Arc<RateLimiter>,
        routes: RouteTable,
        events: Arc<dyn SecurityEventSink>,
    ) -> Self {
        Self {
            validator,
            authorizer,
            limiter,
            routes: RwLock::new(routes),
            clock: Arc::new(SystemClock),
            events,
        }
    }

    /// Build every stage from a validated config, sharing one event sink.
    pub fn from_config(config: &GateConfig, events: Arc<dyn SecurityEventSink>) -> anyhow::Result<Self> {
        Self::from_config_with_clock(config, events, Arc::new(SystemClock))
    }

    pub fn from_config_with_clock(
        config: &GateConfig,
        events: Arc<dyn SecurityEventSink>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let validator = TokenValidator::from_settings(&config.spec.token)?
            .with_clock(clock.clone())
            .with_event_sink(events.clone());
        let authorizer = ScopeAuthorizer::new()
            .with_clock(clock.clone())
            .with_event_sink(events.clone());
        let limiter = RateLimiter::new(config.spec.rate_limit.clone())
            .with_clock(clock.clone())
            .with_event_sink(events.clone());

        let routes = config.route_table();
        debug!(routes = routes.len(), issuer = %config.spec.token.issuer, "Request gate configured");

        Ok(Self {
            validator,
            authorizer,
            limiter: Arc::new(limiter),
            routes: RwLock::new(routes),
            clock,
            events,
        })
    }

    /// Run validate → authorize → rate-check for one request.
    pub fn admit(&self, credential: Option<&str>, method: &str, path: &str) -> Result<Admission, GateError> {
        match catch_unwind(AssertUnwindSafe(|| self.run_stages(credential, method, path))) {
            Ok(result) => result,
            Err(_) => {
                error!(method, "Gate stage panicked; rejecting request");
                let fingerprint = credential.map(IdentityFingerprint::from_credential);
                self.emit_guarded(SecurityEvent::AuthFailed {
                    fingerprint,
                    reason: AuthenticationError::Invalid.reason().to_string(),
                    error_type: Some("InternalFault".to_string()),
                    occurred_at: self.clock.now(),
                });
                metrics::counter!("bulwark_gate_decisions_total", "stage" => "gate", "outcome" => "internal_fault")
                    .increment(1);
                Err(AuthenticationError::Invalid.into())
            }
        }
    }

    fn run_stages(&self, credential: Option<&str>, method: &str, path: &str) -> Result<Admission, GateError> {
        let claims = self.validator.validate(credential)?;

        let Some(resolved) = self.resolve_route(method, path) else {
            self.events.emit(SecurityEvent::AuthFailed {
                fingerprint: Some(claims.fingerprint.clone()),
                reason: AuthenticationError::Invalid.reason().to_string(),
                error_type: Some("UnmappedRoute".to_string()),
                occurred_at: self.clock.now(),
            });
            metrics::counter!("bulwark_gate_decisions_total", "stage" => "gate", "outcome" => "unmapped_route")
                .increment(1);
            return Err(AuthenticationError::Invalid.into());
        };

        let route = resolved.key.to_string();
        self.authorizer
            .authorize(&claims, &resolved.requirement.capabilities, &route)?;

        let decision = self
            .limiter
            .check(&claims.fingerprint, &route, resolved.requirement.limit)?;

        Ok(Admission {
            claims,
            route: resolved.key,
            limit: decision.limit,
            remaining: decision.remaining,
        })
    }

    /// Penalise a caller whose request a handler found malformed.
    pub fn record_malformed(&self, identity: &IdentityFingerprint, reason: &str) -> Result<(), RateLimitError> {
        self.limiter.record_malformed(identity, reason)
    }

    pub fn resolve_route(&self, method: &str, path: &str) -> Option<ResolvedRoute> {
        self.routes.read().resolve(method, path)
    }

    /// Insert or replace a route requirement at runtime. Intended for test setup.
    pub fn configure_route(&self, key: RouteKey, requirement: RouteRequirement) -> Option<RouteRequirement> {
        debug!(route = %key, "Route requirement configured");
        self.routes.write().insert(key, requirement)
    }

    pub fn routes(&self) -> RouteTable {
        self.routes.read().clone()
    }

    /// Clear all rate-limit state.
    pub fn reset(&self) {
        self.limiter.reset();
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Emit through the shared sink. Used by adapters for request-level events.
    pub fn emit(&self, event: SecurityEvent) {
        self.emit_guarded(event);
    }

    fn emit_guarded(&self, event: SecurityEvent) {
        if catch_unwind(AssertUnwindSafe(|| self.events.emit(event))).is_err() {
            error!("Security event sink panicked; event dropped");
        }
    }
}
