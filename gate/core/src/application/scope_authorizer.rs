// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Scope Authorizer (gate stage 2)
//!
//! `missing = required − possessed`. Any missing capability denies the call.
//! The caller only ever learns "insufficient scope"; the missing, required and
//! possessed sets go to the event sink as an `ESCALATION_ATTEMPT`.

use std::sync::Arc;

use crate::domain::capability::CapabilitySet;
use crate::domain::clock::{Clock, SystemClock};
use crate::domain::errors::AuthorizationError;
use crate::domain::events::{sanitize_for_log, NullEventSink, SecurityEvent, SecurityEventSink};
use crate::domain::identity::ValidatedClaims;

pub struct ScopeAuthorizer {
    clock: Arc<dyn Clock>,
    events: Arc<dyn SecurityEventSink>,
}

impl ScopeAuthorizer {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            events: Arc::new(NullEventSink),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn SecurityEventSink>) -> Self {
        self.events = events;
        self
    }

    /// Check `claims` against the capabilities `route` requires.
    pub fn authorize(
        &self,
        claims: &ValidatedClaims,
        required: &CapabilitySet,
        route: &str,
    ) -> Result<(), AuthorizationError> {
        let missing = claims.capabilities.missing(required);

        if !missing.is_empty() {
            self.events.emit(SecurityEvent::AuthzFailed {
                fingerprint: claims.fingerprint.clone(),
                route: sanitize_for_log(route),
                required_scopes: required.to_strings(),
                provided_scopes: claims.capabilities.to_strings(),
                missing_scopes: missing.to_strings(),
                occurred_at: self.clock.now(),
            });
            metrics::counter!("bulwark_gate_decisions_total", "stage" => "authorization", "outcome" => "insufficient_scope")
                .increment(1);
            return Err(AuthorizationError::InsufficientScope {
                missing,
                required: required.clone(),
                possessed: claims.capabilities.clone(),
            });
        }

        self.events.emit(SecurityEvent::AuthzSucceeded {
            fingerprint: claims.fingerprint.clone(),
            route: sanitize_for_log(route),
            scopes_used: required.to_strings(),
            occurred_at: self.clock.now(),
        });
        metrics::counter!("bulwark_gate_decisions_total", "stage" => "authorization", "outcome" => "allowed")
            .increment(1);
        Ok(())
    }
}

impl Default for ScopeAuthorizer {
    fn default() -> Self {
        Self::new()
    }
}
