// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end tests for the three-stage gate built from a `GateConfig`.
//!
//! Covers stage ordering (authentication errors never surface as authorization
//! or rate-limit errors), penalty escalation to a block, recovery through decay
//! and the event trail each decision leaves.

use bulwark_core::application::request_gate::RequestGate;
use bulwark_core::domain::clock::ManualClock;
use bulwark_core::domain::errors::{AuthenticationError, GateError, RateLimitError};
use bulwark_core::domain::events::{AbuseClass, SecurityEvent};
use bulwark_core::domain::gate_config::GateConfig;
use bulwark_core::domain::identity::IdentityFingerprint;
use bulwark_core::infrastructure::event_bus::{SecurityEventBus, SecurityEventReceiver};
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const SECRET: &str = "pipeline-test-secret";

fn config() -> GateConfig {
    let mut config = GateConfig::default();
    config.spec.token.secret = Some(SECRET.to_string());
    config
}

fn mint(scopes: &[&str], exp_offset: i64, audience: serde_json::Value) -> String {
    let now = Utc::now().timestamp();
    let claims = json!({
        "sub": "svc-reporting",
        "scopes": scopes,
        "iat": now - 10,
        "exp": now + exp_offset,
        "iss": "security-aware-api",
        "aud": audience,
    });
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

fn token(scopes: &[&str]) -> String {
    mint(scopes, 3600, json!("internal-services"))
}

fn setup() -> (RequestGate, SecurityEventReceiver, ManualClock) {
    let bus = SecurityEventBus::new(256);
    let rx = bus.subscribe();
    let clock = ManualClock::starting_now();
    let gate = RequestGate::from_config_with_clock(&config(), Arc::new(bus), Arc::new(clock.clone())).unwrap();
    (gate, rx, clock)
}

fn drain(rx: &mut SecurityEventReceiver) -> Vec<SecurityEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[test]
fn test_missing_credential_is_missing() {
    let (gate, mut rx, _) = setup();
    assert_eq!(
        gate.admit(None, "GET", "/metrics"),
        Err(GateError::Authentication(AuthenticationError::Missing))
    );
    let events = drain(&mut rx);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].abuse_class(), AbuseClass::Probing);
}

#[test]
fn test_wrong_audience_is_invalid_not_authorization() {
    let (gate, _, _) = setup();
    let credential = mint(&["read:metrics"], 3600, json!("someone-else"));
    assert_eq!(
        gate.admit(Some(&credential), "GET", "/metrics"),
        Err(GateError::Authentication(AuthenticationError::Invalid))
    );
}

#[test]
fn test_audience_list_accepted() {
    let (gate, _, _) = setup();
    let credential = mint(&["read:metrics"], 3600, json!(["other", "internal-services"]));
    assert!(gate.admit(Some(&credential), "GET", "/metrics").is_ok());
}

#[test]
fn test_expired_token_is_expired_even_without_scope() {
    let (gate, _, _) = setup();
    let credential = mint(&[], -60, json!("internal-services"));
    assert_eq!(
        gate.admit(Some(&credential), "PUT", "/users"),
        Err(GateError::Authentication(AuthenticationError::Expired))
    );
}

#[test]
fn test_admin_does_not_imply_read() {
    let (gate, mut rx, _) = setup();
    let err = gate.admit(Some(&token(&["admin:users"])), "GET", "/users").unwrap_err();
    assert_eq!(err.category(), "insufficient_scope");

    let escalation = drain(&mut rx)
        .into_iter()
        .find(|e| e.abuse_class() == AbuseClass::EscalationAttempt)
        .unwrap();
    match escalation {
        SecurityEvent::AuthzFailed { missing_scopes, route, .. } => {
            assert_eq!(missing_scopes, vec!["read:users"]);
            assert_eq!(route, "GET /users");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_admin_passes_admin_route() {
    let (gate, _, _) = setup();
    let admission = gate.admit(Some(&token(&["admin:users"])), "PUT", "/users/user-001").unwrap();
    assert_eq!(admission.claims.capabilities.to_strings(), vec!["admin:users"]);
}

#[test]
fn test_unknown_scopes_are_dropped() {
    let (gate, mut rx, _) = setup();
    let credential = token(&["read:metrics", "root:everything"]);
    let admission = gate.admit(Some(&credential), "GET", "/metrics").unwrap();
    assert_eq!(admission.claims.capabilities.len(), 1);

    let success = drain(&mut rx).into_iter().find(|e| e.name() == "auth.success").unwrap();
    match success {
        SecurityEvent::AuthSucceeded { unrecognized_scopes, scope_count, .. } => {
            assert_eq!(unrecognized_scopes, 1);
            assert_eq!(scope_count, 1);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[test]
fn test_global_cap_limits_metrics_route() {
    let (gate, _, _) = setup();
    let credential = token(&["read:metrics"]);
    for _ in 0..100 {
        gate.admit(Some(&credential), "GET", "/metrics").unwrap();
    }
    let err = gate.admit(Some(&credential), "GET", "/metrics").unwrap_err();
    assert_eq!(
        err,
        GateError::RateLimit(RateLimitError::QuotaExceeded {
            limit: 100,
            retry_after: Duration::from_secs(60),
        })
    );
}

#[test]
fn test_penalty_escalates_to_block_and_decays() {
    let (gate, mut rx, clock) = setup();
    let credential = token(&["read:users"]);
    let fp = IdentityFingerprint::from_credential(&credential);

    gate.admit(Some(&credential), "GET", "/users").unwrap();
    for _ in 0..4 {
        gate.record_malformed(&fp, "validation_failure").unwrap();
    }
    assert!(matches!(
        gate.record_malformed(&fp, "validation_failure"),
        Err(RateLimitError::Blocked { .. })
    ));
    assert!(matches!(
        gate.admit(Some(&credential), "GET", "/users"),
        Err(GateError::RateLimit(RateLimitError::Blocked { .. }))
    ));

    let events = drain(&mut rx);
    assert_eq!(events.iter().filter(|e| e.name() == "rate_limit.penalty").count(), 5);
    assert!(events.iter().any(|e| e.name() == "rate_limit.blocked"));
    assert!(events
        .iter()
        .filter_map(|e| e.fingerprint())
        .all(|f| f == &fp));

    clock.advance(Duration::from_secs(10 * 60));
    let admission = gate.admit(Some(&credential), "GET", "/users").unwrap();
    // floor(35 × 0.35) = 12
    assert_eq!(admission.limit, 12);
}

#[test]
fn test_reset_isolates_tests() {
    let (gate, _, _) = setup();
    let credential = token(&["read:users"]);
    let fp = IdentityFingerprint::from_credential(&credential);
    for _ in 0..5 {
        let _ = gate.record_malformed(&fp, "validation_failure");
    }
    gate.reset();
    assert_eq!(gate.limiter().tracked_identities(), 0);
    assert!(gate.admit(Some(&credential), "GET", "/users").is_ok());
}

#[test]
fn test_events_never_carry_raw_credential() {
    let (gate, mut rx, _) = setup();
    let credential = token(&["read:metrics"]);
    gate.admit(Some(&credential), "GET", "/metrics").unwrap();
    let _ = gate.admit(Some("not-a-jwt"), "GET", "/metrics");

    for event in drain(&mut rx) {
        let serialized = serde_json::to_string(&event).unwrap();
        assert!(!serialized.contains(&credential));
        assert!(!serialized.contains("not-a-jwt"));
    }
}

#[test]
fn test_from_config_rejects_invalid_config() {
    let mut config = config();
    config.spec.rate_limit.penalty_factor = 1.5;
    let bus = SecurityEventBus::new(4);
    assert!(RequestGate::from_config(&config, Arc::new(bus)).is_err());
}
