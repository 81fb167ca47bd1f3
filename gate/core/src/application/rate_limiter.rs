// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Abuse-Aware Rate Limiter (gate stage 3)
//!
//! Per-identity sliding-window quota whose size shrinks when the caller sends
//! malformed input, and recovers slowly while it behaves.
//!
//! ## Standing
//!
//! ```text
//! Normal ──record_malformed──▶ Penalized ──(malformed_count ≥ threshold)──▶ Blocked
//!   ▲                              │                                          │
//!   └──────────── decay ◀──────────┴───────────────── decay ◀─────────────────┘
//! ```
//!
//! `effective_limit = max(1, floor(min(global_cap, base + burst) × multiplier))`.
//! A malformed event multiplies the multiplier by `penalty_factor` (floored at
//! `min_multiplier`), so one bad payload halves the caller's quota however far
//! it was from its volume limit.
//!
//! ## Decay
//!
//! Lazy: there is no background timer. Whenever an identity is observed
//! (`check`, `record_malformed`, `get_remaining`) and at least `decay_interval`
//! has elapsed since the last decay, the multiplier gains `decay_step` (capped at
//! 1.0) and `malformed_count` drops by one. One step per observation.
//!
//! ## Blocked identities
//!
//! Blocking freezes both counters. `check` appends no timestamp and
//! `record_malformed` neither counts nor penalises; only decay moves the
//! identity out of `Blocked`.
//!
//! ## Concurrency
//!
//! Records live in a sharded [`DashMap`]; each record has its own
//! [`parking_lot::Mutex`], so concurrent requests from one identity are
//! serialised and distinct identities never wait on each other's record.
//! Shard guards are never held while a record lock is taken.
//!
//! ## Eviction
//!
//! Records are created lazily and the table is bounded by
//! `max_tracked_identities`. On overflow the least-recently-seen records are
//! dropped in a batch of 10% of capacity; records locked by an in-flight
//! request are skipped. An evicted record is marked under its lock, so a
//! request that fetched it just before removal retries against a fresh one
//! instead of charging a record nobody can see.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::domain::clock::{Clock, SystemClock};
use crate::domain::errors::RateLimitError;
use crate::domain::events::{sanitize_for_log, NullEventSink, SecurityEvent, SecurityEventSink};
use crate::domain::gate_config::RateLimitSettings;
use crate::domain::identity::IdentityFingerprint;
use crate::domain::route::RouteLimit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Standing {
    Normal,
    Penalized,
    Blocked,
}

/// Successful quota charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub limit: u32,
    pub remaining: u32,
}

/// Read-only view of one identity's record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub penalty_multiplier: f64,
    pub malformed_count: u32,
    pub requests_in_window: usize,
    pub standing: Standing,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RateLimitState {
    requests: VecDeque<DateTime<Utc>>,
    penalty_multiplier: f64,
    malformed_count: u32,
    last_decay: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    evicted: bool,
}

impl RateLimitState {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            requests: VecDeque::new(),
            penalty_multiplier: 1.0,
            malformed_count: 0,
            last_decay: now,
            last_seen: now,
            evicted: false,
        }
    }

    /// Prune the window and apply any pending decay step.
    fn observe(&mut self, now: DateTime<Utc>, settings: &RateLimitSettings) {
        self.last_seen = now;

        // A window reaching past the start of time keeps everything.
        if let Some(cutoff) = now.checked_sub_signed(to_chrono(settings.window)) {
            self.requests.retain(|t| *t > cutoff);
        }

        if now.signed_duration_since(self.last_decay) >= to_chrono(settings.decay_interval) {
            self.penalty_multiplier = (self.penalty_multiplier + settings.decay_step).min(1.0);
            self.malformed_count = self.malformed_count.saturating_sub(1);
            self.last_decay = now;
        }
    }

    fn is_blocked(&self, settings: &RateLimitSettings) -> bool {
        self.malformed_count >= settings.block_threshold
    }

    fn standing(&self, settings: &RateLimitSettings) -> Standing {
        if self.is_blocked(settings) {
            Standing::Blocked
        } else if self.penalty_multiplier < 1.0 || self.malformed_count > 0 {
            Standing::Penalized
        } else {
            Standing::Normal
        }
    }
}

enum Charge {
    Allowed(RateLimitDecision),
    Exceeded(u32),
    Blocked(u32),
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX)
}

fn effective_limit(settings: &RateLimitSettings, limit: RouteLimit, multiplier: f64) -> u32 {
    let base = settings.global_cap.min(limit.ceiling());
    let scaled = (f64::from(base) * multiplier).floor() as u32;
    scaled.max(1)
}

pub struct RateLimiter {
    settings: RateLimitSettings,
    identities: DashMap<IdentityFingerprint, Arc<Mutex<RateLimitState>>>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn SecurityEventSink>,
}

impl RateLimiter {
    pub fn new(settings: RateLimitSettings) -> Self {
        Self {
            settings,
            identities: DashMap::new(),
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

    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    /// Charge one request against `identity`'s quota for `route`.
    ///
    /// # Errors
    ///
    /// - [`RateLimitError::Blocked`] while `malformed_count ≥ block_threshold`,
    ///   regardless of quota
    /// - [`RateLimitError::QuotaExceeded`] when the window already holds
    ///   `effective_limit` requests
    pub fn check(
        &self,
        identity: &IdentityFingerprint,
        route: &str,
        limit: RouteLimit,
    ) -> Result<RateLimitDecision, RateLimitError> {
        let now = self.clock.now();
        let outcome = self.with_live_record(identity, |state| {
            state.observe(now, &self.settings);
            if state.is_blocked(&self.settings) {
                return Charge::Blocked(state.malformed_count);
            }
            let effective = effective_limit(&self.settings, limit, state.penalty_multiplier);
            let count = state.requests.len() as u32;
            if count >= effective {
                return Charge::Exceeded(effective);
            }
            state.requests.push_back(now);
            Charge::Allowed(RateLimitDecision {
                limit: effective,
                remaining: effective - count - 1,
            })
        });

        match outcome {
            Charge::Blocked(malformed_count) => {
                Err(self.blocked(identity, "request_while_blocked", malformed_count, now))
            }
            Charge::Exceeded(effective) => {
                self.events.emit(SecurityEvent::RateLimitExceeded {
                    fingerprint: identity.clone(),
                    route: sanitize_for_log(route),
                    limit: effective,
                    window_seconds: self.settings.window.as_secs(),
                    occurred_at: now,
                });
                metrics::counter!("bulwark_gate_decisions_total", "stage" => "rate_limit", "outcome" => "quota_exceeded")
                    .increment(1);
                Err(RateLimitError::QuotaExceeded {
                    limit: effective,
                    retry_after: self.settings.window,
                })
            }
            Charge::Allowed(decision) => {
                metrics::counter!("bulwark_gate_decisions_total", "stage" => "rate_limit", "outcome" => "allowed")
                    .increment(1);
                Ok(decision)
            }
        }
    }

    /// Penalise `identity` for a malformed request.
    ///
    /// # Errors
    ///
    /// [`RateLimitError::Blocked`] when this event reaches the block threshold,
    /// or when the identity was already blocked.
    pub fn record_malformed(&self, identity: &IdentityFingerprint, reason: &str) -> Result<(), RateLimitError> {
        let now = self.clock.now();
        let penalty = self.with_live_record(identity, |state| {
            state.observe(now, &self.settings);
            if state.is_blocked(&self.settings) {
                return Err(state.malformed_count);
            }
            state.malformed_count += 1;
            state.penalty_multiplier =
                (state.penalty_multiplier * self.settings.penalty_factor).max(self.settings.min_multiplier);
            Ok((state.malformed_count, state.penalty_multiplier, state.is_blocked(&self.settings)))
        });

        let (malformed_count, penalty_multiplier, blocked) = match penalty {
            Ok(applied) => applied,
            Err(malformed_count) => return Err(self.blocked(identity, reason, malformed_count, now)),
        };

        self.events.emit(SecurityEvent::RateLimitPenalty {
            fingerprint: identity.clone(),
            reason: sanitize_for_log(reason),
            penalty_multiplier,
            malformed_count,
            occurred_at: now,
        });

        if blocked {
            return Err(self.blocked(identity, reason, malformed_count, now));
        }
        Ok(())
    }

    /// Requests left in the current window for `route`. Zero while blocked.
    ///
    /// Applies pruning and decay like `check`, but charges nothing and creates
    /// no record for an unseen identity.
    pub fn get_remaining(&self, identity: &IdentityFingerprint, limit: RouteLimit) -> u32 {
        let Some(record) = self.existing(identity) else {
            return effective_limit(&self.settings, limit, 1.0);
        };
        let now = self.clock.now();
        let mut state = record.lock();
        if state.evicted {
            return effective_limit(&self.settings, limit, 1.0);
        }
        state.observe(now, &self.settings);

        if state.is_blocked(&self.settings) {
            return 0;
        }
        let effective = effective_limit(&self.settings, limit, state.penalty_multiplier);
        effective.saturating_sub(state.requests.len() as u32)
    }

    /// Current effective limit for `identity` on `route`, after decay.
    pub fn effective_limit(&self, identity: &IdentityFingerprint, limit: RouteLimit) -> u32 {
        let Some(record) = self.existing(identity) else {
            return effective_limit(&self.settings, limit, 1.0);
        };
        let now = self.clock.now();
        let mut state = record.lock();
        if state.evicted {
            return effective_limit(&self.settings, limit, 1.0);
        }
        state.observe(now, &self.settings);
        effective_limit(&self.settings, limit, state.penalty_multiplier)
    }

    /// Record as it stands, without pruning or decay.
    pub fn snapshot(&self, identity: &IdentityFingerprint) -> Option<RateLimitSnapshot> {
        let record = self.existing(identity)?;
        let state = record.lock();
        Some(RateLimitSnapshot {
            penalty_multiplier: state.penalty_multiplier,
            malformed_count: state.malformed_count,
            requests_in_window: state.requests.len(),
            standing: state.standing(&self.settings),
            last_seen: state.last_seen,
        })
    }

    pub fn tracked_identities(&self) -> usize {
        self.identities.len()
    }

    /// Drop every record.
    pub fn reset(&self) {
        self.identities.clear();
        debug!("Rate limiter state cleared");
    }

    fn existing(&self, identity: &IdentityFingerprint) -> Option<Arc<Mutex<RateLimitState>>> {
        self.identities.get(identity).map(|entry| Arc::clone(entry.value()))
    }

    /// Run `f` on the record for `identity` under its lock, retrying when the
    /// record fetched was evicted before the lock was taken.
    fn with_live_record<R>(&self, identity: &IdentityFingerprint, mut f: impl FnMut(&mut RateLimitState) -> R) -> R {
        loop {
            let record = self.record(identity);
            let mut state = record.lock();
            if !state.evicted {
                return f(&mut *state);
            }
        }
    }

    /// Fetch or lazily create the record for `identity`.
    fn record(&self, identity: &IdentityFingerprint) -> Arc<Mutex<RateLimitState>> {
        if let Some(record) = self.existing(identity) {
            return record;
        }

        let now = self.clock.now();
        let record = Arc::clone(
            self.identities
                .entry(identity.clone())
                .or_insert_with(|| Arc::new(Mutex::new(RateLimitState::new(now))))
                .value(),
        );

        if self.identities.len() > self.settings.max_tracked_identities {
            self.evict_least_recently_seen(identity);
        }
        record
    }

    fn evict_least_recently_seen(&self, keep: &IdentityFingerprint) {
        let capacity = self.settings.max_tracked_identities;
        let excess = self.identities.len().saturating_sub(capacity);
        if excess == 0 {
            return;
        }
        let batch = (capacity / 10).max(1);
        let to_remove = excess.max(batch);

        let mut candidates: Vec<(DateTime<Utc>, IdentityFingerprint)> = self
            .identities
            .iter()
            .filter(|entry| entry.key() != keep)
            .filter_map(|entry| {
                let state = entry.value().try_lock()?;
                Some((state.last_seen, entry.key().clone()))
            })
            .collect();
        candidates.sort();

        let mut evicted = 0usize;
        for (seen, key) in candidates.into_iter().take(to_remove) {
            let removed = self.identities.remove_if(&key, |_, record| match record.try_lock() {
                Some(mut state) if state.last_seen <= seen => {
                    state.evicted = true;
                    true
                }
                _ => false,
            });
            if removed.is_some() {
                evicted += 1;
            }
        }

        metrics::counter!("bulwark_rate_limit_evictions_total").increment(evicted as u64);
        debug!(evicted, remaining = self.identities.len(), "Evicted least-recently-seen identities");
    }

    fn blocked(
        &self,
        identity: &IdentityFingerprint,
        reason: &str,
        malformed_count: u32,
        now: DateTime<Utc>,
    ) -> RateLimitError {
        let retry_after = self.settings.decay_interval;
        self.events.emit(SecurityEvent::RateLimitBlocked {
            fingerprint: identity.clone(),
            reason: sanitize_for_log(reason),
            malformed_count,
            retry_after_seconds: retry_after.as_secs(),
            occurred_at: now,
        });
        metrics::counter!("bulwark_gate_decisions_total", "stage" => "rate_limit", "outcome" => "blocked")
            .increment(1);
        RateLimitError::Blocked { retry_after }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::clock::ManualClock;
    use crate::infrastructure::event_bus::SecurityEventBus;

    fn limiter() -> (RateLimiter, ManualClock) {
        let clock = ManualClock::starting_now();
        let limiter = RateLimiter::new(RateLimitSettings::default()).with_clock(Arc::new(clock.clone()));
        (limiter, clock)
    }

    fn fp(name: &str) -> IdentityFingerprint {
        IdentityFingerprint::from_credential(name)
    }

    const ROUTE: RouteLimit = RouteLimit { base_quota: 60, burst: 10 };

    #[test]
    fn test_seventy_pass_then_quota_exceeded() {
        let (limiter, _) = limiter();
        let id = fp("caller");

        for i in 0..70 {
            let decision = limiter.check(&id, "/test", ROUTE).unwrap();
            assert_eq!(decision.limit, 70);
            assert_eq!(decision.remaining, 70 - i - 1);
        }
        assert_eq!(
            limiter.check(&id, "/test", ROUTE),
            Err(RateLimitError::QuotaExceeded { limit: 70, retry_after: Duration::from_secs(60) })
        );
    }

    #[test]
    fn test_global_cap_bounds_route_ceiling() {
        let (limiter, _) = limiter();
        assert_eq!(limiter.effective_limit(&fp("caller"), RouteLimit::new(120, 20)), 100);
    }

    #[test]
    fn test_window_slides() {
        let (limiter, clock) = limiter();
        let id = fp("caller");
        for _ in 0..70 {
            limiter.check(&id, "/test", ROUTE).unwrap();
        }
        assert!(limiter.check(&id, "/test", ROUTE).is_err());

        clock.advance(Duration::from_secs(61));
        assert!(limiter.check(&id, "/test", ROUTE).is_ok());
        assert_eq!(limiter.get_remaining(&id, ROUTE), 69);
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _) = limiter();
        for _ in 0..70 {
            limiter.check(&fp("a"), "/test", ROUTE).unwrap();
        }
        assert!(limiter.check(&fp("a"), "/test", ROUTE).is_err());
        assert!(limiter.check(&fp("b"), "/test", ROUTE).is_ok());
    }

    #[test]
    fn test_one_malformed_event_halves_quota() {
        let (limiter, _) = limiter();
        let id = fp("caller");
        limiter.record_malformed(&id, "validation_failure").unwrap();
        assert_eq!(limiter.get_remaining(&id, ROUTE), 35);
        assert_eq!(limiter.snapshot(&id).unwrap().standing, Standing::Penalized);
    }

    #[test]
    fn test_effective_limit_non_increasing_without_decay() {
        let (limiter, _) = limiter();
        let id = fp("caller");
        let mut previous = limiter.effective_limit(&id, ROUTE);
        for _ in 0..4 {
            limiter.record_malformed(&id, "bad_payload").unwrap();
            let current = limiter.effective_limit(&id, ROUTE);
            assert!(current <= previous, "{current} > {previous}");
            previous = current;
        }
    }

    #[test]
    fn test_five_malformed_events_block() {
        let (limiter, _) = limiter();
        let id = fp("caller");
        for _ in 0..4 {
            limiter.record_malformed(&id, "bad_payload").unwrap();
        }
        let err = limiter.record_malformed(&id, "bad_payload").unwrap_err();
        assert!(matches!(err, RateLimitError::Blocked { .. }));

        let snapshot = limiter.snapshot(&id).unwrap();
        assert!((snapshot.penalty_multiplier - 0.1).abs() < 1e-9);
        assert_eq!(snapshot.malformed_count, 5);
        assert_eq!(snapshot.standing, Standing::Blocked);

        // Well-formed and within quota, still blocked.
        assert!(matches!(limiter.check(&id, "/test", ROUTE), Err(RateLimitError::Blocked { .. })));
        assert_eq!(limiter.get_remaining(&id, ROUTE), 0);
    }

    #[test]
    fn test_block_freezes_counters() {
        let (limiter, _) = limiter();
        let id = fp("caller");
        for _ in 0..5 {
            let _ = limiter.record_malformed(&id, "bad_payload");
        }
        for _ in 0..3 {
            assert!(limiter.check(&id, "/test", ROUTE).is_err());
            assert!(limiter.record_malformed(&id, "bad_payload").is_err());
        }
        let snapshot = limiter.snapshot(&id).unwrap();
        assert_eq!(snapshot.malformed_count, 5);
        assert_eq!(snapshot.requests_in_window, 0);
    }

    #[test]
    fn test_decay_after_interval() {
        let (limiter, clock) = limiter();
        let id = fp("caller");
        limiter.record_malformed(&id, "bad_payload").unwrap();
        assert_eq!(limiter.snapshot(&id).unwrap().malformed_count, 1);

        clock.advance(Duration::from_secs(10 * 60));
        limiter.get_remaining(&id, ROUTE);

        let snapshot = limiter.snapshot(&id).unwrap();
        assert!((snapshot.penalty_multiplier - 0.75).abs() < 1e-9);
        assert_eq!(snapshot.malformed_count, 0);
    }

    #[test]
    fn test_no_decay_between_observations() {
        let (limiter, clock) = limiter();
        let id = fp("caller");
        limiter.record_malformed(&id, "bad_payload").unwrap();

        // Three intervals pass silently; one observation applies one step.
        clock.advance(Duration::from_secs(30 * 60));
        assert!((limiter.snapshot(&id).unwrap().penalty_multiplier - 0.5).abs() < 1e-9);
        limiter.get_remaining(&id, ROUTE);
        assert!((limiter.snapshot(&id).unwrap().penalty_multiplier - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_block_lifts_after_decay() {
        let (limiter, clock) = limiter();
        let id = fp("caller");
        for _ in 0..5 {
            let _ = limiter.record_malformed(&id, "bad_payload");
        }
        assert!(matches!(limiter.check(&id, "/test", ROUTE), Err(RateLimitError::Blocked { .. })));

        clock.advance(Duration::from_secs(10 * 60));
        let decision = limiter.check(&id, "/test", ROUTE).unwrap();
        // 0.1 + 0.25 = 0.35 → floor(70 × 0.35) = 24
        assert_eq!(decision.limit, 24);
        assert_eq!(limiter.snapshot(&id).unwrap().standing, Standing::Penalized);
    }

    #[test]
    fn test_blocked_retry_after_is_decay_interval() {
        let (limiter, _) = limiter();
        let id = fp("caller");
        for _ in 0..4 {
            limiter.record_malformed(&id, "bad_payload").unwrap();
        }
        let err = limiter.record_malformed(&id, "bad_payload").unwrap_err();
        assert_eq!(err.retry_after(), Duration::from_secs(10 * 60));
    }

    #[test]
    fn test_effective_limit_never_below_one() {
        let clock = ManualClock::starting_now();
        let settings = RateLimitSettings { block_threshold: 100, ..RateLimitSettings::default() };
        let limiter = RateLimiter::new(settings).with_clock(Arc::new(clock));
        let id = fp("caller");
        for _ in 0..10 {
            limiter.record_malformed(&id, "bad_payload").unwrap();
        }
        assert_eq!(limiter.effective_limit(&id, RouteLimit::new(3, 0)), 1);
        assert!(limiter.check(&id, "/tiny", RouteLimit::new(3, 0)).is_ok());
        assert!(limiter.check(&id, "/tiny", RouteLimit::new(3, 0)).is_err());
    }

    #[test]
    fn test_get_remaining_is_idempotent() {
        let (limiter, _) = limiter();
        let id = fp("caller");
        for _ in 0..10 {
            limiter.check(&id, "/test", ROUTE).unwrap();
        }
        limiter.record_malformed(&id, "bad_payload").unwrap();
        let first = limiter.get_remaining(&id, ROUTE);
        let second = limiter.get_remaining(&id, ROUTE);
        assert_eq!(first, second);
        assert_eq!(first, 25);
    }

    #[test]
    fn test_get_remaining_does_not_create_record() {
        let (limiter, _) = limiter();
        assert_eq!(limiter.get_remaining(&fp("ghost"), ROUTE), 70);
        assert_eq!(limiter.tracked_identities(), 0);
    }

    #[test]
    fn test_reset_clears_state() {
        let (limiter, _) = limiter();
        let id = fp("caller");
        for _ in 0..5 {
            let _ = limiter.record_malformed(&id, "bad_payload");
        }
        limiter.reset();
        assert_eq!(limiter.tracked_identities(), 0);
        assert!(limiter.check(&id, "/test", ROUTE).is_ok());
    }

    #[test]
    fn test_eviction_drops_least_recently_seen() {
        let clock = ManualClock::starting_now();
        let settings = RateLimitSettings { max_tracked_identities: 3, ..RateLimitSettings::default() };
        let limiter = RateLimiter::new(settings).with_clock(Arc::new(clock.clone()));

        for name in ["oldest", "middle", "newest"] {
            limiter.check(&fp(name), "/test", ROUTE).unwrap();
            clock.advance(Duration::from_secs(1));
        }
        // Touch "oldest" so "middle" becomes the least recently seen.
        limiter.check(&fp("oldest"), "/test", ROUTE).unwrap();
        clock.advance(Duration::from_secs(1));

        limiter.check(&fp("fourth"), "/test", ROUTE).unwrap();

        assert_eq!(limiter.tracked_identities(), 3);
        assert!(limiter.snapshot(&fp("middle")).is_none());
        assert!(limiter.snapshot(&fp("oldest")).is_some());
        assert!(limiter.snapshot(&fp("fourth")).is_some());
    }

    #[test]
    fn test_evicted_record_is_marked_and_caller_gets_fresh_record() {
        let clock = ManualClock::starting_now();
        let settings = RateLimitSettings { max_tracked_identities: 3, ..RateLimitSettings::default() };
        let limiter = RateLimiter::new(settings).with_clock(Arc::new(clock.clone()));

        for name in ["first", "second", "third"] {
            limiter.check(&fp(name), "/test", ROUTE).unwrap();
            clock.advance(Duration::from_secs(1));
        }
        // A request that fetched "first" just before it was evicted.
        let stale = limiter.existing(&fp("first")).unwrap();

        limiter.check(&fp("fourth"), "/test", ROUTE).unwrap();
        assert!(limiter.snapshot(&fp("first")).is_none());
        assert!(stale.lock().evicted);

        let decision = limiter.check(&fp("first"), "/test", ROUTE).unwrap();
        assert_eq!(decision.remaining, 69);
        let fresh = limiter.existing(&fp("first")).unwrap();
        assert!(!Arc::ptr_eq(&stale, &fresh));
        assert_eq!(limiter.snapshot(&fp("first")).unwrap().requests_in_window, 1);
    }

    #[test]
    fn test_window_beyond_representable_time_keeps_requests() {
        let clock = ManualClock::starting_now();
        let settings = RateLimitSettings {
            window: Duration::from_secs(9_500_000_000_000),
            decay_interval: Duration::from_secs(u64::MAX / 2),
            ..RateLimitSettings::default()
        };
        let limiter = RateLimiter::new(settings).with_clock(Arc::new(clock.clone()));
        let id = fp("caller");

        for _ in 0..3 {
            limiter.check(&id, "/test", ROUTE).unwrap();
        }
        limiter.record_malformed(&id, "bad_payload").unwrap();
        clock.advance(Duration::from_secs(86_400));

        assert_eq!(limiter.get_remaining(&id, ROUTE), 32);
        let snapshot = limiter.snapshot(&id).unwrap();
        assert_eq!(snapshot.requests_in_window, 3);
        assert_eq!(snapshot.malformed_count, 1);
    }

    #[test]
    fn test_penalty_and_block_events() {
        let bus = SecurityEventBus::new(32);
        let mut rx = bus.subscribe();
        let (limiter, _) = limiter();
        let limiter = limiter.with_event_sink(Arc::new(bus));
        let id = fp("caller");

        for _ in 0..5 {
            let _ = limiter.record_malformed(&id, "bad\npayload");
        }

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let SecurityEvent::RateLimitPenalty { reason, .. } = &event {
                assert_eq!(reason, "bad?payload");
            }
            assert_eq!(event.fingerprint(), Some(&id));
            names.push(event.name());
        }
        assert_eq!(
            names,
            vec![
                "rate_limit.penalty",
                "rate_limit.penalty",
                "rate_limit.penalty",
                "rate_limit.penalty",
                "rate_limit.penalty",
                "rate_limit.blocked",
            ]
        );
    }

    #[test]
    fn test_concurrent_checks_never_exceed_limit() {
        let limiter = Arc::new(RateLimiter::new(RateLimitSettings::default()));
        let id = fp("shared");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                let id = id.clone();
                std::thread::spawn(move || {
                    (0..20).filter(|_| limiter.check(&id, "/test", ROUTE).is_ok()).count()
                })
            })
            .collect();

        let allowed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(allowed, 70);
    }
}
