// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Security Event Bus - Pub/Sub for gate decisions
//
// In-memory fan-out over a tokio broadcast channel. Each published event is
// also written as one structured tracing record, so a deployment with no
// subscribers still keeps the forensic trail in its logs.
//
// Publishing never blocks: a full channel overwrites the oldest buffered
// event and slow receivers observe `Lagged`.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::events::{AbuseClass, SecurityEvent, SecurityEventSink};

/// Event bus carrying [`SecurityEvent`]s to subscribers and the log.
#[derive(Clone)]
pub struct SecurityEventBus {
    sender: Arc<broadcast::Sender<SecurityEvent>>,
}

impl SecurityEventBus {
    /// Create a bus buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create a bus with the default capacity (1000).
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    /// Log `event` and hand it to every current subscriber.
    pub fn publish(&self, event: SecurityEvent) {
        log_event(&event);

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to security event");
        }
    }

    pub fn subscribe(&self) -> SecurityEventReceiver {
        SecurityEventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for SecurityEventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

impl SecurityEventSink for SecurityEventBus {
    fn emit(&self, event: SecurityEvent) {
        self.publish(event);
    }
}

/// Write one structured record per event. Benign traffic logs at info,
/// anything classified as abuse at warn.
fn log_event(event: &SecurityEvent) {
    let name = event.name();
    let class = event.abuse_class();
    let fingerprint = event.fingerprint().map(|fp| fp.as_str()).unwrap_or("-");
    let detail = serde_json::to_string(event).unwrap_or_default();

    if class == AbuseClass::Benign {
        info!(
            target: "bulwark::security",
            event = name,
            abuse_class = class.as_str(),
            fingerprint,
            detail = %detail,
            "security event"
        );
    } else {
        warn!(
            target: "bulwark::security",
            event = name,
            abuse_class = class.as_str(),
            fingerprint,
            detail = %detail,
            "security event"
        );
    }
}

/// Receiver for all security events.
pub struct SecurityEventReceiver {
    receiver: broadcast::Receiver<SecurityEvent>,
}

impl SecurityEventReceiver {
    /// Receive the next event, waiting until one is available.
    pub async fn recv(&mut self) -> Result<SecurityEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Security event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without waiting.
    pub fn try_recv(&mut self) -> Result<SecurityEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Security event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::identity::IdentityFingerprint;
    use chrono::Utc;

    fn penalty(n: u32) -> SecurityEvent {
        SecurityEvent::RateLimitPenalty {
            fingerprint: IdentityFingerprint::from_credential("token"),
            reason: "bad_payload".to_string(),
            penalty_multiplier: 0.5,
            malformed_count: n,
            occurred_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = SecurityEventBus::new(10);
        let mut receiver = bus.subscribe();

        bus.emit(penalty(1));

        match receiver.recv().await.unwrap() {
            SecurityEvent::RateLimitPenalty { malformed_count, .. } => assert_eq!(malformed_count, 1),
            other => panic!("Wrong event type received: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = SecurityEventBus::new(10);
        let mut receiver1 = bus.subscribe();
        let mut receiver2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(penalty(1));

        assert_eq!(receiver1.recv().await.unwrap().name(), "rate_limit.penalty");
        assert_eq!(receiver2.recv().await.unwrap().name(), "rate_limit.penalty");
    }

    #[test]
    fn test_emit_without_subscribers_does_not_fail() {
        let bus = SecurityEventBus::new(4);
        bus.emit(penalty(1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_slow_receiver_lags_instead_of_blocking() {
        let bus = SecurityEventBus::new(2);
        let mut receiver = bus.subscribe();
        for n in 0..5 {
            bus.emit(penalty(n));
        }
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Lagged(3))));
        assert!(receiver.try_recv().is_ok());
    }

    #[test]
    fn test_empty_receiver() {
        let bus = SecurityEventBus::new(2);
        let mut receiver = bus.subscribe();
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }
}
