//! In-process publish/subscribe fan-out of session events to live clients.
//!
//! Grounded on the teacher's `ws::WsState` — a `tokio::sync::broadcast`
//! channel wrapped for cheap clone-and-share — but keyed per session rather
//! than global: the specification scopes subscriptions by session id, and a
//! single global channel would force every subscriber to filter out every
//! other session's traffic. Channels are created lazily on first publish or
//! subscribe and are never torn down proactively; an unsubscribed channel
//! with no receivers is cheap to hold and is dropped along with the bus.
//!
//! Delivery is best-effort and non-blocking: `broadcast::Sender::send`
//! never waits on a slow subscriber, and a subscriber that falls behind
//! simply lags (observed as `RecvError::Lagged` on its own receiver) rather
//! than stalling the publisher.

use blackboard_core::SessionId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub event_type: &'static str,
    pub session_id: String,
    pub data: JsonValue,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn message_added(session_id: &SessionId, data: JsonValue) -> Self {
        Self::new("message_added", session_id, data)
    }

    pub fn message_visibility_changed(session_id: &SessionId, data: JsonValue) -> Self {
        Self::new("message_visibility_changed", session_id, data)
    }

    pub fn memory_updated(session_id: &SessionId, data: JsonValue) -> Self {
        Self::new("memory_updated", session_id, data)
    }

    fn new(event_type: &'static str, session_id: &SessionId, data: JsonValue) -> Self {
        Self {
            event_type,
            session_id: session_id.as_str().to_string(),
            data,
            timestamp: Utc::now(),
        }
    }
}

#[derive(Default)]
pub struct NotificationBus {
    channels: DashMap<SessionId, broadcast::Sender<NotificationEvent>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes an event for `session_id`. Only ever called after the
    /// database commit that produced it has succeeded. Dropped silently if
    /// no one is subscribed yet.
    pub fn publish(&self, session_id: &SessionId, event: NotificationEvent) {
        if let Some(tx) = self.channels.get(session_id) {
            let _ = tx.send(event);
        }
    }

    pub fn subscribe(&self, session_id: &SessionId) -> broadcast::Receiver<NotificationEvent> {
        self.channels
            .entry(session_id.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = NotificationBus::new();
        let session_id = SessionId::parse("session1").unwrap();
        let mut rx = bus.subscribe(&session_id);

        bus.publish(
            &session_id,
            NotificationEvent::message_added(&session_id, serde_json::json!({"message_id": 1})),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, "message_added");
        assert_eq!(event.session_id, "session1");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = NotificationBus::new();
        let session_id = SessionId::parse("session1").unwrap();
        bus.publish(&session_id, NotificationEvent::memory_updated(&session_id, serde_json::json!({})));
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let bus = NotificationBus::new();
        let a = SessionId::parse("session-a").unwrap();
        let b = SessionId::parse("session-b").unwrap();
        let mut rx_a = bus.subscribe(&a);
        let _rx_b = bus.subscribe(&b);

        bus.publish(&b, NotificationEvent::message_added(&b, serde_json::json!({})));

        assert!(rx_a.try_recv().is_err());
    }
}
