//! EventBus — broadcast fan-out of history updates to live sessions.
//!
//! Whenever a command record is committed, the bus notifies every
//! subscribed session so it can push a refreshed history snapshot to its
//! client. Slow subscribers lag rather than blocking the publisher; a
//! lagged subscriber recovers by re-reading the log.

use serde::Serialize;
use tokio::sync::broadcast;

/// Events delivered to every active session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BroadcastEvent {
    /// A command record was committed to the history log. Recipients
    /// re-read the log rather than trusting a payload copy, so each
    /// observes the log's own order.
    HistoryAppended {
        /// Id of the committed record
        record_id: String,
    },
}

/// Broadcast-based event bus.
///
/// Uses `tokio::broadcast` so multiple subscribers can receive the same
/// events. A subscriber that falls behind by more than the channel
/// capacity receives `RecvError::Lagged` instead of blocking the sender.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BroadcastEvent>,
}

impl EventBus {
    /// Create a new EventBus with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events. Each subscriber gets an independent copy of
    /// every event published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all active subscribers.
    ///
    /// Returns the number of subscribers that received the event. With no
    /// subscribers the event is silently dropped.
    pub fn publish(&self, event: BroadcastEvent) -> usize {
        // send() returns Err if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Current number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(BroadcastEvent::HistoryAppended {
            record_id: "2026-01-01T00:00:00.000000000Z".to_string(),
        });

        let BroadcastEvent::HistoryAppended { record_id } = rx.recv().await.unwrap();
        assert_eq!(record_id, "2026-01-01T00:00:00.000000000Z");
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        assert_eq!(bus.subscriber_count(), 2);

        let count = bus.publish(BroadcastEvent::HistoryAppended {
            record_id: "r1".to_string(),
        });
        assert_eq!(count, 2);

        let BroadcastEvent::HistoryAppended { record_id: a } = rx1.recv().await.unwrap();
        let BroadcastEvent::HistoryAppended { record_id: b } = rx2.recv().await.unwrap();
        assert_eq!(a, "r1");
        assert_eq!(b, "r1");
    }

    #[test]
    fn test_publish_no_subscribers() {
        let bus = EventBus::new(16);
        // No subscribers — should not panic
        let count = bus.publish(BroadcastEvent::HistoryAppended {
            record_id: "r1".to_string(),
        });
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_event_ordering() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        for id in ["a", "b", "c"] {
            bus.publish(BroadcastEvent::HistoryAppended {
                record_id: id.to_string(),
            });
        }

        for expected in ["a", "b", "c"] {
            let BroadcastEvent::HistoryAppended { record_id } = rx.recv().await.unwrap();
            assert_eq!(record_id, expected);
        }
    }

    #[test]
    fn test_event_serialization() {
        let event = BroadcastEvent::HistoryAppended {
            record_id: "r1".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"history_appended\""));
        assert!(json.contains("\"record_id\":\"r1\""));
    }

    #[test]
    fn test_default_capacity() {
        let bus = EventBus::default();
        assert_eq!(bus.subscriber_count(), 0);
    }
}
