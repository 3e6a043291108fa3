//! Event types for the Snaily event system
//!
//! Provides the shared event enum and the EventBus used to fan events out to
//! in-process listeners and SSE clients.

use crate::status::PwaStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Snaily event types
///
/// Events are broadcast via EventBus and serialized for SSE transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SnailyEvent {
    /// Any field of the lifecycle status changed
    StatusChanged {
        status: PwaStatus,
        timestamp: DateTime<Utc>,
    },

    /// A word's clip was found in one of the cache tiers
    ClipResolved {
        word: String,
        /// Tier that produced the clip: "memory", "durable" or "network"
        tier: String,
        bytes: usize,
        timestamp: DateTime<Utc>,
    },

    /// Playback of a clip began
    PlaybackStarted {
        word: String,
        timestamp: DateTime<Utc>,
    },

    /// Playback ended (completed, stopped, timed out or failed)
    PlaybackFinished {
        word: String,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// A record was appended to the offline event log
    OfflineEventRecorded {
        id: String,
        kind: String,
        timestamp: DateTime<Utc>,
    },

    /// A sync pass over the offline event log finished
    SyncCompleted {
        attempted: usize,
        succeeded: usize,
        timestamp: DateTime<Utc>,
    },

    /// A cache version took control; stale partitions were removed
    CacheActivated {
        version: String,
        removed_namespaces: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// Cached data was cleared ("audio" or "all")
    CacheCleared {
        scope: String,
        timestamp: DateTime<Utc>,
    },

    /// A preload run finished
    PreloadFinished {
        requested: usize,
        loaded: usize,
        failed: usize,
        timestamp: DateTime<Utc>,
    },
}

impl SnailyEvent {
    /// Event type name, used as the SSE `event:` field
    pub fn event_type(&self) -> &'static str {
        match self {
            SnailyEvent::StatusChanged { .. } => "StatusChanged",
            SnailyEvent::ClipResolved { .. } => "ClipResolved",
            SnailyEvent::PlaybackStarted { .. } => "PlaybackStarted",
            SnailyEvent::PlaybackFinished { .. } => "PlaybackFinished",
            SnailyEvent::OfflineEventRecorded { .. } => "OfflineEventRecorded",
            SnailyEvent::SyncCompleted { .. } => "SyncCompleted",
            SnailyEvent::CacheActivated { .. } => "CacheActivated",
            SnailyEvent::CacheCleared { .. } => "CacheCleared",
            SnailyEvent::PreloadFinished { .. } => "PreloadFinished",
        }
    }
}

/// Central event distribution bus
///
/// Thin wrapper over a tokio broadcast channel. Slow subscribers lag and
/// lose the oldest events rather than blocking emitters.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SnailyEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// # Examples
    ///
    /// ```
    /// use snaily_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<SnailyEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: SnailyEvent,
    ) -> Result<usize, broadcast::error::SendError<SnailyEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SnailyEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_subscribers_is_err() {
        let bus = EventBus::new(10);
        let result = bus.emit(SnailyEvent::CacheCleared {
            scope: "audio".to_string(),
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
        // lossy variant must not panic either
        bus.emit_lossy(SnailyEvent::CacheCleared {
            scope: "audio".to_string(),
            timestamp: Utc::now(),
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(SnailyEvent::SyncCompleted {
            attempted: 3,
            succeeded: 2,
            timestamp: Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            SnailyEvent::SyncCompleted { attempted, succeeded, .. } => {
                assert_eq!(attempted, 3);
                assert_eq!(succeeded, 2);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_serialized_event_carries_type_tag() {
        let event = SnailyEvent::PlaybackStarted {
            word: "cat".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PlaybackStarted");
        assert_eq!(json["word"], "cat");
        assert_eq!(event.event_type(), "PlaybackStarted");
    }
}
