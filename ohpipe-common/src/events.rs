//! Pipeline event types and EventBus
//!
//! Elements report lifecycle notifications (state changes, stream info,
//! starvation, applied delays) through the EventBus. Emission is a
//! non-blocking broadcast send, so reporting never stalls the audio thread;
//! slow subscribers lose the oldest events instead.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Pipeline event types
///
/// Serializable so the reporting layer can forward them unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// An element's state machine changed state
    PipelineStateChanged {
        /// Element name (e.g. "StarvationRamper")
        element: String,
        /// State before the change
        old_state: String,
        /// State after the change
        new_state: String,
        /// When the state changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A decoded stream started flowing
    StreamInfoChanged {
        /// Stream id
        stream_id: u32,
        /// Sample rate in Hz
        sample_rate: u32,
        /// Bit depth
        bit_depth: u32,
        /// Channel count
        channels: u32,
        /// "pcm" or "dsd"
        format: String,
        /// Whether the stream is live
        live: bool,
        /// When the stream started
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Starvation started or ended
    Starving {
        /// Mode the pipeline was in
        mode: String,
        /// Stream that starved
        stream_id: u32,
        /// true when starvation begins, false when audio resumes
        starving: bool,
        /// When starvation changed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A variable delay instance finished applying a delay change
    DelayApplied {
        /// Element name ("VariableDelayLeft" / "VariableDelayRight")
        element: String,
        /// Delay now realized by that element
        delay_jiffies: u64,
        /// When the change completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A targeted flush completed
    FlushCompleted {
        /// Element that waited for the flush
        element: String,
        /// Flush id observed
        flush_id: u32,
        /// When the flush completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The animator rejected a stream format
    FormatRejected {
        /// Rejected stream
        stream_id: u32,
        /// Why the animator rejected it
        reason: String,
        /// When the stream was rejected
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Receiver phase aligned to the sender at stream start
    PhaseAligned {
        /// Aligned stream
        stream_id: u32,
        /// Audio dropped to align (jiffies)
        dropped_jiffies: u64,
        /// Silence injected to align (jiffies)
        injected_jiffies: u64,
        /// When alignment completed
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A drain barrier was inserted into the pipeline
    DrainInserted {
        /// Drain id
        drain_id: u32,
        /// "starvation" or "halt"
        cause: String,
        /// When the drain was created
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

/// Central event distribution bus
///
/// Uses a tokio broadcast channel: sending never blocks and never needs a
/// runtime, subscribers may consume from async tasks or with `try_recv`.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the given channel capacity
    ///
    /// ```
    /// use ohpipe_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(256);
    /// assert_eq!(event_bus.capacity(), 256);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case
    ///
    /// This is what elements use from the audio thread.
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
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

    fn starving(starving: bool) -> PipelineEvent {
        PipelineEvent::Starving {
            mode: "Playlist".to_string(),
            stream_id: 7,
            starving,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_an_error() {
        let bus = EventBus::new(8);
        assert!(bus.emit(starving(true)).is_err());
        // Lossy emit swallows the same condition
        bus.emit_lossy(starving(true));
    }

    #[test]
    fn test_subscriber_receives_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit(starving(true)).unwrap();
        bus.emit(starving(false)).unwrap();

        match rx.try_recv().unwrap() {
            PipelineEvent::Starving { starving, .. } => assert!(starving),
            other => panic!("unexpected event {:?}", other),
        }
        match rx.try_recv().unwrap() {
            PipelineEvent::Starving { starving, .. } => assert!(!starving),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for _ in 0..5 {
            bus.emit_lossy(starving(true));
        }
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = PipelineEvent::DelayApplied {
            element: "VariableDelayLeft".to_string(),
            delay_jiffies: 56_448,
            timestamp: chrono::Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "DelayApplied");
        assert_eq!(json["delay_jiffies"], 56_448);
    }
}
