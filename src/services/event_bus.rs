//! Event bus (spec §4.5). A single-writer/multi-reader pub/sub backbone
//! built on `tokio::sync::broadcast`, grounded on the teacher's
//! `services/event_bus.rs` (`EventBusConfig`, sequence assignment,
//! bounded-channel publish/subscribe). Per spec §9 "Global mutable
//! singletons": the bus is passed as an explicit `Arc` dependency to every
//! component, never reached via process-wide state, so scenarios S1–S6 stay
//! deterministic under test.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::warn;

use crate::domain::models::event::{Event, EventPayload, SequenceNumber};

/// `channel_capacity` bounds the broadcast ring buffer (spec §4.5
/// "Delivery": bounded buffering, drop-oldest on overflow).
#[derive(Debug, Clone, Copy)]
pub struct EventBusConfig {
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { channel_capacity: 1024 }
    }
}

/// The publish/subscribe backbone (spec §4.5). Cheaply cloneable; every
/// component that needs to publish or subscribe holds an `Arc<EventBus>` or
/// a clone, never a global.
pub struct EventBus {
    source_id: String,
    sender: broadcast::Sender<Event>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(source_id: impl Into<String>, config: EventBusConfig) -> Arc<Self> {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Arc::new(Self {
            source_id: source_id.into(),
            sender,
            sequence: AtomicU64::new(0),
        })
    }

    /// Assigns the next sequence number and broadcasts the event. Never
    /// called while a core lock is held (spec §9 "no event is published
    /// while any core lock is held").
    pub fn publish(&self, payload: EventPayload) -> SequenceNumber {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            sequence,
            timestamp: Utc::now(),
            source_id: self.source_id.clone(),
            payload,
        };
        // `send` only errors when there are zero receivers; a bus with no
        // subscribers yet is a normal startup state, not a failure.
        let _ = self.sender.send(event);
        sequence
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Drains a subscription, invoking `sink` per event and publishing
/// `subscriber_overflow` back onto `bus` when the receiver lags (spec §4.5
/// "Delivery": slow subscribers must not stall the bus).
pub async fn run_sink(
    bus: Arc<EventBus>,
    mut receiver: broadcast::Receiver<Event>,
    sink: Arc<dyn crate::domain::ports::EventSink>,
) {
    loop {
        match receiver.recv().await {
            Ok(event) => sink.handle(&event.payload).await,
            Err(broadcast::error::RecvError::Lagged(dropped)) => {
                warn!(subscriber = sink.name(), dropped, "event subscriber fell behind");
                bus.publish(EventPayload::SubscriberOverflow {
                    subscriber: sink.name().to_string(),
                    dropped,
                });
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
