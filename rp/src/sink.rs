//! Event sinks - where classified activity goes
//!
//! The engine only ever calls [`ActivitySink::emit`]. Delivery is best-effort:
//! a sink must not block and the engine never retries.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::activity::ActivityEvent;

/// Default broadcast capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Receives activity events; must return promptly
pub trait ActivitySink: Send + Sync {
    fn emit(&self, event: ActivityEvent);
}

/// Single-consumer sink backed by a bounded channel
///
/// Events are dropped with a warning when the consumer falls behind or has
/// gone away, so a slow consumer never stalls classification.
#[derive(Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<ActivityEvent>,
}

impl ChannelSink {
    /// Create a sink and the receiver its events arrive on
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ActivityEvent>) {
        debug!(capacity, "ChannelSink::new: called");
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

impl ActivitySink for ChannelSink {
    fn emit(&self, event: ActivityEvent) {
        debug!(kind = %event.kind(), repository_id = %event.repository_id, "ChannelSink::emit");
        if let Err(e) = self.tx.try_send(event) {
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(event) => ("full", event),
                mpsc::error::TrySendError::Closed(event) => ("closed", event),
            };
            warn!(
                reason,
                kind = %event.kind(),
                repository_id = %event.repository_id,
                "Dropping activity event"
            );
        }
    }
}

/// Fan-out sink for many consumers
///
/// Receivers that lag lose the oldest events; with no subscribers events
/// are dropped.
pub struct EventBus {
    tx: broadcast::Sender<ActivityEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        debug!("EventBus::subscribe: new subscriber");
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl ActivitySink for EventBus {
    fn emit(&self, event: ActivityEvent) {
        debug!(kind = %event.kind(), repository_id = %event.repository_id, "EventBus::emit");
        // No subscribers is fine
        let _ = self.tx.send(event);
    }
}

impl<S: ActivitySink + ?Sized> ActivitySink for Arc<S> {
    fn emit(&self, event: ActivityEvent) {
        (**self).emit(event)
    }
}
