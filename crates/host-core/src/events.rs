//! Event publication.
//!
//! Observers are reached through an opaque `publish(event, payload)`
//! capability. Publishing never blocks on the observer and never fails from
//! the publisher's point of view.

use parking_lot::Mutex;
use serde::Serialize;

/// Fire-and-forget event publication.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &str, payload: serde_json::Value);
}

/// Logs every event at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &str, payload: serde_json::Value) {
        tracing::debug!(event, %payload, "Published event");
    }
}

/// A published event kept by [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishedEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

/// Keeps published events in memory, in publication order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PublishedEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events.lock().clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.name.clone()).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.lock().iter().filter(|e| e.name == name).count()
    }

    /// Most recent event with this name.
    pub fn last(&self, name: &str) -> Option<PublishedEvent> {
        self.events
            .lock()
            .iter()
            .rev()
            .find(|e| e.name == name)
            .cloned()
    }

    /// Drain everything published so far.
    pub fn take(&self) -> Vec<PublishedEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: &str, payload: serde_json::Value) {
        tracing::trace!(event, "Recorded event");
        self.events.lock().push(PublishedEvent {
            name: event.to_string(),
            payload,
        });
    }
}
