//! Shared collaborators handed to every composition.

use std::sync::Arc;

use mixcast_common::config::{AudioDefaults, CompositionDefaults};
use mixcast_host_core::actor::EngineHandle;
use mixcast_host_core::audio::AudioSlotTable;
use mixcast_host_core::events::EventSink;

/// What a composition needs from the engine it lives in.
#[derive(Clone)]
pub struct CompositionContext {
    pub engine: EngineHandle,
    pub sink: Arc<dyn EventSink>,
    pub slots: Arc<AudioSlotTable>,
    pub defaults: CompositionDefaults,
    pub audio: AudioDefaults,
}

impl CompositionContext {
    pub fn new(
        engine: EngineHandle,
        sink: Arc<dyn EventSink>,
        slots: Arc<AudioSlotTable>,
        defaults: CompositionDefaults,
        audio: AudioDefaults,
    ) -> Self {
        Self {
            engine,
            sink,
            slots,
            defaults,
            audio,
        }
    }

    pub fn publish(&self, event: &str, payload: serde_json::Value) {
        self.sink.publish(event, payload);
    }
}

impl std::fmt::Debug for CompositionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositionContext")
            .field("engine", &self.engine)
            .field("slots", &self.slots)
            .finish()
    }
}
