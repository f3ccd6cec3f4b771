//! The engine context.
//!
//! One value owns everything: the engine thread (and through it the host),
//! the audio slot table, both composition registries and the output
//! registry. It is passed by reference to whatever drives it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;

use mixcast_common::config::EngineConfig;
use mixcast_common::error::{MixcastError, MixcastResult};
use mixcast_composition::audio::{AudioComposition, AudioCompositionSnapshot, AudioCompositionSpec};
use mixcast_composition::context::CompositionContext;
use mixcast_composition::custom::CompositionSpec;
use mixcast_composition::registry::CompositionRegistry;
use mixcast_composition::scene::Scene;
use mixcast_composition::video::{CompositionSnapshot, VideoComposition};
use mixcast_host_core::actor::{EngineHandle, EngineThread};
use mixcast_host_core::audio::AudioSlotTable;
use mixcast_host_core::events::EventSink;
use mixcast_host_core::host::{HostEngine, HostEvent, OutputKind, TransitionKind};
use mixcast_output::output::{Output, OutputSnapshot, OutputSpec};
use mixcast_output::registry::OutputRegistry;

pub struct EngineContext {
    thread: Option<EngineThread>,
    config: EngineConfig,
    ctx: CompositionContext,
    videos: CompositionRegistry<VideoComposition>,
    audios: CompositionRegistry<AudioComposition>,
    outputs: OutputRegistry,
}

impl EngineContext {
    /// Move `host` onto a new engine thread and set up the native
    /// compositions and host-native outputs.
    pub fn start(
        host: Box<dyn HostEngine>,
        config: EngineConfig,
        sink: Arc<dyn EventSink>,
    ) -> MixcastResult<Self> {
        config.validate()?;
        let thread = EngineThread::spawn(host)?;
        let slots = Arc::new(AudioSlotTable::new(config.audio.slot_count));
        let ctx = CompositionContext::new(
            thread.handle(),
            Arc::clone(&sink),
            slots,
            config.compositions.clone(),
            config.audio.clone(),
        );
        let videos = CompositionRegistry::new(VideoComposition::native(ctx.clone()));
        let audios = CompositionRegistry::new(AudioComposition::native(ctx.clone()));
        let outputs = OutputRegistry::new(
            thread.handle(),
            sink,
            config.outputs.clone(),
            &videos,
            &audios,
        )?;

        tracing::info!(
            audio_slots = config.audio.slot_count,
            alignment = config.compositions.dimension_alignment,
            "Engine context started"
        );
        Ok(Self {
            thread: Some(thread),
            config,
            ctx,
            videos,
            audios,
            outputs,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.ctx.engine
    }

    pub fn audio_slots(&self) -> &AudioSlotTable {
        &self.ctx.slots
    }

    pub fn compositions(&self) -> &CompositionRegistry<VideoComposition> {
        &self.videos
    }

    pub fn audio_compositions(&self) -> &CompositionRegistry<AudioComposition> {
        &self.audios
    }

    pub fn outputs(&self) -> &OutputRegistry {
        &self.outputs
    }

    pub fn composition(&self, id: &str) -> MixcastResult<Arc<VideoComposition>> {
        self.videos.try_get(id)
    }

    pub fn output(&self, id: &str) -> MixcastResult<Arc<Output>> {
        self.outputs.try_get(id)
    }

    // Video compositions

    pub fn create_composition(&self, spec: &CompositionSpec) -> MixcastResult<CompositionSnapshot> {
        let composition = VideoComposition::create_custom(spec, self.ctx.clone())?;
        let snapshot = self.videos.insert_new(composition)?;
        self.ctx.publish(
            "CompositionCreated",
            json!({ "compositionId": snapshot.id, "name": snapshot.name }),
        );
        Ok(snapshot)
    }

    /// All-or-nothing. False if any id is unknown, native or still leased.
    pub fn remove_compositions_by_ids(&self, ids: &[String]) -> bool {
        match self.videos.remove_by_ids(ids) {
            Ok(removed) => {
                for composition in removed {
                    self.ctx.publish(
                        "CompositionRemoved",
                        json!({ "compositionId": composition.id() }),
                    );
                }
                true
            }
            Err(e) => {
                tracing::warn!(?ids, error = %e, "Compositions not removed");
                false
            }
        }
    }

    pub fn serialize_all_compositions(&self) -> BTreeMap<String, CompositionSnapshot> {
        self.videos.serialize_all()
    }

    // Audio compositions

    pub fn create_audio_composition(
        &self,
        spec: &AudioCompositionSpec,
    ) -> MixcastResult<AudioCompositionSnapshot> {
        let composition = AudioComposition::create_custom(spec, self.ctx.clone())?;
        self.audios.insert_new(composition)
    }

    pub fn remove_audio_compositions_by_ids(&self, ids: &[String]) -> bool {
        match self.audios.remove_by_ids(ids) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(?ids, error = %e, "Audio compositions not removed");
                false
            }
        }
    }

    pub fn serialize_all_audio_compositions(&self) -> BTreeMap<String, AudioCompositionSnapshot> {
        self.audios.serialize_all()
    }

    /// Holder tags and counts of a video or audio composition's leases.
    /// Only populated in debug builds.
    pub fn composition_holders(&self, id: &str) -> MixcastResult<BTreeMap<String, usize>> {
        if let Some(composition) = self.videos.get(id) {
            return Ok(composition.holders());
        }
        if let Some(composition) = self.audios.get(id) {
            return Ok(composition.holders());
        }
        Err(MixcastError::not_found("composition", id))
    }

    // Scenes and transitions

    pub fn add_scene(&self, composition_id: &str, name: &str) -> MixcastResult<Scene> {
        self.composition(composition_id)?.add_scene(name)
    }

    /// Removes the scene, switching away from it first if it is current.
    pub fn remove_scene(&self, composition_id: &str, name: &str) -> MixcastResult<()> {
        self.composition(composition_id)?.safe_remove_scene(name)
    }

    pub fn set_current_scene(&self, composition_id: &str, name: &str) -> MixcastResult<bool> {
        self.composition(composition_id)?.set_current_scene(name)
    }

    pub fn set_transition(&self, composition_id: &str, kind: TransitionKind) -> MixcastResult<()> {
        self.composition(composition_id)?.set_transition(kind)
    }

    pub fn set_transition_duration(&self, composition_id: &str, duration_ms: u32) -> MixcastResult<()> {
        self.composition(composition_id)?
            .set_transition_duration(duration_ms)
    }

    // Outputs

    pub fn create_output(&self, kind: OutputKind, spec: &OutputSpec) -> MixcastResult<OutputSnapshot> {
        let output = self
            .outputs
            .create(kind, spec, &self.videos, &self.audios)?;
        Ok(output.snapshot())
    }

    pub fn enable_output(&self, id: &str) -> bool {
        self.set_output_enabled(id, true)
    }

    pub fn disable_output(&self, id: &str) -> bool {
        self.set_output_enabled(id, false)
    }

    fn set_output_enabled(&self, id: &str, enabled: bool) -> bool {
        match self.outputs.set_enabled(id, enabled) {
            Ok(done) => done,
            Err(e) => {
                tracing::warn!(id, enabled, error = %e, "Output enable request failed");
                false
            }
        }
    }

    pub fn start_output(&self, id: &str) -> bool {
        self.outputs.get(id).is_some_and(|o| o.start())
    }

    pub fn stop_output(&self, id: &str) -> bool {
        match self.outputs.get(id) {
            Some(output) => {
                output.stop();
                true
            }
            None => false,
        }
    }

    pub fn remove_outputs_by_ids(&self, ids: &[String]) -> bool {
        match self.outputs.remove_by_ids(ids) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(?ids, error = %e, "Outputs not removed");
                false
            }
        }
    }

    pub fn serialize_all_outputs(&self, kind: Option<OutputKind>) -> BTreeMap<String, OutputSnapshot> {
        self.outputs.serialize_all(kind)
    }

    pub fn set_paused(&self, id: &str, paused: bool) -> bool {
        self.outputs.get(id).is_some_and(|o| o.set_paused(paused))
    }

    pub fn save_replay_buffer(&self, id: &str) -> bool {
        self.outputs.get(id).is_some_and(|o| o.save_replay())
    }

    // Host lifecycle

    pub fn handle_host_event(&self, event: HostEvent) {
        tracing::debug!(?event, "Host event");
        if event == HostEvent::SceneCollectionReset {
            for composition in self.videos.all() {
                if let Err(e) = composition.handle_host_collection_reset() {
                    tracing::error!(id = %composition.id(), error = %e, "Collection reset failed");
                }
            }
        }
        self.outputs.handle_host_event(event);
    }

    /// Stop every output, tear down every custom composition and stop the
    /// engine thread. Returns the host.
    pub fn shutdown(mut self) -> MixcastResult<Box<dyn HostEngine>> {
        self.release_all();
        let thread = self
            .thread
            .take()
            .ok_or_else(|| MixcastError::engine("engine already shut down"))?;
        thread.shutdown()
    }

    fn release_all(&mut self) {
        let outputs = self.outputs.shutdown();
        let videos = self.videos.drain_custom().len();
        let audios = self.audios.drain_custom().len();
        for native in self.audios.all() {
            if let Err(e) = native.teardown() {
                tracing::warn!(id = %native.id(), error = %e, "Native audio teardown failed");
            }
        }
        tracing::info!(outputs, videos, audios, "Engine context released");
    }
}

impl Drop for EngineContext {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.release_all();
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("compositions", &self.videos)
            .field("audio_compositions", &self.audios)
            .field("outputs", &self.outputs)
            .finish()
    }
}
