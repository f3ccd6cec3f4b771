//! Video compositions.
//!
//! A composition is either the host's own main pipeline ([`CompositionKind::Native`],
//! every operation delegates to the host) or an independent pipeline built
//! and owned here ([`CompositionKind::Custom`]). Custom state sits behind a
//! read/write lock: queries share it, mutations take it exclusively, so scene
//! switches on one composition are totally ordered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;

use mixcast_common::error::{MixcastError, MixcastResult};
use mixcast_host_core::events::EventSink;
use mixcast_host_core::handle::{EncoderHandle, SceneHandle, TransitionHandle, VideoSource};
use mixcast_host_core::host::{EncoderInfo, HostEngine, OutputKind, TransitionKind};
use mixcast_host_core::signal::{SignalConnection, TransitionSignal};

use crate::context::CompositionContext;
use crate::custom::{self, CompositionSpec, CustomVideo};
use crate::lease::{CompositionListener, Lease, Leasable, ListenerSet, RefCounter};
use crate::registry::Composition;
use crate::scene::{Scene, SceneSet};
use crate::transition::{execute_switch, plan_switch, SwitchPlan, TransitionStatus};

/// Fixed id of the host's main video composition.
pub const NATIVE_VIDEO_ID: &str = "native";

/// A consumer's hold on a video composition.
pub type CompositionInfo = Lease<VideoComposition>;

/// Native or custom.
pub enum CompositionKind {
    Native,
    Custom(RwLock<CustomVideo>),
}

/// What an output needs to encode a composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamInfo {
    pub source: VideoSource,
    pub width: u32,
    pub height: u32,
    pub streaming_encoder: Option<EncoderHandle>,
    pub recording_encoder: Option<EncoderHandle>,
}

impl StreamInfo {
    /// Video encoder an output of `kind` binds. Recording and replay buffer
    /// prefer the recording encoder and fall back to the streaming one.
    pub fn encoder_for(&self, kind: OutputKind) -> Option<EncoderHandle> {
        match kind {
            OutputKind::Streaming => self.streaming_encoder,
            OutputKind::Recording | OutputKind::ReplayBuffer => {
                self.recording_encoder.or(self.streaming_encoder)
            }
        }
    }
}

/// Encoders attached to a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderSnapshot {
    pub streaming: EncoderInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recording: Option<EncoderInfo>,
}

/// Serialized view of a video composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSnapshot {
    pub id: String,
    pub name: String,
    pub native: bool,
    pub removable: bool,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoders: Option<EncoderSnapshot>,
    pub scenes: Vec<String>,
    pub current_scene: Option<String>,
    pub transition: Option<TransitionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_duration_ms: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_slot: Option<usize>,
}

fn encoder_snapshot(
    host: &dyn HostEngine,
    streaming: Option<EncoderHandle>,
    recording: Option<EncoderHandle>,
) -> Option<EncoderSnapshot> {
    let streaming_info = host.encoder_info(streaming?)?;
    let recording = recording
        .filter(|r| Some(*r) != streaming)
        .and_then(|r| host.encoder_info(r));
    Some(EncoderSnapshot {
        streaming: streaming_info,
        recording,
    })
}

fn describe_transition(
    host: &dyn HostEngine,
    transition: Option<TransitionHandle>,
) -> Option<TransitionStatus> {
    let phase = host.transition_phase(transition?)?;
    Some(TransitionStatus::describe(phase, |s| host.scene_name(s)))
}

/// One rendering pipeline.
pub struct VideoComposition {
    id: String,
    name: String,
    ctx: CompositionContext,
    refs: RefCounter,
    listeners: Arc<ListenerSet>,
    kind: CompositionKind,
}

impl VideoComposition {
    /// The host's main pipeline.
    pub fn native(ctx: CompositionContext) -> Arc<Self> {
        Arc::new(Self {
            id: NATIVE_VIDEO_ID.to_string(),
            name: "Main".to_string(),
            ctx,
            refs: RefCounter::new(),
            listeners: Arc::new(ListenerSet::new()),
            kind: CompositionKind::Native,
        })
    }

    /// Validate `spec` and build an independent pipeline for it.
    pub fn create_custom(spec: &CompositionSpec, ctx: CompositionContext) -> MixcastResult<Arc<Self>> {
        let valid = spec.validate(&ctx.defaults)?;
        let id = uuid::Uuid::new_v4().to_string();
        let listeners = Arc::new(ListenerSet::new());
        let signals = transition_signals(&id, &ctx.sink, &listeners);
        let hook = signals.hook();

        let plan = valid.clone();
        let parts = ctx
            .engine
            .invoke(move |host| custom::assemble(host, &plan, hook))??;

        let route_source = Arc::new(AtomicU64::new(parts.transition.raw()));
        let route = Arc::clone(&route_source);
        let audio_slot = ctx
            .slots
            .assign(Arc::new(move || {
                Some(TransitionHandle(route.load(Ordering::Acquire)))
            }));
        if audio_slot.is_none() {
            tracing::warn!(id = %id, "No free audio output slot, composition audio is not routed");
        }

        tracing::info!(
            id = %id,
            name = %valid.name,
            width = valid.width,
            height = valid.height,
            ?audio_slot,
            "Created custom composition"
        );

        let state = CustomVideo {
            width: valid.width,
            height: valid.height,
            transition: parts.transition,
            route_source,
            view: parts.view,
            streaming_encoder: parts.streaming_encoder,
            recording_encoder: parts.recording_encoder,
            scenes: SceneSet::new(Scene::new(parts.scene, valid.default_scene.clone())),
            audio_slot,
            transition_duration_ms: valid.transition_duration_ms,
            signals: Some(signals),
            released: false,
        };

        Ok(Arc::new(Self {
            id,
            name: valid.name,
            ctx,
            refs: RefCounter::new(),
            listeners,
            kind: CompositionKind::Custom(RwLock::new(state)),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, CompositionKind::Native)
    }

    pub fn kind(&self) -> &CompositionKind {
        &self.kind
    }

    /// Outstanding leases.
    pub fn ref_count(&self) -> usize {
        self.refs.count()
    }

    /// Outstanding leases by holder tag (debug builds only).
    pub fn holders(&self) -> std::collections::BTreeMap<String, usize> {
        self.refs.holders()
    }

    /// Take a lease. Custom compositions are read-locked while the lease is
    /// taken, so it never observes a half-built or torn-down pipeline.
    pub fn get_composition_info(
        this: &Arc<Self>,
        listener: Option<Weak<dyn CompositionListener>>,
        holder_tag: &str,
    ) -> CompositionInfo {
        match &this.kind {
            CompositionKind::Native => Lease::acquire(Arc::clone(this), listener, holder_tag),
            CompositionKind::Custom(state) => {
                let _state = state.read();
                Lease::acquire(Arc::clone(this), listener, holder_tag)
            }
        }
    }

    pub fn dimensions(&self) -> MixcastResult<(u32, u32)> {
        match &self.kind {
            CompositionKind::Native => self.ctx.engine.invoke(|host| host.base_resolution()),
            CompositionKind::Custom(state) => Ok(state.read().dimensions()),
        }
    }

    /// Video source and encoders, as of now.
    pub fn stream_info(&self) -> MixcastResult<StreamInfo> {
        match &self.kind {
            CompositionKind::Native => self.ctx.engine.invoke(|host| {
                let (width, height) = host.base_resolution();
                let encoders = host.host_encoders();
                StreamInfo {
                    source: VideoSource::Host,
                    width,
                    height,
                    streaming_encoder: encoders.streaming_video,
                    recording_encoder: encoders.recording_video,
                }
            }),
            CompositionKind::Custom(state) => {
                let state = state.read();
                Ok(StreamInfo {
                    source: VideoSource::View(state.view),
                    width: state.width,
                    height: state.height,
                    streaming_encoder: Some(state.streaming_encoder),
                    recording_encoder: state.recording_encoder,
                })
            }
        }
    }

    pub fn scenes(&self) -> MixcastResult<Vec<Scene>> {
        match &self.kind {
            CompositionKind::Native => self.ctx.engine.invoke(|host| {
                host.host_scenes()
                    .into_iter()
                    .filter_map(|s| host.scene_name(s).map(|name| Scene::new(s, name)))
                    .collect()
            }),
            CompositionKind::Custom(state) => Ok(state.read().scenes.iter().cloned().collect()),
        }
    }

    pub fn current_scene(&self) -> MixcastResult<Option<Scene>> {
        match &self.kind {
            CompositionKind::Native => self.ctx.engine.invoke(|host| {
                let scene = host.host_program_scene()?;
                host.scene_name(scene).map(|name| Scene::new(scene, name))
            }),
            CompositionKind::Custom(state) => Ok(Some(state.read().scenes.current().clone())),
        }
    }

    pub fn transition_state(&self) -> MixcastResult<Option<TransitionStatus>> {
        match &self.kind {
            CompositionKind::Native => self
                .ctx
                .engine
                .invoke(|host| describe_transition(&*host, host.host_transition())),
            CompositionKind::Custom(state) => {
                let transition = state.read().transition;
                self.ctx
                    .engine
                    .invoke(move |host| describe_transition(&*host, Some(transition)))
            }
        }
    }

    /// Create a scene. Custom scenes are pre-sized to the composition.
    pub fn add_scene(&self, name: &str) -> MixcastResult<Scene> {
        let scene = match &self.kind {
            CompositionKind::Native => {
                let name = name.to_string();
                self.ctx.engine.invoke(move |host| {
                    check_host_scene_name(&*host, &name)?;
                    let handle = host.create_host_scene(&name)?;
                    Ok::<_, MixcastError>(Scene::new(handle, name))
                })??
            }
            CompositionKind::Custom(state) => {
                let mut state = state.write();
                state.scenes.check_new_name(name)?;
                let (width, height) = state.dimensions();
                let owned = name.to_string();
                let handle = self
                    .ctx
                    .engine
                    .invoke(move |host| host.create_scene(&owned, width, height))??;
                let scene = Scene::new(handle, name);
                state.scenes.insert(scene.clone());
                scene
            }
        };
        tracing::debug!(id = %self.id, scene = %scene.name, "Added scene");
        self.scene_list_changed();
        Ok(scene)
    }

    /// Remove a scene that is neither current nor the only one.
    pub fn remove_scene(&self, name: &str) -> MixcastResult<()> {
        self.remove_scene_inner(name, false)
    }

    /// Remove a scene, switching away from it first when it is current.
    /// The only scene is never removed.
    pub fn safe_remove_scene(&self, name: &str) -> MixcastResult<()> {
        self.remove_scene_inner(name, true)
    }

    fn remove_scene_inner(&self, name: &str, safe: bool) -> MixcastResult<()> {
        let new_current = match &self.kind {
            CompositionKind::Native => {
                let owned = name.to_string();
                self.ctx
                    .engine
                    .invoke(move |host| remove_host_scene(host, &owned, safe))??
            }
            CompositionKind::Custom(state) => {
                let mut state = state.write();
                let plan = state.scenes.plan_removal(name, safe)?;
                let transition = state.transition;
                let duration_ms = state.transition_duration_ms;
                let next = plan.new_current.as_ref().map(|s| s.handle);
                let removed = plan.removed.handle;
                self.ctx.engine.invoke(move |host| {
                    if let Some(next) = next {
                        let switch = plan_switch(host.transition_phase(transition), next, duration_ms);
                        if !execute_switch(host, transition, switch) {
                            return Err(MixcastError::resource("transition refused the switch"));
                        }
                    }
                    host.release_scene(removed);
                    Ok(())
                })??;
                state.scenes.apply_removal(&plan);
                plan.new_current.map(|s| s.name)
            }
        };

        tracing::debug!(id = %self.id, scene = name, "Removed scene");
        if let Some(current) = new_current {
            self.current_scene_changed(&current);
        }
        self.scene_list_changed();
        Ok(())
    }

    /// Switch to `name`. A switch during an in-flight blend replaces its
    /// target. Returns false when `name` is already current.
    pub fn set_current_scene(&self, name: &str) -> MixcastResult<bool> {
        let changed = match &self.kind {
            CompositionKind::Native => {
                let owned = name.to_string();
                self.ctx.engine.invoke(move |host| {
                    let scene = find_host_scene(&*host, &owned)?;
                    if host.host_program_scene() == Some(scene) {
                        return Ok(false);
                    }
                    if !host.set_host_program_scene(scene) {
                        return Err(MixcastError::resource("host refused the scene switch"));
                    }
                    Ok(true)
                })??
            }
            CompositionKind::Custom(state) => {
                let mut state = state.write();
                let target = state
                    .scenes
                    .find(name)
                    .map(|s| s.handle)
                    .ok_or_else(|| MixcastError::not_found("scene", name))?;
                if state.scenes.current().handle == target {
                    return Ok(false);
                }
                let transition = state.transition;
                let duration_ms = state.transition_duration_ms;
                let plan = self.ctx.engine.invoke(move |host| {
                    let plan = plan_switch(host.transition_phase(transition), target, duration_ms);
                    if execute_switch(host, transition, plan) {
                        Ok(plan)
                    } else {
                        Err(MixcastError::resource("transition refused the switch"))
                    }
                })??;
                state.scenes.set_current(target);
                tracing::debug!(id = %self.id, scene = name, ?plan, "Switched scene");
                plan != SwitchPlan::Noop
            }
        };
        if changed {
            self.current_scene_changed(name);
        }
        Ok(changed)
    }

    /// Replace the transition node with a new one of `kind`. The new node
    /// takes over the current scene and the old one is released.
    pub fn set_transition(&self, kind: TransitionKind) -> MixcastResult<()> {
        match &self.kind {
            CompositionKind::Native => self.ctx.engine.invoke(move |host| {
                let (width, height) = host.base_resolution();
                let incoming = host.create_transition(kind, width, height)?;
                if !host.set_host_transition(incoming) {
                    host.release_transition(incoming);
                    return Err(MixcastError::resource("host refused the transition"));
                }
                Ok(())
            })?,
            CompositionKind::Custom(state) => {
                let mut state = state.write();
                let outgoing = state.transition;
                let view = state.view;
                let current = state.scenes.current().handle;
                let (width, height) = state.dimensions();
                let hook = state.signals.as_ref().map(SignalConnection::hook);
                let incoming = self.ctx.engine.invoke(move |host| {
                    let incoming = host.create_transition(kind, width, height)?;
                    host.transition_swap_begin(incoming, outgoing);
                    host.disconnect_transition_signals(outgoing);
                    host.transition_set_scene(incoming, Some(current));
                    host.view_set_source(view, Some(incoming));
                    if let Some(hook) = hook {
                        host.connect_transition_signals(incoming, hook);
                    }
                    host.transition_swap_end(incoming, outgoing);
                    host.release_transition(outgoing);
                    Ok::<_, MixcastError>(incoming)
                })??;
                state.transition = incoming;
                state.route_source.store(incoming.raw(), Ordering::Release);
                tracing::debug!(id = %self.id, ?kind, %incoming, "Replaced transition");
                Ok(())
            }
        }
    }

    pub fn set_transition_duration(&self, duration_ms: u32) -> MixcastResult<()> {
        match &self.kind {
            CompositionKind::Native => Err(MixcastError::unsupported(
                "the host composition uses the host's own transition timing",
            )),
            CompositionKind::Custom(state) => {
                state.write().transition_duration_ms = duration_ms;
                Ok(())
            }
        }
    }

    /// The host discarded its scene graph. A custom composition gets one
    /// fresh default scene; id, name and encoders are kept.
    pub fn handle_host_collection_reset(&self) -> MixcastResult<()> {
        if let CompositionKind::Custom(state) = &self.kind {
            let mut state = state.write();
            if state.released {
                return Ok(());
            }
            let transition = state.transition;
            let (width, height) = state.dimensions();
            let stale = state.scenes.handles();
            let name = self.ctx.defaults.default_scene_name.clone();
            let scene_name = name.clone();
            let fresh = self.ctx.engine.invoke(move |host| {
                let fresh = host.create_scene(&scene_name, width, height)?;
                host.transition_set_scene(transition, Some(fresh));
                for scene in stale {
                    host.release_scene(scene);
                }
                Ok::<_, MixcastError>(fresh)
            })??;
            state.scenes.reset(Scene::new(fresh, name));
            tracing::info!(id = %self.id, "Recreated scenes after host collection reset");
        }
        self.listeners.notify(|l| l.collection_reset(&self.id));
        self.ctx
            .publish("CompositionReset", json!({ "compositionId": self.id }));
        Ok(())
    }

    pub fn serialize(&self) -> MixcastResult<CompositionSnapshot> {
        let removable = self.can_remove();
        match &self.kind {
            CompositionKind::Native => {
                let id = self.id.clone();
                let name = self.name.clone();
                self.ctx.engine.invoke(move |host| {
                    let (width, height) = host.base_resolution();
                    let encoders = host.host_encoders();
                    CompositionSnapshot {
                        id,
                        name,
                        native: true,
                        removable,
                        width,
                        height,
                        encoders: encoder_snapshot(
                            &*host,
                            encoders.streaming_video,
                            encoders.recording_video,
                        ),
                        scenes: host
                            .host_scenes()
                            .into_iter()
                            .filter_map(|s| host.scene_name(s))
                            .collect(),
                        current_scene: host
                            .host_program_scene()
                            .and_then(|s| host.scene_name(s)),
                        transition: describe_transition(&*host, host.host_transition()),
                        transition_duration_ms: None,
                        audio_slot: None,
                    }
                })
            }
            CompositionKind::Custom(state) => {
                let state = state.read();
                let streaming = state.streaming_encoder;
                let recording = state.recording_encoder;
                let transition = state.transition;
                let (encoders, status) = self.ctx.engine.invoke(move |host| {
                    (
                        encoder_snapshot(&*host, Some(streaming), recording),
                        describe_transition(&*host, Some(transition)),
                    )
                })?;
                Ok(CompositionSnapshot {
                    id: self.id.clone(),
                    name: self.name.clone(),
                    native: false,
                    removable,
                    width: state.width,
                    height: state.height,
                    encoders,
                    scenes: state.scenes.names(),
                    current_scene: Some(state.scenes.current().name.clone()),
                    transition: status,
                    transition_duration_ms: Some(state.transition_duration_ms),
                    audio_slot: state.audio_slot,
                })
            }
        }
    }

    /// Release the native pipeline of a custom composition. Blocks until an
    /// in-flight transition callback has returned.
    pub fn teardown(&self) -> MixcastResult<()> {
        let CompositionKind::Custom(state) = &self.kind else {
            return Ok(());
        };
        let mut state = state.write();
        if state.released {
            return Ok(());
        }
        let plan = state.teardown_plan();
        let slots = Arc::clone(&self.ctx.slots);
        self.ctx
            .engine
            .invoke(move |host| custom::teardown(host, plan, &slots))?;
        if let Some(signals) = state.signals.take() {
            signals.disconnect();
        }
        state.released = true;
        state.audio_slot = None;
        tracing::info!(id = %self.id, name = %self.name, "Released custom composition");
        Ok(())
    }

    /// Published after a switch commits: the scene change first, then the
    /// program's item list.
    fn current_scene_changed(&self, scene: &str) {
        self.listeners
            .notify(|l| l.current_scene_changed(&self.id, scene));
        self.ctx.publish(
            "CurrentSceneChanged",
            json!({ "compositionId": self.id, "sceneName": scene }),
        );
        self.listeners
            .notify(|l| l.scene_items_changed(&self.id, scene));
        self.ctx.publish(
            "SceneItemListChanged",
            json!({ "compositionId": self.id, "sceneName": scene }),
        );
    }

    fn scene_list_changed(&self) {
        self.listeners.notify(|l| l.scene_list_changed(&self.id));
        self.ctx
            .publish("SceneListChanged", json!({ "compositionId": self.id }));
    }
}

fn transition_signals(
    id: &str,
    sink: &Arc<dyn EventSink>,
    listeners: &Arc<ListenerSet>,
) -> SignalConnection<TransitionSignal> {
    let id = id.to_string();
    let sink = Arc::clone(sink);
    let listeners = Arc::clone(listeners);
    SignalConnection::new(move |signal: &TransitionSignal| match signal {
        TransitionSignal::Started { to } => {
            tracing::trace!(id = %id, %to, "Transition started");
        }
        TransitionSignal::Ended { scene_name, .. } => {
            sink.publish(
                "SceneTransitionEnded",
                json!({ "compositionId": id, "sceneName": scene_name }),
            );
            listeners.notify(|l| l.transition_ended(&id, scene_name));
        }
    })
}

fn find_host_scene(host: &dyn HostEngine, name: &str) -> MixcastResult<SceneHandle> {
    host.host_scenes()
        .into_iter()
        .find(|s| host.scene_name(*s).as_deref() == Some(name))
        .ok_or_else(|| MixcastError::not_found("scene", name))
}

fn check_host_scene_name(host: &dyn HostEngine, name: &str) -> MixcastResult<()> {
    if name.trim().is_empty() {
        return Err(MixcastError::validation("scene name must not be empty"));
    }
    if find_host_scene(host, name).is_ok() {
        return Err(MixcastError::validation(format!(
            "scene '{name}' already exists"
        )));
    }
    Ok(())
}

/// Remove a host scene. Returns the name of the scene made current first,
/// if any.
fn remove_host_scene(
    host: &mut dyn HostEngine,
    name: &str,
    safe: bool,
) -> MixcastResult<Option<String>> {
    let scene = find_host_scene(&*host, name)?;
    let scenes = host.host_scenes();
    if scenes.len() == 1 {
        return Err(MixcastError::invariant(format!(
            "scene '{name}' is the only scene of the composition"
        )));
    }
    let mut new_current = None;
    if host.host_program_scene() == Some(scene) {
        if !safe {
            return Err(MixcastError::invariant(format!(
                "scene '{name}' is current; switch away or use a safe removal"
            )));
        }
        let next = scenes
            .into_iter()
            .find(|s| *s != scene)
            .ok_or_else(|| MixcastError::invariant("no other scene to switch to"))?;
        if !host.set_host_program_scene(next) {
            return Err(MixcastError::resource("host refused the scene switch"));
        }
        new_current = host.scene_name(next);
    }
    if !host.remove_host_scene(scene) {
        return Err(MixcastError::resource(format!(
            "host refused to remove scene '{name}'"
        )));
    }
    Ok(new_current)
}

impl Leasable for VideoComposition {
    fn ref_counter(&self) -> &RefCounter {
        &self.refs
    }

    fn listener_set(&self) -> Option<&ListenerSet> {
        Some(&self.listeners)
    }
}

impl Composition for VideoComposition {
    type Snapshot = CompositionSnapshot;
    const KIND: &'static str = "composition";

    fn id(&self) -> &str {
        &self.id
    }

    fn is_native(&self) -> bool {
        VideoComposition::is_native(self)
    }

    fn lease(
        this: &Arc<Self>,
        listener: Option<Weak<dyn CompositionListener>>,
        holder_tag: &str,
    ) -> Lease<Self> {
        VideoComposition::get_composition_info(this, listener, holder_tag)
    }

    fn serialize(&self) -> MixcastResult<CompositionSnapshot> {
        VideoComposition::serialize(self)
    }

    fn teardown(&self) -> MixcastResult<()> {
        VideoComposition::teardown(self)
    }
}

impl std::fmt::Debug for VideoComposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VideoComposition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("native", &self.is_native())
            .field("refs", &self.refs.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mixcast_common::config::{AudioDefaults, CompositionDefaults};
    use mixcast_host_core::actor::EngineThread;
    use mixcast_host_core::audio::AudioSlotTable;
    use mixcast_host_core::events::MemorySink;
    use mixcast_host_core::sim::{FailPoint, SimProbe, SimulatedHost};

    struct Fixture {
        _engine: EngineThread,
        probe: SimProbe,
        sink: Arc<MemorySink>,
        ctx: CompositionContext,
    }

    fn fixture() -> Fixture {
        let (host, probe) = SimulatedHost::new(1920, 1080);
        let engine = EngineThread::spawn(Box::new(host)).unwrap();
        let sink = Arc::new(MemorySink::new());
        let ctx = CompositionContext::new(
            engine.handle(),
            sink.clone(),
            Arc::new(AudioSlotTable::new(2)),
            CompositionDefaults::default(),
            AudioDefaults::default(),
        );
        Fixture {
            _engine: engine,
            probe,
            sink,
            ctx,
        }
    }

    fn custom(fx: &Fixture) -> Arc<VideoComposition> {
        VideoComposition::create_custom(&CompositionSpec::new("Vertical", 1081, 1921), fx.ctx.clone())
            .unwrap()
    }

    #[test]
    fn test_custom_round_trip_snapshot() {
        let fx = fixture();
        let comp = custom(&fx);
        let snapshot = comp.serialize().unwrap();

        assert_eq!(snapshot.id, comp.id());
        assert_eq!(snapshot.name, "Vertical");
        assert_eq!((snapshot.width, snapshot.height), (1080, 1920));
        assert!(!snapshot.native);
        assert!(snapshot.removable);
        assert_eq!(snapshot.scenes, ["Scene"]);
        assert_eq!(snapshot.current_scene.as_deref(), Some("Scene"));
        assert_eq!(snapshot.encoders.unwrap().streaming.width, Some(1080));
        assert_eq!(snapshot.audio_slot, Some(0));
    }

    #[test]
    fn test_native_snapshot_omits_missing_encoders() {
        let fx = fixture();
        let native = VideoComposition::native(fx.ctx.clone());
        let snapshot = native.serialize().unwrap();
        assert!(snapshot.native);
        assert!(!snapshot.removable);
        assert!(snapshot.encoders.is_none());
        assert_eq!((snapshot.width, snapshot.height), (1920, 1080));

        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("encoders").is_none());
    }

    #[test]
    fn test_second_switch_retargets_in_flight_blend() {
        let fx = fixture();
        let comp = custom(&fx);
        let b = comp.add_scene("B").unwrap();
        let c = comp.add_scene("C").unwrap();

        assert!(comp.set_current_scene("B").unwrap());
        assert!(comp.transition_state().unwrap().unwrap().is_in_flight());
        assert!(comp.set_current_scene("C").unwrap());
        assert!(fx.probe.scene_alive(b.handle));

        fx.probe.complete_transitions();
        assert_eq!(
            comp.transition_state().unwrap(),
            Some(TransitionStatus::Idle {
                showing: Some("C".to_string())
            })
        );
        assert_eq!(comp.current_scene().unwrap().unwrap().handle, c.handle);
        assert_eq!(fx.sink.count("SceneTransitionEnded"), 1);
        assert_eq!(fx.sink.count("CurrentSceneChanged"), 2);
    }

    #[test]
    fn test_switch_publishes_scene_and_item_list_changes() {
        let fx = fixture();
        let comp = custom(&fx);
        comp.add_scene("B").unwrap();
        fx.sink.take();

        assert!(comp.set_current_scene("B").unwrap());
        assert_eq!(fx.sink.names(), ["CurrentSceneChanged", "SceneItemListChanged"]);
        let items = fx.sink.last("SceneItemListChanged").unwrap();
        assert_eq!(items.payload["compositionId"], comp.id());
        assert_eq!(items.payload["sceneName"], "B");

        assert!(!comp.set_current_scene("B").unwrap());
        assert_eq!(fx.sink.count("SceneItemListChanged"), 1);
    }

    #[test]
    fn test_switch_to_current_is_noop() {
        let fx = fixture();
        let comp = custom(&fx);
        assert!(!comp.set_current_scene("Scene").unwrap());
        assert!(comp.set_current_scene("missing").is_err());
    }

    #[test]
    fn test_scene_removal_rules() {
        let fx = fixture();
        let comp = custom(&fx);
        assert!(comp.safe_remove_scene("Scene").is_err());

        comp.add_scene("B").unwrap();
        assert!(comp.remove_scene("Scene").is_err());
        comp.safe_remove_scene("Scene").unwrap();

        let scenes = comp.scenes().unwrap();
        assert_eq!(scenes.len(), 1);
        assert_eq!(comp.current_scene().unwrap().unwrap().name, "B");
        assert!(comp.add_scene("B").unwrap_err().is_validation());
    }

    #[test]
    fn test_set_transition_keeps_scene_and_audio_route() {
        let fx = fixture();
        let comp = custom(&fx);
        let before = fx.ctx.slots.current_source(0);

        comp.set_transition(TransitionKind::Fade).unwrap();

        let after = fx.ctx.slots.current_source(0);
        assert_ne!(before, after);
        let transition = after.unwrap();
        assert!(fx.probe.transition_alive(transition));
        assert!(!fx.probe.transition_alive(before.unwrap()));
        assert_eq!(
            comp.transition_state().unwrap(),
            Some(TransitionStatus::Idle {
                showing: Some("Scene".to_string())
            })
        );
    }

    #[test]
    fn test_collection_reset_recreates_one_scene() {
        let fx = fixture();
        let comp = custom(&fx);
        comp.add_scene("B").unwrap();
        let id = comp.id().to_string();

        comp.handle_host_collection_reset().unwrap();
        assert_eq!(comp.id(), id);
        assert_eq!(comp.scenes().unwrap().len(), 1);
        assert_eq!(comp.serialize().unwrap().current_scene.as_deref(), Some("Scene"));
        assert_eq!(fx.probe.live_counts().scenes, 2);
    }

    #[test]
    fn test_teardown_releases_everything() {
        let fx = fixture();
        let before = fx.probe.live_counts();
        let comp = custom(&fx);
        comp.add_scene("B").unwrap();
        comp.set_current_scene("B").unwrap();

        comp.teardown().unwrap();
        assert_eq!(fx.probe.live_counts(), before);
        assert_eq!(fx.ctx.slots.occupied(), 0);
    }

    #[test]
    fn test_failed_assembly_leaks_nothing_and_keeps_slots_free() {
        let fx = fixture();
        let before = fx.probe.live_counts();
        for point in [
            FailPoint::CreateTransition,
            FailPoint::CreateView,
            FailPoint::CreateVideoEncoder,
            FailPoint::CreateScene,
        ] {
            fx.probe.fail_next(point);
            let result =
                VideoComposition::create_custom(&CompositionSpec::new("Broken", 640, 360), fx.ctx.clone());
            assert!(matches!(result, Err(MixcastError::Resource { .. })), "{point:?}");
            assert_eq!(fx.probe.live_counts(), before, "{point:?}");
            assert_eq!(fx.ctx.slots.occupied(), 0, "{point:?}");
        }

        let comp = custom(&fx);
        assert_eq!(comp.serialize().unwrap().audio_slot, Some(0));
        assert!(fx.ctx.slots.is_assigned(0));
        assert!(!fx.ctx.slots.is_assigned(1));
    }

    #[test]
    fn test_created_without_audio_when_slots_are_full() {
        let fx = fixture();
        let first = custom(&fx);
        let second = custom(&fx);
        let third = custom(&fx);
        assert_eq!(first.serialize().unwrap().audio_slot, Some(0));
        assert_eq!(second.serialize().unwrap().audio_slot, Some(1));

        let snapshot = third.serialize().unwrap();
        assert_eq!(snapshot.audio_slot, None);
        let json = serde_json::to_value(&snapshot).unwrap();
        assert!(json.get("audioSlot").is_none());
        third.add_scene("B").unwrap();
        assert!(third.set_current_scene("B").unwrap());

        first.teardown().unwrap();
        assert_eq!(fx.ctx.slots.occupied(), 1);
        assert_eq!(custom(&fx).serialize().unwrap().audio_slot, Some(0));
    }

    #[test]
    fn test_native_scene_operations_delegate() {
        let fx = fixture();
        let native = VideoComposition::native(fx.ctx.clone());
        native.add_scene("Second").unwrap();
        assert_eq!(fx.probe.host_scene_names(), ["Scene", "Second"]);

        assert!(native.set_current_scene("Second").unwrap());
        assert!(native.remove_scene("Second").is_err());
        native.safe_remove_scene("Second").unwrap();
        assert_eq!(fx.probe.host_scene_names(), ["Scene"]);
        assert!(native.set_transition_duration(100).is_err());
    }

    #[test]
    fn test_lease_blocks_nothing_but_counts() {
        let fx = fixture();
        let comp = custom(&fx);
        let lease = VideoComposition::get_composition_info(&comp, None, "output:x");
        assert!(!comp.can_remove());
        assert_eq!(lease.stream_info().unwrap().width, 1080);
        drop(lease);
        assert!(comp.can_remove());
    }
}
