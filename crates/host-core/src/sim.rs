//! In-memory host engine.
//!
//! [`SimulatedHost`] implements [`HostEngine`] with plain bookkeeping: no
//! pixels are rendered and no bytes are encoded. It keeps reference counts on
//! scenes held by transitions, emits output and transition signals, and can
//! be told to fail any creation step. A [`SimProbe`] shares its state so tests
//! and the CLI can inspect live handles and drive host-side events.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use mixcast_common::clock::blend_progress;
use mixcast_common::error::{MixcastError, MixcastResult};

use crate::handle::{
    AudioMixHandle, EncoderHandle, OutputHandle, SceneHandle, TransitionHandle, ViewHandle,
};
use crate::host::{
    AudioMixInfo, EncoderInfo, EncoderSettings, HostEncoders, HostEngine, NativeOutputStats,
    OutputKind, TransitionKind, TransitionPhase, STOP_SUCCESS,
};
use crate::signal::{OutputSignal, SignalHook, TransitionSignal};

/// Native stop code used when no video encoder is bound.
const INVALID_STREAM: i32 = -3;

/// A host call that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateScene,
    CreateTransition,
    CreateView,
    CreateVideoEncoder,
    CreateAudioMix,
    CreateAudioEncoder,
    CreateOutput,
    BindEncoders,
    /// The next output start fails with this native code.
    OutputStart(i32),
}

/// Number of live native objects, by type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimCounts {
    pub scenes: usize,
    pub transitions: usize,
    pub views: usize,
    pub encoders: usize,
    pub audio_mixes: usize,
    pub outputs: usize,
}

struct SimScene {
    name: String,
    width: u32,
    height: u32,
    refs: u32,
}

#[derive(Clone, Copy)]
enum SimPhase {
    Idle(Option<u64>),
    Blend {
        from: Option<u64>,
        to: u64,
        duration_ms: u32,
        started: Instant,
    },
}

impl SimPhase {
    fn scenes(&self) -> Vec<u64> {
        match *self {
            SimPhase::Idle(showing) => showing.into_iter().collect(),
            SimPhase::Blend { from, to, .. } => from.into_iter().chain(Some(to)).collect(),
        }
    }

    fn destination(&self) -> Option<u64> {
        match *self {
            SimPhase::Idle(showing) => showing,
            SimPhase::Blend { to, .. } => Some(to),
        }
    }
}

struct SimTransition {
    #[allow(dead_code)]
    kind: TransitionKind,
    phase: SimPhase,
    hook: Option<SignalHook<TransitionSignal>>,
}

struct SimView {
    source: Option<u64>,
}

struct SimOutput {
    kind: OutputKind,
    settings: serde_json::Value,
    video: Option<u64>,
    audio: Option<u64>,
    active: bool,
    paused: bool,
    hook: Option<SignalHook<OutputSignal>>,
    stats: NativeOutputStats,
    host_owned: bool,
    replays_saved: u32,
}

struct SimState {
    next_id: u64,
    base: (u32, u32),
    audio: AudioMixInfo,
    scenes: HashMap<u64, SimScene>,
    transitions: HashMap<u64, SimTransition>,
    views: HashMap<u64, SimView>,
    mixes: HashMap<u64, AudioMixInfo>,
    encoders: HashMap<u64, EncoderInfo>,
    outputs: HashMap<u64, SimOutput>,
    host_scenes: Vec<u64>,
    host_transition: u64,
    host_outputs: HashMap<OutputKind, u64>,
    host_encoders: HostEncoders,
    failures: HashSet<FailPoint>,
    calls: Vec<String>,
}

type PendingOutput = Vec<(SignalHook<OutputSignal>, OutputSignal)>;
type PendingTransition = Vec<(SignalHook<TransitionSignal>, TransitionSignal)>;

impl SimState {
    fn alloc(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn log(&mut self, call: impl Into<String>) {
        self.calls.push(call.into());
    }

    fn check(&mut self, point: FailPoint) -> MixcastResult<()> {
        if self.failures.remove(&point) {
            self.log(format!("fail:{point:?}"));
            return Err(MixcastError::resource(format!(
                "simulated host refused {point:?}"
            )));
        }
        Ok(())
    }

    fn retain_scene(&mut self, id: u64) {
        if let Some(scene) = self.scenes.get_mut(&id) {
            scene.refs += 1;
        }
    }

    fn release_scene_ref(&mut self, id: u64) {
        let destroy = match self.scenes.get_mut(&id) {
            Some(scene) => {
                scene.refs = scene.refs.saturating_sub(1);
                scene.refs == 0
            }
            None => false,
        };
        if destroy {
            self.scenes.remove(&id);
            self.log(format!("destroy_scene:{id}"));
        }
    }

    fn new_scene(&mut self, name: &str, width: u32, height: u32) -> u64 {
        let id = self.alloc();
        self.scenes.insert(
            id,
            SimScene {
                name: name.to_string(),
                width,
                height,
                refs: 1,
            },
        );
        id
    }

    fn new_transition(&mut self, kind: TransitionKind) -> u64 {
        let id = self.alloc();
        self.transitions.insert(
            id,
            SimTransition {
                kind,
                phase: SimPhase::Idle(None),
                hook: None,
            },
        );
        id
    }

    fn set_phase(&mut self, transition: u64, phase: SimPhase) {
        for scene in phase.scenes() {
            self.retain_scene(scene);
        }
        let old = match self.transitions.get_mut(&transition) {
            Some(t) => std::mem::replace(&mut t.phase, phase),
            None => {
                for scene in phase.scenes() {
                    self.release_scene_ref(scene);
                }
                return;
            }
        };
        for scene in old.scenes() {
            self.release_scene_ref(scene);
        }
    }

    fn destroy_transition(&mut self, id: u64) {
        if let Some(transition) = self.transitions.remove(&id) {
            for scene in transition.phase.scenes() {
                self.release_scene_ref(scene);
            }
        }
    }

    fn scene_name(&self, id: u64) -> String {
        self.scenes
            .get(&id)
            .map(|s| s.name.clone())
            .unwrap_or_default()
    }

    /// Settle every in-flight blend for which `ready` holds. Returns how
    /// many blends finished and the end signals to deliver.
    fn complete_blends(
        &mut self,
        ready: impl Fn(u32, Instant) -> bool,
    ) -> (usize, PendingTransition) {
        let finished: Vec<(u64, u64)> = self
            .transitions
            .iter()
            .filter_map(|(id, t)| match t.phase {
                SimPhase::Blend {
                    to,
                    duration_ms,
                    started,
                    ..
                } if ready(duration_ms, started) => Some((*id, to)),
                _ => None,
            })
            .collect();

        let count = finished.len();
        let mut pending = Vec::new();
        for (id, to) in finished {
            self.set_phase(id, SimPhase::Idle(Some(to)));
            self.log(format!("transition_end:{id}"));
            let scene_name = self.scene_name(to);
            if let Some(hook) = self.transitions.get(&id).and_then(|t| t.hook.clone()) {
                pending.push((
                    hook,
                    TransitionSignal::Ended {
                        scene: SceneHandle(to),
                        scene_name,
                    },
                ));
            }
        }
        (count, pending)
    }

    fn output_hook(&self, id: u64) -> Option<SignalHook<OutputSignal>> {
        self.outputs.get(&id).and_then(|o| o.hook.clone())
    }

    fn ensure_host_encoders(&mut self) {
        if self.host_encoders.streaming_video.is_some() {
            return;
        }
        let (width, height) = self.base;
        let video = self.alloc();
        self.encoders.insert(
            video,
            EncoderInfo {
                codec: "h264".to_string(),
                bitrate_kbps: 6000,
                width: Some(width),
                height: Some(height),
            },
        );
        let audio = self.alloc();
        self.encoders.insert(
            audio,
            EncoderInfo {
                codec: "aac".to_string(),
                bitrate_kbps: 160,
                width: None,
                height: None,
            },
        );
        self.host_encoders = HostEncoders {
            streaming_video: Some(EncoderHandle(video)),
            recording_video: Some(EncoderHandle(video)),
            audio: Some(EncoderHandle(audio)),
        };
    }

    fn drop_host_encoders(&mut self) {
        let encoders = std::mem::take(&mut self.host_encoders);
        for encoder in [encoders.streaming_video, encoders.audio]
            .into_iter()
            .flatten()
        {
            self.encoders.remove(&encoder.0);
        }
    }
}

fn emit_output(pending: PendingOutput) {
    for (hook, signal) in pending {
        hook.emit(&signal);
    }
}

fn emit_transition(pending: PendingTransition) {
    for (hook, signal) in pending {
        hook.emit(&signal);
    }
}

/// In-memory [`HostEngine`].
pub struct SimulatedHost {
    state: Arc<Mutex<SimState>>,
}

/// Inspection and control handle sharing a [`SimulatedHost`]'s state.
#[derive(Clone)]
pub struct SimProbe {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHost {
    /// A host whose main mix is `width`×`height`, with one scene named
    /// "Scene" on program.
    pub fn new(width: u32, height: u32) -> (Self, SimProbe) {
        let mut state = SimState {
            next_id: 0,
            base: (width, height),
            audio: AudioMixInfo {
                sample_rate: 48000,
                channels: 2,
            },
            scenes: HashMap::new(),
            transitions: HashMap::new(),
            views: HashMap::new(),
            mixes: HashMap::new(),
            encoders: HashMap::new(),
            outputs: HashMap::new(),
            host_scenes: Vec::new(),
            host_transition: 0,
            host_outputs: HashMap::new(),
            host_encoders: HostEncoders::default(),
            failures: HashSet::new(),
            calls: Vec::new(),
        };
        let scene = state.new_scene("Scene", width, height);
        state.host_scenes.push(scene);
        let transition = state.new_transition(TransitionKind::Fade);
        state.host_transition = transition;
        state.set_phase(transition, SimPhase::Idle(Some(scene)));

        let state = Arc::new(Mutex::new(state));
        (
            Self {
                state: Arc::clone(&state),
            },
            SimProbe { state },
        )
    }
}

impl HostEngine for SimulatedHost {
    fn base_resolution(&self) -> (u32, u32) {
        self.state.lock().base
    }

    fn host_audio(&self) -> AudioMixInfo {
        self.state.lock().audio
    }

    fn host_scenes(&self) -> Vec<SceneHandle> {
        self.state
            .lock()
            .host_scenes
            .iter()
            .map(|id| SceneHandle(*id))
            .collect()
    }

    fn host_program_scene(&self) -> Option<SceneHandle> {
        let state = self.state.lock();
        state
            .transitions
            .get(&state.host_transition)
            .and_then(|t| t.phase.destination())
            .map(SceneHandle)
    }

    fn create_host_scene(&mut self, name: &str) -> MixcastResult<SceneHandle> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateScene)?;
        let (width, height) = state.base;
        let id = state.new_scene(name, width, height);
        state.host_scenes.push(id);
        state.log(format!("create_host_scene:{id}"));
        Ok(SceneHandle(id))
    }

    fn remove_host_scene(&mut self, scene: SceneHandle) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.host_scenes.iter().position(|id| *id == scene.0) else {
            return false;
        };
        state.host_scenes.remove(index);
        state.log(format!("remove_host_scene:{}", scene.0));
        state.release_scene_ref(scene.0);
        true
    }

    fn set_host_program_scene(&mut self, scene: SceneHandle) -> bool {
        let mut state = self.state.lock();
        if !state.host_scenes.contains(&scene.0) {
            return false;
        }
        let transition = state.host_transition;
        state.set_phase(transition, SimPhase::Idle(Some(scene.0)));
        state.log(format!("set_host_program_scene:{}", scene.0));
        true
    }

    fn host_transition(&self) -> Option<TransitionHandle> {
        Some(TransitionHandle(self.state.lock().host_transition))
    }

    fn set_host_transition(&mut self, transition: TransitionHandle) -> bool {
        let mut state = self.state.lock();
        if !state.transitions.contains_key(&transition.0) {
            return false;
        }
        let outgoing = state.host_transition;
        if outgoing == transition.0 {
            return true;
        }
        let showing = state
            .transitions
            .get(&outgoing)
            .and_then(|t| t.phase.destination());
        state.log(format!("swap_begin:{}:{outgoing}", transition.0));
        state.set_phase(transition.0, SimPhase::Idle(showing));
        state.host_transition = transition.0;
        state.log(format!("swap_end:{}:{outgoing}", transition.0));
        state.destroy_transition(outgoing);
        true
    }

    fn host_encoders(&self) -> HostEncoders {
        self.state.lock().host_encoders
    }

    fn host_output(&self, kind: OutputKind) -> Option<OutputHandle> {
        self.state
            .lock()
            .host_outputs
            .get(&kind)
            .map(|id| OutputHandle(*id))
    }

    fn host_output_active(&self, kind: OutputKind) -> bool {
        let state = self.state.lock();
        state
            .host_outputs
            .get(&kind)
            .and_then(|id| state.outputs.get(id))
            .is_some_and(|o| o.active)
    }

    fn create_scene(
        &mut self,
        name: &str,
        width: u32,
        height: u32,
    ) -> MixcastResult<SceneHandle> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateScene)?;
        let id = state.new_scene(name, width, height);
        state.log(format!("create_scene:{id}"));
        Ok(SceneHandle(id))
    }

    fn release_scene(&mut self, scene: SceneHandle) {
        let mut state = self.state.lock();
        state.log(format!("release_scene:{}", scene.0));
        state.release_scene_ref(scene.0);
    }

    fn scene_name(&self, scene: SceneHandle) -> Option<String> {
        self.state
            .lock()
            .scenes
            .get(&scene.0)
            .map(|s| s.name.clone())
    }

    fn create_transition(
        &mut self,
        kind: TransitionKind,
        _width: u32,
        _height: u32,
    ) -> MixcastResult<TransitionHandle> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateTransition)?;
        let id = state.new_transition(kind);
        state.log(format!("create_transition:{id}"));
        Ok(TransitionHandle(id))
    }

    fn release_transition(&mut self, transition: TransitionHandle) {
        let mut state = self.state.lock();
        state.log(format!("release_transition:{}", transition.0));
        state.destroy_transition(transition.0);
    }

    fn transition_set_scene(&mut self, transition: TransitionHandle, scene: Option<SceneHandle>) {
        let mut state = self.state.lock();
        state.log(format!("transition_set_scene:{}", transition.0));
        state.set_phase(transition.0, SimPhase::Idle(scene.map(|s| s.0)));
    }

    fn transition_start(
        &mut self,
        transition: TransitionHandle,
        duration_ms: u32,
        target: SceneHandle,
    ) -> bool {
        let pending = {
            let mut state = self.state.lock();
            let Some(current) = state.transitions.get(&transition.0).map(|t| t.phase) else {
                return false;
            };
            let SimPhase::Idle(showing) = current else {
                return false;
            };
            if !state.scenes.contains_key(&target.0) {
                return false;
            }
            state.log(format!("transition_start:{}:{}", transition.0, target.0));
            state.set_phase(
                transition.0,
                SimPhase::Blend {
                    from: showing,
                    to: target.0,
                    duration_ms,
                    started: Instant::now(),
                },
            );
            let mut pending = Vec::new();
            if let Some(hook) = state.transitions.get(&transition.0).and_then(|t| t.hook.clone()) {
                pending.push((hook, TransitionSignal::Started { to: target }));
            }
            if duration_ms == 0 {
                pending.extend(state.complete_blends(|duration, _| duration == 0).1);
            }
            pending
        };
        emit_transition(pending);
        true
    }

    fn transition_retarget(&mut self, transition: TransitionHandle, target: SceneHandle) -> bool {
        let mut state = self.state.lock();
        let Some(SimPhase::Blend {
            from,
            duration_ms,
            started,
            ..
        }) = state.transitions.get(&transition.0).map(|t| t.phase)
        else {
            return false;
        };
        if !state.scenes.contains_key(&target.0) {
            return false;
        }
        state.log(format!("transition_retarget:{}:{}", transition.0, target.0));
        state.set_phase(
            transition.0,
            SimPhase::Blend {
                from,
                to: target.0,
                duration_ms,
                started,
            },
        );
        true
    }

    fn transition_phase(&self, transition: TransitionHandle) -> Option<TransitionPhase> {
        let state = self.state.lock();
        let phase = state.transitions.get(&transition.0)?.phase;
        Some(match phase {
            SimPhase::Idle(showing) => TransitionPhase::Idle {
                showing: showing.map(SceneHandle),
            },
            SimPhase::Blend {
                from,
                to,
                duration_ms,
                started,
            } => TransitionPhase::InFlight {
                from: from.map(SceneHandle),
                to: SceneHandle(to),
                progress: blend_progress(started.elapsed(), duration_ms),
            },
        })
    }

    fn transition_swap_begin(&mut self, incoming: TransitionHandle, outgoing: TransitionHandle) {
        self.state
            .lock()
            .log(format!("swap_begin:{}:{}", incoming.0, outgoing.0));
    }

    fn transition_swap_end(&mut self, incoming: TransitionHandle, outgoing: TransitionHandle) {
        self.state
            .lock()
            .log(format!("swap_end:{}:{}", incoming.0, outgoing.0));
    }

    fn connect_transition_signals(
        &mut self,
        transition: TransitionHandle,
        hook: SignalHook<TransitionSignal>,
    ) {
        let mut state = self.state.lock();
        if let Some(t) = state.transitions.get_mut(&transition.0) {
            t.hook = Some(hook);
        }
    }

    fn disconnect_transition_signals(&mut self, transition: TransitionHandle) {
        let mut state = self.state.lock();
        if let Some(t) = state.transitions.get_mut(&transition.0) {
            t.hook = None;
        }
    }

    fn create_view(&mut self, _width: u32, _height: u32) -> MixcastResult<ViewHandle> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateView)?;
        let id = state.alloc();
        state.views.insert(id, SimView { source: None });
        state.log(format!("create_view:{id}"));
        Ok(ViewHandle(id))
    }

    fn view_set_source(&mut self, view: ViewHandle, source: Option<TransitionHandle>) {
        let mut state = self.state.lock();
        if let Some(v) = state.views.get_mut(&view.0) {
            v.source = source.map(|t| t.0);
        }
        state.log(format!("view_set_source:{}", view.0));
    }

    fn release_view(&mut self, view: ViewHandle) {
        let mut state = self.state.lock();
        state.views.remove(&view.0);
        state.log(format!("release_view:{}", view.0));
    }

    fn create_video_encoder(
        &mut self,
        _name: &str,
        settings: &EncoderSettings,
        view: ViewHandle,
        width: u32,
        height: u32,
    ) -> MixcastResult<EncoderHandle> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateVideoEncoder)?;
        if !state.views.contains_key(&view.0) {
            return Err(MixcastError::resource(format!("unknown {view}")));
        }
        let id = state.alloc();
        state.encoders.insert(
            id,
            EncoderInfo {
                codec: settings.codec.clone(),
                bitrate_kbps: settings.bitrate_kbps,
                width: Some(width),
                height: Some(height),
            },
        );
        state.log(format!("create_video_encoder:{id}"));
        Ok(EncoderHandle(id))
    }

    fn create_audio_mix(
        &mut self,
        sample_rate: u32,
        channels: u32,
    ) -> MixcastResult<AudioMixHandle> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateAudioMix)?;
        let id = state.alloc();
        state.mixes.insert(
            id,
            AudioMixInfo {
                sample_rate,
                channels,
            },
        );
        state.log(format!("create_audio_mix:{id}"));
        Ok(AudioMixHandle(id))
    }

    fn release_audio_mix(&mut self, mix: AudioMixHandle) {
        let mut state = self.state.lock();
        state.mixes.remove(&mix.0);
        state.log(format!("release_audio_mix:{}", mix.0));
    }

    fn create_audio_encoder(
        &mut self,
        _name: &str,
        settings: &EncoderSettings,
        mix: Option<AudioMixHandle>,
    ) -> MixcastResult<EncoderHandle> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateAudioEncoder)?;
        if let Some(mix) = mix {
            if !state.mixes.contains_key(&mix.0) {
                return Err(MixcastError::resource(format!("unknown {mix}")));
            }
        }
        let id = state.alloc();
        state.encoders.insert(
            id,
            EncoderInfo {
                codec: settings.codec.clone(),
                bitrate_kbps: settings.bitrate_kbps,
                width: None,
                height: None,
            },
        );
        state.log(format!("create_audio_encoder:{id}"));
        Ok(EncoderHandle(id))
    }

    fn release_encoder(&mut self, encoder: EncoderHandle) {
        let mut state = self.state.lock();
        state.encoders.remove(&encoder.0);
        state.log(format!("release_encoder:{}", encoder.0));
    }

    fn encoder_info(&self, encoder: EncoderHandle) -> Option<EncoderInfo> {
        self.state.lock().encoders.get(&encoder.0).cloned()
    }

    fn create_output(
        &mut self,
        kind: OutputKind,
        _name: &str,
        settings: &serde_json::Value,
    ) -> MixcastResult<OutputHandle> {
        let mut state = self.state.lock();
        state.check(FailPoint::CreateOutput)?;
        let id = state.alloc();
        state.outputs.insert(
            id,
            SimOutput {
                kind,
                settings: settings.clone(),
                video: None,
                audio: None,
                active: false,
                paused: false,
                hook: None,
                stats: NativeOutputStats::default(),
                host_owned: false,
                replays_saved: 0,
            },
        );
        state.log(format!("create_output:{id}"));
        Ok(OutputHandle(id))
    }

    fn output_bind_encoders(
        &mut self,
        output: OutputHandle,
        video: EncoderHandle,
        audio: EncoderHandle,
    ) -> bool {
        let mut state = self.state.lock();
        if state.check(FailPoint::BindEncoders).is_err() {
            return false;
        }
        if !state.encoders.contains_key(&video.0) || !state.encoders.contains_key(&audio.0) {
            return false;
        }
        let Some(out) = state.outputs.get_mut(&output.0) else {
            return false;
        };
        out.video = Some(video.0);
        out.audio = Some(audio.0);
        state.log(format!("output_bind_encoders:{}", output.0));
        true
    }

    fn output_unbind_encoders(&mut self, output: OutputHandle) {
        let mut state = self.state.lock();
        if let Some(out) = state.outputs.get_mut(&output.0) {
            out.video = None;
            out.audio = None;
        }
        state.log(format!("output_unbind_encoders:{}", output.0));
    }

    fn connect_output_signals(&mut self, output: OutputHandle, hook: SignalHook<OutputSignal>) {
        let mut state = self.state.lock();
        if let Some(out) = state.outputs.get_mut(&output.0) {
            out.hook = Some(hook);
        }
    }

    fn disconnect_output_signals(&mut self, output: OutputHandle) {
        let mut state = self.state.lock();
        if let Some(out) = state.outputs.get_mut(&output.0) {
            out.hook = None;
        }
    }

    fn output_start(&mut self, output: OutputHandle) -> Result<(), i32> {
        let pending = {
            let mut state = self.state.lock();
            let injected = state
                .failures
                .iter()
                .find(|f| matches!(f, FailPoint::OutputStart(_)))
                .copied();
            if let Some(point @ FailPoint::OutputStart(code)) = injected {
                state.failures.remove(&point);
                state.log(format!("fail:{point:?}"));
                return Err(code);
            }
            let Some(out) = state.outputs.get_mut(&output.0) else {
                return Err(INVALID_STREAM);
            };
            if out.video.is_none() || out.audio.is_none() {
                return Err(INVALID_STREAM);
            }
            if out.active {
                return Ok(());
            }
            out.active = true;
            out.stats = NativeOutputStats::default();
            state.log(format!("output_start:{}", output.0));
            match state.output_hook(output.0) {
                Some(hook) => vec![
                    (hook.clone(), OutputSignal::Starting),
                    (hook.clone(), OutputSignal::Activated),
                    (hook, OutputSignal::Started),
                ],
                None => Vec::new(),
            }
        };
        emit_output(pending);
        Ok(())
    }

    fn output_force_stop(&mut self, output: OutputHandle) {
        let pending = {
            let mut state = self.state.lock();
            let Some(out) = state.outputs.get_mut(&output.0) else {
                return;
            };
            if !out.active {
                return;
            }
            out.active = false;
            out.paused = false;
            state.log(format!("output_force_stop:{}", output.0));
            match state.output_hook(output.0) {
                Some(hook) => vec![
                    (hook.clone(), OutputSignal::Stopping),
                    (hook.clone(), OutputSignal::Deactivated),
                    (hook, OutputSignal::Stopped { code: STOP_SUCCESS }),
                ],
                None => Vec::new(),
            }
        };
        emit_output(pending);
    }

    fn output_pause(&mut self, output: OutputHandle, paused: bool) -> bool {
        let pending = {
            let mut state = self.state.lock();
            let Some(out) = state.outputs.get_mut(&output.0) else {
                return false;
            };
            if !out.active || out.kind != OutputKind::Recording {
                return false;
            }
            if out.paused == paused {
                return true;
            }
            out.paused = paused;
            let signal = if paused {
                OutputSignal::Paused
            } else {
                OutputSignal::Unpaused
            };
            state.output_hook(output.0).map(|hook| vec![(hook, signal)])
        };
        emit_output(pending.unwrap_or_default());
        true
    }

    fn output_save_replay(&mut self, output: OutputHandle) -> bool {
        let mut state = self.state.lock();
        let Some(out) = state.outputs.get_mut(&output.0) else {
            return false;
        };
        if !out.active || out.kind != OutputKind::ReplayBuffer {
            return false;
        }
        out.replays_saved += 1;
        state.log(format!("output_save_replay:{}", output.0));
        true
    }

    fn output_active(&self, output: OutputHandle) -> bool {
        self.state
            .lock()
            .outputs
            .get(&output.0)
            .is_some_and(|o| o.active)
    }

    fn output_stats(&self, output: OutputHandle) -> NativeOutputStats {
        self.state
            .lock()
            .outputs
            .get(&output.0)
            .map(|o| o.stats)
            .unwrap_or_default()
    }

    fn release_output(&mut self, output: OutputHandle) {
        let mut state = self.state.lock();
        let host_owned = state
            .outputs
            .get(&output.0)
            .is_some_and(|o| o.host_owned);
        if host_owned {
            return;
        }
        state.outputs.remove(&output.0);
        state.log(format!("release_output:{}", output.0));
    }
}

impl SimProbe {
    pub fn live_counts(&self) -> SimCounts {
        let state = self.state.lock();
        SimCounts {
            scenes: state.scenes.len(),
            transitions: state.transitions.len(),
            views: state.views.len(),
            encoders: state.encoders.len(),
            audio_mixes: state.mixes.len(),
            outputs: state.outputs.len(),
        }
    }

    /// Make the next call at `point` fail.
    pub fn fail_next(&self, point: FailPoint) {
        self.state.lock().failures.insert(point);
    }

    /// Mutating host calls in the order they ran.
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn clear_call_log(&self) {
        self.state.lock().calls.clear();
    }

    pub fn scene_alive(&self, scene: SceneHandle) -> bool {
        self.state.lock().scenes.contains_key(&scene.0)
    }

    /// Number of holders keeping `scene` alive (owner plus transitions).
    pub fn scene_refs(&self, scene: SceneHandle) -> u32 {
        self.state
            .lock()
            .scenes
            .get(&scene.0)
            .map(|s| s.refs)
            .unwrap_or(0)
    }

    pub fn scene_size(&self, scene: SceneHandle) -> Option<(u32, u32)> {
        self.state
            .lock()
            .scenes
            .get(&scene.0)
            .map(|s| (s.width, s.height))
    }

    pub fn host_scene_names(&self) -> Vec<String> {
        let state = self.state.lock();
        state
            .host_scenes
            .iter()
            .map(|id| state.scene_name(*id))
            .collect()
    }

    /// Scene a transition is settled on, or blending towards.
    pub fn transition_destination(&self, transition: TransitionHandle) -> Option<SceneHandle> {
        self.state
            .lock()
            .transitions
            .get(&transition.0)
            .and_then(|t| t.phase.destination())
            .map(SceneHandle)
    }

    pub fn transition_alive(&self, transition: TransitionHandle) -> bool {
        self.state.lock().transitions.contains_key(&transition.0)
    }

    /// Finish every in-flight blend now.
    pub fn complete_transitions(&self) -> usize {
        let (finished, pending) = self.state.lock().complete_blends(|_, _| true);
        emit_transition(pending);
        finished
    }

    /// Finish the blends whose duration has elapsed.
    pub fn tick(&self) -> usize {
        let (finished, pending) = self.state.lock().complete_blends(|duration_ms, started| {
            started.elapsed().as_millis() >= duration_ms as u128
        });
        emit_transition(pending);
        finished
    }

    pub fn view_source(&self, view: ViewHandle) -> Option<TransitionHandle> {
        self.state
            .lock()
            .views
            .get(&view.0)
            .and_then(|v| v.source)
            .map(TransitionHandle)
    }

    /// Outputs created by the engine (host-owned outputs excluded).
    pub fn engine_outputs(&self) -> Vec<OutputHandle> {
        let mut outputs: Vec<OutputHandle> = self
            .state
            .lock()
            .outputs
            .iter()
            .filter(|(_, o)| !o.host_owned)
            .map(|(id, _)| OutputHandle(*id))
            .collect();
        outputs.sort();
        outputs
    }

    pub fn output_settings(&self, output: OutputHandle) -> Option<serde_json::Value> {
        self.state
            .lock()
            .outputs
            .get(&output.0)
            .map(|o| o.settings.clone())
    }

    pub fn output_encoders(&self, output: OutputHandle) -> Option<(EncoderHandle, EncoderHandle)> {
        let state = self.state.lock();
        let out = state.outputs.get(&output.0)?;
        Some((EncoderHandle(out.video?), EncoderHandle(out.audio?)))
    }

    pub fn output_hook_connected(&self, output: OutputHandle) -> bool {
        self.state
            .lock()
            .outputs
            .get(&output.0)
            .and_then(|o| o.hook.as_ref())
            .is_some_and(SignalHook::is_connected)
    }

    pub fn output_paused(&self, output: OutputHandle) -> bool {
        self.state
            .lock()
            .outputs
            .get(&output.0)
            .is_some_and(|o| o.paused)
    }

    pub fn replays_saved(&self, output: OutputHandle) -> u32 {
        self.state
            .lock()
            .outputs
            .get(&output.0)
            .map(|o| o.replays_saved)
            .unwrap_or(0)
    }

    pub fn set_output_stats(&self, output: OutputHandle, stats: NativeOutputStats) {
        if let Some(out) = self.state.lock().outputs.get_mut(&output.0) {
            out.stats = stats;
        }
    }

    /// Deliver `signal` as if the output raised it on its own. Activation
    /// state follows the signal.
    pub fn emit_output_signal(&self, output: OutputHandle, signal: OutputSignal) -> bool {
        let hook = {
            let mut state = self.state.lock();
            let Some(out) = state.outputs.get_mut(&output.0) else {
                return false;
            };
            match signal {
                OutputSignal::Activated | OutputSignal::Started => out.active = true,
                OutputSignal::Deactivated | OutputSignal::Stopped { .. } => {
                    out.active = false;
                    out.paused = false;
                }
                _ => {}
            }
            state.output_hook(output.0)
        };
        hook.is_some_and(|hook| hook.emit(&signal))
    }

    /// Drop a running output with a native error code.
    pub fn fail_output(&self, output: OutputHandle, code: i32) {
        self.emit_output_signal(output, OutputSignal::Deactivated);
        self.emit_output_signal(output, OutputSignal::Stopped { code });
    }

    /// Start the host application's own output of `kind`.
    pub fn start_host_output(&self, kind: OutputKind) -> OutputHandle {
        let mut state = self.state.lock();
        if let Some(id) = state.host_outputs.get(&kind) {
            return OutputHandle(*id);
        }
        state.ensure_host_encoders();
        let encoders = state.host_encoders;
        let id = state.alloc();
        state.outputs.insert(
            id,
            SimOutput {
                kind,
                settings: serde_json::Value::Null,
                video: encoders.streaming_video.map(|e| e.0),
                audio: encoders.audio.map(|e| e.0),
                active: true,
                paused: false,
                hook: None,
                stats: NativeOutputStats::default(),
                host_owned: true,
                replays_saved: 0,
            },
        );
        state.host_outputs.insert(kind, id);
        state.log(format!("start_host_output:{kind}"));
        OutputHandle(id)
    }

    /// Stop and discard the host application's own output of `kind`.
    pub fn stop_host_output(&self, kind: OutputKind) -> bool {
        let pending = {
            let mut state = self.state.lock();
            let Some(id) = state.host_outputs.remove(&kind) else {
                return false;
            };
            let hook = state.output_hook(id);
            state.outputs.remove(&id);
            if state.host_outputs.is_empty() {
                state.drop_host_encoders();
            }
            state.log(format!("stop_host_output:{kind}"));
            match hook {
                Some(hook) => vec![
                    (hook.clone(), OutputSignal::Stopping),
                    (hook.clone(), OutputSignal::Deactivated),
                    (hook, OutputSignal::Stopped { code: STOP_SUCCESS }),
                ],
                None => Vec::new(),
            }
        };
        emit_output(pending);
        true
    }
}

impl std::fmt::Debug for SimProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimProbe")
            .field("live", &self.live_counts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::SignalConnection;

    #[test]
    fn test_new_host_has_one_program_scene() {
        let (host, probe) = SimulatedHost::new(1280, 720);
        assert_eq!(host.base_resolution(), (1280, 720));
        assert_eq!(host.host_scenes().len(), 1);
        assert_eq!(host.host_program_scene(), host.host_scenes().first().copied());
        assert_eq!(probe.host_scene_names(), ["Scene"]);
    }

    #[test]
    fn test_transition_holds_scene_until_blend_completes() {
        let (mut host, probe) = SimulatedHost::new(1920, 1080);
        let a = host.create_scene("A", 640, 360).unwrap();
        let b = host.create_scene("B", 640, 360).unwrap();
        let t = host.create_transition(TransitionKind::Fade, 640, 360).unwrap();

        host.transition_set_scene(t, Some(a));
        assert!(host.transition_start(t, 300, b));
        assert!(host.transition_phase(t).unwrap().is_in_flight());

        host.release_scene(a);
        assert!(probe.scene_alive(a));

        assert_eq!(probe.complete_transitions(), 1);
        assert!(!probe.scene_alive(a));
        assert_eq!(
            host.transition_phase(t),
            Some(TransitionPhase::Idle { showing: Some(b) })
        );
    }

    #[test]
    fn test_retarget_keeps_blend_start() {
        let (mut host, probe) = SimulatedHost::new(1920, 1080);
        let a = host.create_scene("A", 640, 360).unwrap();
        let b = host.create_scene("B", 640, 360).unwrap();
        let c = host.create_scene("C", 640, 360).unwrap();
        let t = host.create_transition(TransitionKind::Fade, 640, 360).unwrap();
        host.transition_set_scene(t, Some(a));

        assert!(!host.transition_retarget(t, c));
        assert!(host.transition_start(t, 10_000, b));
        assert_eq!(probe.scene_refs(b), 2);
        assert!(host.transition_retarget(t, c));
        assert_eq!(probe.scene_refs(b), 1);
        assert_eq!(probe.transition_destination(t), Some(c));

        match host.transition_phase(t).unwrap() {
            TransitionPhase::InFlight { from, to, .. } => {
                assert_eq!(from, Some(a));
                assert_eq!(to, c);
            }
            other => panic!("expected blend, got {other:?}"),
        }
    }

    #[test]
    fn test_output_start_emits_lifecycle_signals() {
        let (mut host, probe) = SimulatedHost::new(1920, 1080);
        let view = host.create_view(1920, 1080).unwrap();
        let video = host
            .create_video_encoder("v", &EncoderSettings::new("h264", 4000), view, 1920, 1080)
            .unwrap();
        let audio = host
            .create_audio_encoder("a", &EncoderSettings::new("aac", 160), None)
            .unwrap();
        let out = host
            .create_output(OutputKind::Streaming, "out", &serde_json::Value::Null)
            .unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let connection = SignalConnection::new(move |s: &OutputSignal| sink.lock().push(*s));
        host.connect_output_signals(out, connection.hook());

        assert_eq!(host.output_start(out), Err(INVALID_STREAM));
        assert!(host.output_bind_encoders(out, video, audio));
        assert_eq!(host.output_start(out), Ok(()));
        host.output_force_stop(out);

        assert_eq!(
            *seen.lock(),
            vec![
                OutputSignal::Starting,
                OutputSignal::Activated,
                OutputSignal::Started,
                OutputSignal::Stopping,
                OutputSignal::Deactivated,
                OutputSignal::Stopped { code: 0 },
            ]
        );
        assert!(probe.output_hook_connected(out));
    }

    #[test]
    fn test_fail_point_is_one_shot() {
        let (mut host, probe) = SimulatedHost::new(1920, 1080);
        probe.fail_next(FailPoint::CreateView);
        assert!(host.create_view(10, 10).is_err());
        assert!(host.create_view(10, 10).is_ok());
    }

    #[test]
    fn test_host_outputs_share_host_encoders() {
        let (host, probe) = SimulatedHost::new(1920, 1080);
        assert_eq!(host.host_encoders(), HostEncoders::default());

        probe.start_host_output(OutputKind::Streaming);
        assert!(host.host_output_active(OutputKind::Streaming));
        assert!(host.host_encoders().streaming_video.is_some());

        assert!(probe.stop_host_output(OutputKind::Streaming));
        assert!(!host.host_output_active(OutputKind::Streaming));
        assert_eq!(host.host_encoders(), HostEncoders::default());
    }

    #[test]
    fn test_completion_counts_blends_not_signals() {
        let (mut host, probe) = SimulatedHost::new(1920, 1080);
        let a = host.create_scene("A", 640, 360).unwrap();
        let b = host.create_scene("B", 640, 360).unwrap();
        let hooked = host.create_transition(TransitionKind::Fade, 640, 360).unwrap();
        let silent = host.create_transition(TransitionKind::Fade, 640, 360).unwrap();

        let ended = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&ended);
        let connection = SignalConnection::new(move |s: &TransitionSignal| {
            if matches!(s, TransitionSignal::Ended { .. }) {
                *counter.lock() += 1;
            }
        });
        host.connect_transition_signals(hooked, connection.hook());

        for t in [hooked, silent] {
            host.transition_set_scene(t, Some(a));
            assert!(host.transition_start(t, 10_000, b));
        }

        assert_eq!(probe.complete_transitions(), 2);
        assert_eq!(*ended.lock(), 1);
        assert_eq!(probe.complete_transitions(), 0);
    }
}
