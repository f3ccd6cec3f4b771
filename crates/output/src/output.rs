//! The output state machine.
//!
//! States are `Disabled`, `Idle`, `Starting`, `Active` and `Stopping`.
//! `Starting` and `Stopping` are transient and only visible between the
//! matching lifecycle signals.
//!
//! Two locks are involved. `inner` (read/write) holds the enabled flag, the
//! composition leases and the native binding; every control operation takes
//! it. `status` is a plain mutex shared with the signal callback, which runs
//! on the engine thread and touches nothing else.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use mixcast_common::clock::UptimeClock;
use mixcast_common::error::{MixcastError, MixcastResult};
use mixcast_composition::audio::{AudioCompositionInfo, NATIVE_AUDIO_ID};
use mixcast_composition::lease::CompositionListener;
use mixcast_composition::video::{CompositionInfo, NATIVE_VIDEO_ID};
use mixcast_host_core::actor::EngineHandle;
use mixcast_host_core::events::EventSink;
use mixcast_host_core::guard::{Acquired, Rollback};
use mixcast_host_core::handle::{EncoderHandle, OutputHandle};
use mixcast_host_core::host::{HostEngine, HostEvent, NativeOutputStats, OutputKind};
use mixcast_host_core::signal::{OutputSignal, SignalConnection, SignalHook};

use crate::error::{OutputError, OutputErrorReport};
use crate::settings::OutputSettings;

/// Who owns the native output object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// The host application's own output. Only observed.
    HostNative,
    /// Created and started by this engine.
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputState {
    Disabled,
    Idle,
    Starting,
    Active,
    Stopping,
}

/// Fixed id of the host-native output of `kind`.
pub fn native_output_id(kind: OutputKind) -> &'static str {
    match kind {
        OutputKind::Streaming => "native-streaming",
        OutputKind::Recording => "native-recording",
        OutputKind::ReplayBuffer => "native-replay-buffer",
    }
}

/// Lease holder tag used by the output `id`.
pub fn holder_tag(id: &str) -> String {
    format!("output:{id}")
}

fn default_true() -> bool {
    true
}

fn default_video() -> String {
    NATIVE_VIDEO_ID.to_string()
}

fn default_audio() -> String {
    NATIVE_AUDIO_ID.to_string()
}

/// Request to create a custom output. The kind travels next to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSpec {
    pub name: String,

    #[serde(default = "default_video")]
    pub composition_id: String,

    #[serde(default = "default_audio")]
    pub audio_composition_id: String,

    /// Host output whose lifecycle this output follows; `None` for purely
    /// explicit control.
    #[serde(default)]
    pub host_dependency: Option<OutputKind>,

    #[serde(default)]
    pub settings: Value,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl OutputSpec {
    pub fn new(name: impl Into<String>, settings: Value) -> Self {
        Self {
            name: name.into(),
            composition_id: default_video(),
            audio_composition_id: default_audio(),
            host_dependency: None,
            settings,
            enabled: true,
        }
    }

    /// Check the name and parse the settings for `kind`.
    pub fn validate(&self, kind: OutputKind) -> MixcastResult<(String, OutputSettings)> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(MixcastError::validation("output name must not be empty"));
        }
        let settings = OutputSettings::parse(kind, &self.settings)?;
        Ok((name.to_string(), settings))
    }
}

/// Live counters reported in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputStats {
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub drop_rate: f64,
    pub total_bytes: u64,
    pub uptime_ms: u64,
    /// `HH:MM:SS.mmm` while running.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uptime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    pub reconnects: u32,
}

/// Serialized view of an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputSnapshot {
    pub id: String,
    pub name: String,
    pub kind: OutputKind,
    pub provenance: Provenance,
    pub state: OutputState,
    pub enabled: bool,
    pub active: bool,
    pub paused: bool,
    pub reconnecting: bool,
    pub removable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_composition_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_dependency: Option<OutputKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_scene: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<Value>,
    pub stats: OutputStats,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<OutputErrorReport>,
}

/// State shared with the signal callback.
#[derive(Debug, Default)]
struct OutputStatus {
    active: bool,
    starting: bool,
    stopping: bool,
    paused: bool,
    reconnecting: bool,
    reconnects: u32,
    clock: Option<UptimeClock>,
    error: Option<OutputErrorReport>,
    program_scene: Option<String>,
}

impl OutputStatus {
    fn went_down(&mut self) {
        self.active = false;
        self.starting = false;
        self.stopping = false;
        self.paused = false;
        self.reconnecting = false;
        self.clock = None;
    }
}

struct NativeBinding {
    handle: OutputHandle,
    signals: SignalConnection<OutputSignal>,
    /// False for a host output we only listen to.
    owned: bool,
}

struct OutputInner {
    enabled: bool,
    video: Option<CompositionInfo>,
    audio: Option<AudioCompositionInfo>,
    native: Option<NativeBinding>,
}

pub struct Output {
    id: String,
    name: String,
    kind: OutputKind,
    provenance: Provenance,
    host_dependency: Option<OutputKind>,
    settings: Option<OutputSettings>,
    auto_start: bool,
    engine: EngineHandle,
    sink: Arc<dyn EventSink>,
    inner: RwLock<OutputInner>,
    status: Arc<Mutex<OutputStatus>>,
}

impl Output {
    /// Mirror of the host application's own output of `kind`. Always
    /// enabled; attaches when the host reports it started.
    pub fn host_native(kind: OutputKind, engine: EngineHandle, sink: Arc<dyn EventSink>) -> Arc<Self> {
        let name = match kind {
            OutputKind::Streaming => "Host Streaming",
            OutputKind::Recording => "Host Recording",
            OutputKind::ReplayBuffer => "Host Replay Buffer",
        };
        Arc::new(Self {
            id: native_output_id(kind).to_string(),
            name: name.to_string(),
            kind,
            provenance: Provenance::HostNative,
            host_dependency: Some(kind),
            settings: None,
            auto_start: false,
            engine,
            sink,
            inner: RwLock::new(OutputInner {
                enabled: true,
                video: None,
                audio: None,
                native: None,
            }),
            status: Arc::new(Mutex::new(OutputStatus::default())),
        })
    }

    /// A disabled custom output with no compositions attached yet.
    pub fn custom(
        id: String,
        name: String,
        settings: OutputSettings,
        host_dependency: Option<OutputKind>,
        auto_start: bool,
        engine: EngineHandle,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            kind: settings.kind(),
            provenance: Provenance::Custom,
            host_dependency,
            settings: Some(settings),
            auto_start,
            engine,
            sink,
            inner: RwLock::new(OutputInner {
                enabled: false,
                video: None,
                audio: None,
                native: None,
            }),
            status: Arc::new(Mutex::new(OutputStatus::default())),
        })
    }

    /// Hand the output its composition leases.
    pub fn attach_compositions(&self, video: CompositionInfo, audio: AudioCompositionInfo) {
        let program_scene = match video.current_scene() {
            Ok(scene) => scene.map(|s| s.name),
            Err(e) => {
                tracing::warn!(id = %self.id, error = %e, "Could not read the program scene");
                None
            }
        };
        self.status.lock().program_scene = program_scene;
        let mut inner = self.inner.write();
        inner.video = Some(video);
        inner.audio = Some(audio);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn is_host_native(&self) -> bool {
        self.provenance == Provenance::HostNative
    }

    pub fn host_dependency(&self) -> Option<OutputKind> {
        self.host_dependency
    }

    pub fn settings(&self) -> Option<&OutputSettings> {
        self.settings.as_ref()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.read().enabled
    }

    /// Host-native outputs can never be disabled.
    pub fn can_disable(&self) -> bool {
        self.provenance == Provenance::Custom
    }

    pub fn can_start(&self) -> bool {
        self.can_start_with(&self.inner.read())
    }

    /// A native output object exists and reports itself running.
    pub fn is_active(&self) -> bool {
        self.active_with(&self.inner.read())
    }

    pub fn state(&self) -> OutputState {
        self.state_with(&self.inner.read())
    }

    pub fn last_error(&self) -> Option<OutputErrorReport> {
        self.status.lock().error.clone()
    }

    pub fn composition_id(&self) -> Option<String> {
        self.inner.read().video.as_ref().map(|v| v.id().to_string())
    }

    fn can_start_with(&self, inner: &OutputInner) -> bool {
        self.can_disable()
            && inner.video.is_some()
            && inner.audio.is_some()
            && inner.enabled
            && !self.active_with(inner)
    }

    fn active_with(&self, inner: &OutputInner) -> bool {
        inner.native.is_some() && self.status.lock().active
    }

    fn state_with(&self, inner: &OutputInner) -> OutputState {
        if !inner.enabled {
            return OutputState::Disabled;
        }
        let status = self.status.lock();
        if status.stopping {
            OutputState::Stopping
        } else if status.starting {
            OutputState::Starting
        } else if status.active && inner.native.is_some() {
            OutputState::Active
        } else {
            OutputState::Idle
        }
    }

    /// Bind the composition's encoders to a new native output and start it.
    ///
    /// Clears the last error, then returns false without further side
    /// effects when the output cannot start. A failure after that point unwinds every native step and is recorded
    /// as the output's error.
    pub fn start(&self) -> bool {
        let mut inner = self.inner.write();
        self.status.lock().error = None;
        if !self.can_start_with(&inner) {
            tracing::debug!(id = %self.id, kind = %self.kind, "Output cannot start");
            return false;
        }
        if let Some(stale) = inner.native.take() {
            self.release_binding(stale);
        }

        match self.start_native(&inner) {
            Ok(binding) => {
                tracing::info!(id = %self.id, kind = %self.kind, output = %binding.handle, "Output started");
                inner.native = Some(binding);
                true
            }
            Err(report) => {
                tracing::warn!(id = %self.id, kind = %self.kind, reason = %report.reason, "Output failed to start: {}", report.message);
                self.status.lock().went_down();
                self.publish(
                    "OutputStopped",
                    json!({ "code": report.code, "reason": report.reason, "message": report.message }),
                );
                self.status.lock().error = Some(report);
                false
            }
        }
    }

    fn start_native(&self, inner: &OutputInner) -> Result<NativeBinding, OutputErrorReport> {
        let (Some(video), Some(audio)) = (&inner.video, &inner.audio) else {
            return Err(OutputErrorReport::new(
                OutputError::InvalidStream,
                Some("no composition attached"),
            ));
        };
        let stream = video
            .stream_info()
            .map_err(|e| setup_error(OutputError::Generic, &e))?;
        let video_encoder = stream.encoder_for(self.kind).ok_or_else(|| {
            OutputErrorReport::new(
                OutputError::InvalidStream,
                Some("the composition has no video encoder"),
            )
        })?;
        let audio_encoder = audio
            .audio_encoder()
            .map_err(|e| setup_error(OutputError::EncodeError, &e))?;

        let settings = self
            .settings
            .as_ref()
            .map(OutputSettings::native_settings)
            .unwrap_or(Value::Null);
        let signals = self.signal_connection();
        let hook = signals.hook();
        let (kind, name) = (self.kind, self.name.clone());
        let handle = self
            .engine
            .invoke(move |host| {
                start_native(host, kind, &name, &settings, video_encoder, audio_encoder, hook)
            })
            .map_err(|e| setup_error(OutputError::Generic, &e))??;

        Ok(NativeBinding {
            handle,
            signals,
            owned: true,
        })
    }

    /// Force-stop and release the native output. Host-native outputs are
    /// only detached.
    pub fn stop(&self) {
        let mut inner = self.inner.write();
        self.stop_with(&mut inner);
    }

    fn stop_with(&self, inner: &mut OutputInner) {
        self.status.lock().error = None;
        if let Some(binding) = inner.native.take() {
            self.release_binding(binding);
        }
    }

    fn release_binding(&self, binding: NativeBinding) {
        let NativeBinding {
            handle,
            signals,
            owned,
        } = binding;
        let released = self.engine.invoke(move |host| {
            if owned {
                host.output_force_stop(handle);
                host.output_unbind_encoders(handle);
            }
            host.disconnect_output_signals(handle);
            if owned {
                host.release_output(handle);
            }
        });
        if let Err(e) = released {
            tracing::warn!(id = %self.id, output = %handle, error = %e, "Could not release native output");
        }
        signals.disconnect();
        self.status.lock().went_down();
        tracing::debug!(id = %self.id, output = %handle, owned, "Released native output");
    }

    /// Enable or disable. Enabling starts the output right away when
    /// auto-start is on and its host dependency is satisfied. Disabling
    /// always stops it. Host-native outputs refuse to be disabled.
    pub fn set_enabled(&self, enabled: bool) -> bool {
        if !self.can_disable() {
            return enabled;
        }
        let mut inner = self.inner.write();
        if inner.enabled == enabled {
            return true;
        }
        if enabled {
            inner.enabled = true;
            drop(inner);
            tracing::info!(id = %self.id, "Output enabled");
            self.publish("OutputEnabled", json!({}));
            if self.auto_start && self.dependency_satisfied() {
                self.start();
            }
        } else {
            self.stop_with(&mut inner);
            inner.enabled = false;
            drop(inner);
            tracing::info!(id = %self.id, "Output disabled");
            self.publish("OutputDisabled", json!({}));
        }
        true
    }

    fn dependency_satisfied(&self) -> bool {
        match self.host_dependency {
            None => true,
            Some(kind) => self
                .engine
                .invoke(move |host| host.host_output_active(kind))
                .unwrap_or(false),
        }
    }

    /// React to a host lifecycle notification.
    pub fn on_host_event(&self, event: HostEvent) {
        match (self.provenance, event) {
            (_, HostEvent::ApplicationExiting) => self.stop(),
            (Provenance::Custom, HostEvent::Starting(kind)) if self.host_dependency == Some(kind) => {
                if self.is_enabled() {
                    self.start();
                }
            }
            (Provenance::Custom, HostEvent::Stopped(kind)) if self.host_dependency == Some(kind) => {
                self.stop()
            }
            (Provenance::HostNative, HostEvent::Started(kind)) if kind == self.kind => {
                self.attach_host()
            }
            (Provenance::HostNative, HostEvent::Stopped(kind)) if kind == self.kind => self.stop(),
            _ => {}
        }
    }

    fn attach_host(&self) {
        let mut inner = self.inner.write();
        if inner.native.is_some() {
            return;
        }
        let signals = self.signal_connection();
        let hook = signals.hook();
        let kind = self.kind;
        let found = self.engine.invoke(move |host| {
            let output = host.host_output(kind)?;
            host.connect_output_signals(output, hook);
            Some((output, host.output_active(output)))
        });
        match found {
            Ok(Some((handle, active))) => {
                inner.native = Some(NativeBinding {
                    handle,
                    signals,
                    owned: false,
                });
                drop(inner);
                tracing::info!(id = %self.id, output = %handle, "Attached to host output");
                if active {
                    {
                        let mut status = self.status.lock();
                        status.active = true;
                        status.clock = Some(UptimeClock::start());
                    }
                    self.publish("OutputStarted", json!({}));
                }
            }
            Ok(None) => tracing::debug!(id = %self.id, "Host has no output to attach to"),
            Err(e) => tracing::warn!(id = %self.id, error = %e, "Could not attach to host output"),
        }
    }

    /// Pause or resume a running custom recording.
    pub fn set_paused(&self, paused: bool) -> bool {
        if self.kind != OutputKind::Recording || !self.can_disable() {
            return false;
        }
        let Some(handle) = self.active_handle() else {
            return false;
        };
        self.engine
            .invoke(move |host| host.output_pause(handle, paused))
            .unwrap_or(false)
    }

    /// Flush a running replay buffer to disk.
    pub fn save_replay(&self) -> bool {
        if self.kind != OutputKind::ReplayBuffer {
            return false;
        }
        let Some(handle) = self.active_handle() else {
            return false;
        };
        let saved = self
            .engine
            .invoke(move |host| host.output_save_replay(handle))
            .unwrap_or(false);
        if saved {
            self.publish("ReplayBufferSaved", json!({}));
        }
        saved
    }

    fn active_handle(&self) -> Option<OutputHandle> {
        let inner = self.inner.read();
        let binding = inner.native.as_ref()?;
        self.status.lock().active.then_some(binding.handle)
    }

    pub fn snapshot(&self) -> OutputSnapshot {
        let inner = self.inner.read();
        let stats = match inner.native.as_ref().map(|b| b.handle) {
            Some(handle) => self
                .engine
                .invoke(move |host| host.output_stats(handle))
                .unwrap_or_default(),
            None => NativeOutputStats::default(),
        };
        let state = self.state_with(&inner);
        let active = self.active_with(&inner);
        let status = self.status.lock();
        let uptime_ms = status.clock.as_ref().map_or(0, UptimeClock::elapsed_ms);

        OutputSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            provenance: self.provenance,
            state,
            enabled: inner.enabled,
            active,
            paused: status.paused,
            reconnecting: status.reconnecting,
            removable: self.can_disable(),
            composition_id: inner.video.as_ref().map(|v| v.id().to_string()),
            audio_composition_id: inner.audio.as_ref().map(|a| a.id().to_string()),
            host_dependency: self.host_dependency,
            program_scene: status.program_scene.clone(),
            settings: self.settings.as_ref().map(OutputSettings::redacted),
            stats: OutputStats {
                total_frames: stats.total_frames,
                dropped_frames: stats.dropped_frames,
                drop_rate: stats.drop_rate(),
                total_bytes: stats.total_bytes,
                uptime_ms,
                uptime: status
                    .clock
                    .as_ref()
                    .map(|_| UptimeClock::format_timecode(uptime_ms)),
                started_at: status.clock.as_ref().map(|c| c.epoch_wall().to_string()),
                reconnects: status.reconnects,
            },
            last_error: status.error.clone(),
        }
    }

    /// Stop and give back the composition leases.
    pub fn shutdown(&self) {
        let mut inner = self.inner.write();
        self.stop_with(&mut inner);
        inner.video = None;
        inner.audio = None;
    }

    fn signal_connection(&self) -> SignalConnection<OutputSignal> {
        let id = self.id.clone();
        let kind = self.kind;
        let sink = Arc::clone(&self.sink);
        let status = Arc::clone(&self.status);
        SignalConnection::new(move |signal: &OutputSignal| {
            on_signal(&id, kind, sink.as_ref(), &status, *signal)
        })
    }

    fn publish(&self, event: &str, extra: Value) {
        self.sink.publish(event, payload(&self.id, self.kind, extra));
    }
}

fn setup_error(kind: OutputError, e: &MixcastError) -> OutputErrorReport {
    OutputErrorReport::new(kind, Some(&e.to_string()))
}

fn start_native(
    host: &mut dyn HostEngine,
    kind: OutputKind,
    name: &str,
    settings: &Value,
    video: EncoderHandle,
    audio: EncoderHandle,
    hook: SignalHook<OutputSignal>,
) -> Result<OutputHandle, OutputErrorReport> {
    let mut guard = Rollback::new(host);
    let output = guard
        .host()
        .create_output(kind, name, settings)
        .map_err(|e| setup_error(OutputError::Generic, &e))?;
    guard.track(Acquired::Output(output));

    if !guard.host().output_bind_encoders(output, video, audio) {
        return Err(OutputErrorReport::new(
            OutputError::InvalidStream,
            Some("the host refused the encoders"),
        ));
    }
    guard.track(Acquired::OutputEncoders(output));

    guard.host().connect_output_signals(output, hook);
    guard.track(Acquired::OutputSignals(output));

    if let Err(code) = guard.host().output_start(output) {
        let error = OutputError::from_code(code).unwrap_or(OutputError::Generic);
        return Err(error.into());
    }
    guard.commit();
    Ok(output)
}

fn payload(id: &str, kind: OutputKind, extra: Value) -> Value {
    let mut payload = json!({ "outputId": id, "kind": kind });
    if let (Value::Object(map), Value::Object(extra)) = (&mut payload, extra) {
        map.extend(extra);
    }
    payload
}

fn on_signal(
    id: &str,
    kind: OutputKind,
    sink: &dyn EventSink,
    status: &Mutex<OutputStatus>,
    signal: OutputSignal,
) {
    let mut extra = json!({});
    let event = {
        let mut status = status.lock();
        match signal {
            OutputSignal::Starting => {
                status.starting = true;
                "OutputStarting"
            }
            OutputSignal::Started => {
                status.starting = false;
                status.active = true;
                status.clock = Some(UptimeClock::start());
                "OutputStarted"
            }
            OutputSignal::Stopping => {
                status.stopping = true;
                "OutputStopping"
            }
            OutputSignal::Stopped { code } => {
                status.went_down();
                if let Some(error) = OutputError::from_code(code) {
                    tracing::warn!(id, %kind, code, reason = error.reason(), "Output stopped with an error");
                    extra = json!({ "code": code, "reason": error.reason(), "message": error.to_string() });
                    status.error = Some(error.into());
                }
                "OutputStopped"
            }
            OutputSignal::Paused => {
                status.paused = true;
                "OutputPaused"
            }
            OutputSignal::Unpaused => {
                status.paused = false;
                "OutputResumed"
            }
            OutputSignal::Activated => {
                status.active = true;
                "OutputActivated"
            }
            OutputSignal::Deactivated => {
                status.active = false;
                "OutputDeactivated"
            }
            OutputSignal::Reconnecting => {
                status.reconnecting = true;
                status.reconnects += 1;
                "OutputReconnecting"
            }
            OutputSignal::Reconnected => {
                status.reconnecting = false;
                "OutputReconnected"
            }
        }
    };
    tracing::trace!(id, %kind, event, "Output signal");
    sink.publish(event, payload(id, kind, extra));
}

impl CompositionListener for Output {
    fn current_scene_changed(&self, _composition_id: &str, scene: &str) {
        self.status.lock().program_scene = Some(scene.to_string());
    }

    fn transition_ended(&self, _composition_id: &str, scene: &str) {
        self.status.lock().program_scene = Some(scene.to_string());
    }

    fn collection_reset(&self, composition_id: &str) {
        tracing::debug!(id = %self.id, composition_id, "Composition scenes were reset");
        self.status.lock().program_scene = None;
    }
}

impl std::fmt::Debug for Output {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Output")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("provenance", &self.provenance)
            .field("state", &self.state())
            .finish()
    }
}
