//! The host engine collaborator contract.
//!
//! Everything the engine needs from the surrounding application is expressed
//! through [`HostEngine`]. Implementations are moved onto the engine thread
//! and only ever called from there, so they need `Send` but not `Sync`.

use serde::{Deserialize, Serialize};

use mixcast_common::error::MixcastResult;

use crate::handle::{
    AudioMixHandle, EncoderHandle, OutputHandle, SceneHandle, TransitionHandle, ViewHandle,
};
use crate::signal::{OutputSignal, SignalHook, TransitionSignal};

/// The three output kinds the host knows how to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Streaming,
    Recording,
    ReplayBuffer,
}

impl OutputKind {
    pub const ALL: [OutputKind; 3] = [
        OutputKind::Streaming,
        OutputKind::Recording,
        OutputKind::ReplayBuffer,
    ];

    /// Stable lowercase label used in ids and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            OutputKind::Streaming => "streaming",
            OutputKind::Recording => "recording",
            OutputKind::ReplayBuffer => "replay_buffer",
        }
    }
}

impl std::fmt::Display for OutputKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle notifications emitted by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostEvent {
    Starting(OutputKind),
    Started(OutputKind),
    Stopping(OutputKind),
    Stopped(OutputKind),
    /// The host discarded its whole scene-graph state.
    SceneCollectionReset,
    ApplicationExiting,
}

/// Codec parameters for an encoder request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderSettings {
    /// Codec identifier, e.g. `h264`, `hevc`, `aac`, `opus`.
    pub codec: String,

    /// Target bitrate in kbps.
    pub bitrate_kbps: u32,

    /// Keyframe interval in seconds (video only).
    #[serde(default)]
    pub keyint_secs: Option<u32>,
}

impl EncoderSettings {
    pub fn new(codec: impl Into<String>, bitrate_kbps: u32) -> Self {
        Self {
            codec: codec.into(),
            bitrate_kbps,
            keyint_secs: None,
        }
    }
}

/// What the host reports about a live encoder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncoderInfo {
    pub codec: String,
    pub bitrate_kbps: u32,
    /// Frame size for video encoders; `None` for audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
}

/// Encoders the host's built-in pipeline currently has. Empty until the host
/// starts one of its own outputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostEncoders {
    pub streaming_video: Option<EncoderHandle>,
    pub recording_video: Option<EncoderHandle>,
    pub audio: Option<EncoderHandle>,
}

/// Parameters of an audio mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioMixInfo {
    pub sample_rate: u32,
    pub channels: u32,
}

/// Render node type for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Cut,
    Fade,
}

/// Observed state of a transition node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionPhase {
    /// Showing a single scene (or nothing).
    Idle { showing: Option<SceneHandle> },
    /// Blending from one scene to another.
    InFlight {
        from: Option<SceneHandle>,
        to: SceneHandle,
        progress: f64,
    },
}

impl TransitionPhase {
    /// The scene the transition will settle on.
    pub fn destination(&self) -> Option<SceneHandle> {
        match self {
            TransitionPhase::Idle { showing } => *showing,
            TransitionPhase::InFlight { to, .. } => Some(*to),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, TransitionPhase::InFlight { .. })
    }
}

/// Live counters of a native output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeOutputStats {
    pub total_frames: u64,
    pub dropped_frames: u64,
    pub total_bytes: u64,
}

impl NativeOutputStats {
    /// Dropped frames as a percentage of all frames.
    pub fn drop_rate(&self) -> f64 {
        let total = self.total_frames + self.dropped_frames;
        if total == 0 {
            return 0.0;
        }
        self.dropped_frames as f64 / total as f64 * 100.0
    }
}

/// Native stop code reported by a successful stop.
pub const STOP_SUCCESS: i32 = 0;

/// The host rendering/encoding engine.
///
/// Creation calls return a handle or a resource error. Release calls are
/// infallible and ignore unknown handles.
pub trait HostEngine: Send {
    // Host-native pipeline

    /// Frame size of the host's main video mix.
    fn base_resolution(&self) -> (u32, u32);

    /// Parameters of the host's global audio mix.
    fn host_audio(&self) -> AudioMixInfo;

    /// Scenes in the host's own collection, in display order.
    fn host_scenes(&self) -> Vec<SceneHandle>;

    /// Scene the host's main pipeline currently shows.
    fn host_program_scene(&self) -> Option<SceneHandle>;

    /// Create a scene with the host's default sizing and add it to the
    /// host's collection.
    fn create_host_scene(&mut self, name: &str) -> MixcastResult<SceneHandle>;

    /// Remove a scene from the host's collection. Returns false if the host
    /// does not own it.
    fn remove_host_scene(&mut self, scene: SceneHandle) -> bool;

    /// Switch the host's main pipeline to `scene` using the host's own
    /// transition.
    fn set_host_program_scene(&mut self, scene: SceneHandle) -> bool;

    /// Transition node driving the host's main pipeline.
    fn host_transition(&self) -> Option<TransitionHandle>;

    /// Replace the host's main transition.
    fn set_host_transition(&mut self, transition: TransitionHandle) -> bool;

    /// Encoders the host pipeline currently owns.
    fn host_encoders(&self) -> HostEncoders;

    /// The host's own output of `kind`, if it exists right now.
    fn host_output(&self, kind: OutputKind) -> Option<OutputHandle>;

    /// Whether the host's own output of `kind` is running.
    fn host_output_active(&self, kind: OutputKind) -> bool;

    // Scenes

    fn create_scene(&mut self, name: &str, width: u32, height: u32)
        -> MixcastResult<SceneHandle>;
    fn release_scene(&mut self, scene: SceneHandle);
    fn scene_name(&self, scene: SceneHandle) -> Option<String>;

    // Transitions

    fn create_transition(
        &mut self,
        kind: TransitionKind,
        width: u32,
        height: u32,
    ) -> MixcastResult<TransitionHandle>;
    fn release_transition(&mut self, transition: TransitionHandle);

    /// Hard-cut the transition to `scene` (or to nothing).
    fn transition_set_scene(&mut self, transition: TransitionHandle, scene: Option<SceneHandle>);

    /// Start a timed blend from whatever is showing to `target`.
    fn transition_start(
        &mut self,
        transition: TransitionHandle,
        duration_ms: u32,
        target: SceneHandle,
    ) -> bool;

    /// Replace the destination of an in-flight blend without resetting its
    /// progress. Returns false if nothing is in flight.
    fn transition_retarget(&mut self, transition: TransitionHandle, target: SceneHandle) -> bool;

    fn transition_phase(&self, transition: TransitionHandle) -> Option<TransitionPhase>;

    /// Bracket a transition replacement so renderers never observe a
    /// half-swapped graph.
    fn transition_swap_begin(&mut self, incoming: TransitionHandle, outgoing: TransitionHandle);
    fn transition_swap_end(&mut self, incoming: TransitionHandle, outgoing: TransitionHandle);

    fn connect_transition_signals(
        &mut self,
        transition: TransitionHandle,
        hook: SignalHook<TransitionSignal>,
    );
    fn disconnect_transition_signals(&mut self, transition: TransitionHandle);

    // Views

    fn create_view(&mut self, width: u32, height: u32) -> MixcastResult<ViewHandle>;
    fn view_set_source(&mut self, view: ViewHandle, source: Option<TransitionHandle>);
    fn release_view(&mut self, view: ViewHandle);

    // Encoders and audio mixes

    fn create_video_encoder(
        &mut self,
        name: &str,
        settings: &EncoderSettings,
        view: ViewHandle,
        width: u32,
        height: u32,
    ) -> MixcastResult<EncoderHandle>;

    fn create_audio_mix(&mut self, sample_rate: u32, channels: u32)
        -> MixcastResult<AudioMixHandle>;
    fn release_audio_mix(&mut self, mix: AudioMixHandle);

    /// Create an audio encoder fed by `mix`, or by the host's global mix
    /// when `mix` is `None`.
    fn create_audio_encoder(
        &mut self,
        name: &str,
        settings: &EncoderSettings,
        mix: Option<AudioMixHandle>,
    ) -> MixcastResult<EncoderHandle>;

    fn release_encoder(&mut self, encoder: EncoderHandle);
    fn encoder_info(&self, encoder: EncoderHandle) -> Option<EncoderInfo>;

    // Outputs

    fn create_output(
        &mut self,
        kind: OutputKind,
        name: &str,
        settings: &serde_json::Value,
    ) -> MixcastResult<OutputHandle>;
    fn output_bind_encoders(
        &mut self,
        output: OutputHandle,
        video: EncoderHandle,
        audio: EncoderHandle,
    ) -> bool;
    fn output_unbind_encoders(&mut self, output: OutputHandle);
    fn connect_output_signals(&mut self, output: OutputHandle, hook: SignalHook<OutputSignal>);
    fn disconnect_output_signals(&mut self, output: OutputHandle);

    /// Start the output. On failure returns the native stop code.
    fn output_start(&mut self, output: OutputHandle) -> Result<(), i32>;

    /// Stop immediately without draining buffered data.
    fn output_force_stop(&mut self, output: OutputHandle);
    fn output_pause(&mut self, output: OutputHandle, paused: bool) -> bool;
    fn output_save_replay(&mut self, output: OutputHandle) -> bool;
    fn output_active(&self, output: OutputHandle) -> bool;
    fn output_stats(&self, output: OutputHandle) -> NativeOutputStats;
    fn release_output(&mut self, output: OutputHandle);
}
