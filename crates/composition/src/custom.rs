//! Native resources of a custom video composition.
//!
//! Assembly runs as one engine call under a [`Rollback`] guard, so a failure
//! at any step releases whatever earlier steps acquired. Teardown releases
//! in a fixed order: encoders, then the view, then scenes, then the audio
//! slot, then the transition node.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use mixcast_common::config::CompositionDefaults;
use mixcast_common::error::{MixcastError, MixcastResult};
use mixcast_host_core::audio::AudioSlotTable;
use mixcast_host_core::guard::{Acquired, Rollback};
use mixcast_host_core::handle::{EncoderHandle, SceneHandle, TransitionHandle, ViewHandle};
use mixcast_host_core::host::{EncoderSettings, HostEngine, TransitionKind};
use mixcast_host_core::signal::{SignalConnection, SignalHook, TransitionSignal};

use crate::scene::SceneSet;

fn default_streaming_encoder() -> EncoderSettings {
    EncoderSettings::new("h264", 6000)
}

/// Request to create a custom video composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,

    #[serde(default = "default_streaming_encoder")]
    pub streaming_encoder: EncoderSettings,

    /// Separate encoder for recording and replay-buffer outputs.
    #[serde(default)]
    pub recording_encoder: Option<EncoderSettings>,

    /// Scene-switch blend duration; the configured default when absent.
    #[serde(default)]
    pub transition_duration_ms: Option<u32>,
}

impl CompositionSpec {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            streaming_encoder: default_streaming_encoder(),
            recording_encoder: None,
            transition_duration_ms: None,
        }
    }

    /// Check every field and resolve defaults. Touches no native resource.
    pub fn validate(&self, defaults: &CompositionDefaults) -> MixcastResult<ValidatedSpec> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(MixcastError::validation("composition name must not be empty"));
        }
        let width = checked_dimension("width", self.width, defaults)?;
        let height = checked_dimension("height", self.height, defaults)?;
        validate_encoder("streaming encoder", &self.streaming_encoder)?;
        if let Some(recording) = &self.recording_encoder {
            validate_encoder("recording encoder", recording)?;
        }
        Ok(ValidatedSpec {
            name: name.to_string(),
            width,
            height,
            streaming_encoder: self.streaming_encoder.clone(),
            recording_encoder: self.recording_encoder.clone(),
            transition_duration_ms: self
                .transition_duration_ms
                .unwrap_or(defaults.transition_duration_ms),
            default_scene: defaults.default_scene_name.clone(),
        })
    }
}

fn checked_dimension(
    label: &str,
    requested: u32,
    defaults: &CompositionDefaults,
) -> MixcastResult<u32> {
    let aligned = defaults.align(requested);
    if aligned < defaults.min_dimension || aligned > defaults.max_dimension {
        return Err(MixcastError::validation(format!(
            "{label} {requested} is outside {}..={} after alignment to {}",
            defaults.min_dimension, defaults.max_dimension, defaults.dimension_alignment
        )));
    }
    Ok(aligned)
}

pub(crate) fn validate_encoder(label: &str, settings: &EncoderSettings) -> MixcastResult<()> {
    if settings.codec.trim().is_empty() {
        return Err(MixcastError::validation(format!("{label} codec is empty")));
    }
    if settings.bitrate_kbps == 0 {
        return Err(MixcastError::validation(format!(
            "{label} bitrate must be positive"
        )));
    }
    Ok(())
}

/// A fully checked creation request.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSpec {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub streaming_encoder: EncoderSettings,
    pub recording_encoder: Option<EncoderSettings>,
    pub transition_duration_ms: u32,
    pub default_scene: String,
}

/// Handles produced by [`assemble`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct NativeParts {
    pub transition: TransitionHandle,
    pub view: ViewHandle,
    pub streaming_encoder: EncoderHandle,
    pub recording_encoder: Option<EncoderHandle>,
    pub scene: SceneHandle,
}

/// Build the native pipeline of a custom composition. All or nothing.
pub(crate) fn assemble(
    host: &mut dyn HostEngine,
    spec: &ValidatedSpec,
    hook: SignalHook<TransitionSignal>,
) -> MixcastResult<NativeParts> {
    let (width, height) = (spec.width, spec.height);
    let mut guard = Rollback::new(host);

    let transition = guard
        .host()
        .create_transition(TransitionKind::Cut, width, height)?;
    guard.track(Acquired::Transition(transition));

    let view = guard.host().create_view(width, height)?;
    guard.track(Acquired::View(view));
    guard.host().view_set_source(view, Some(transition));
    guard.track(Acquired::ViewSource(view));

    let streaming_encoder = guard.host().create_video_encoder(
        &format!("{} streaming", spec.name),
        &spec.streaming_encoder,
        view,
        width,
        height,
    )?;
    guard.track(Acquired::Encoder(streaming_encoder));

    let recording_encoder = match &spec.recording_encoder {
        Some(settings) => {
            let encoder = guard.host().create_video_encoder(
                &format!("{} recording", spec.name),
                settings,
                view,
                width,
                height,
            )?;
            guard.track(Acquired::Encoder(encoder));
            Some(encoder)
        }
        None => None,
    };

    let scene = guard
        .host()
        .create_scene(&spec.default_scene, width, height)?;
    guard.track(Acquired::Scene(scene));
    guard.host().transition_set_scene(transition, Some(scene));

    guard.host().connect_transition_signals(transition, hook);
    guard.track(Acquired::TransitionSignals(transition));

    guard.commit();
    Ok(NativeParts {
        transition,
        view,
        streaming_encoder,
        recording_encoder,
        scene,
    })
}

/// Live state of a custom video composition.
pub struct CustomVideo {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) transition: TransitionHandle,
    /// Raw id of the current transition node, read by the audio route.
    pub(crate) route_source: Arc<AtomicU64>,
    pub(crate) view: ViewHandle,
    pub(crate) streaming_encoder: EncoderHandle,
    pub(crate) recording_encoder: Option<EncoderHandle>,
    pub(crate) scenes: SceneSet,
    pub(crate) audio_slot: Option<usize>,
    pub(crate) transition_duration_ms: u32,
    pub(crate) signals: Option<SignalConnection<TransitionSignal>>,
    pub(crate) released: bool,
}

impl CustomVideo {
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn audio_slot(&self) -> Option<usize> {
        self.audio_slot
    }

    pub(crate) fn teardown_plan(&self) -> TeardownPlan {
        TeardownPlan {
            transition: self.transition,
            view: self.view,
            encoders: std::iter::once(self.streaming_encoder)
                .chain(self.recording_encoder)
                .collect(),
            scenes: self.scenes.handles(),
            audio_slot: self.audio_slot,
        }
    }
}

impl std::fmt::Debug for CustomVideo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomVideo")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("transition", &self.transition)
            .field("view", &self.view)
            .field("scenes", &self.scenes.names())
            .field("audio_slot", &self.audio_slot)
            .finish()
    }
}

/// Handles to release on teardown.
#[derive(Debug, Clone)]
pub(crate) struct TeardownPlan {
    pub transition: TransitionHandle,
    pub view: ViewHandle,
    pub encoders: Vec<EncoderHandle>,
    pub scenes: Vec<SceneHandle>,
    pub audio_slot: Option<usize>,
}

/// Release a custom composition's native pipeline.
pub(crate) fn teardown(host: &mut dyn HostEngine, plan: TeardownPlan, slots: &AudioSlotTable) {
    host.disconnect_transition_signals(plan.transition);
    for encoder in plan.encoders {
        host.release_encoder(encoder);
    }
    host.view_set_source(plan.view, None);
    host.release_view(plan.view);
    for scene in plan.scenes {
        host.release_scene(scene);
    }
    if let Some(slot) = plan.audio_slot {
        slots.release(slot);
    }
    host.release_transition(plan.transition);
}
