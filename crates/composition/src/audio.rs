//! Audio compositions.
//!
//! The native audio composition stands for the host's global mix. It hands
//! out the host's audio encoder when the host has one; otherwise it creates
//! (once) its own encoder on the global mix. A custom audio composition owns
//! an independent mix and one encoder bound to it.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use mixcast_common::config::AudioDefaults;
use mixcast_common::error::{MixcastError, MixcastResult};
use mixcast_host_core::guard::{Acquired, Rollback};
use mixcast_host_core::handle::{AudioMixHandle, EncoderHandle};
use mixcast_host_core::host::{EncoderInfo, EncoderSettings, HostEngine};

use crate::context::CompositionContext;
use crate::custom::validate_encoder;
use crate::lease::{CompositionListener, Lease, Leasable, RefCounter};
use crate::registry::Composition;

/// Fixed id of the host's global audio composition.
pub const NATIVE_AUDIO_ID: &str = "native-audio";

/// Sample rates a custom audio mix may run at.
pub const SUPPORTED_SAMPLE_RATES: [u32; 2] = [44100, 48000];

/// Largest channel count of a custom audio mix.
pub const MAX_CHANNELS: u32 = 8;

/// A consumer's hold on an audio composition.
pub type AudioCompositionInfo = Lease<AudioComposition>;

fn default_audio_encoder() -> EncoderSettings {
    EncoderSettings::new("aac", 160)
}

/// Request to create a custom audio composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioCompositionSpec {
    pub name: String,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u32>,
    #[serde(default = "default_audio_encoder")]
    pub encoder: EncoderSettings,
}

impl AudioCompositionSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sample_rate: None,
            channels: None,
            encoder: default_audio_encoder(),
        }
    }

    /// Resolve defaults and check every field. Returns
    /// `(name, sample_rate, channels)`.
    pub fn validate(&self, defaults: &AudioDefaults) -> MixcastResult<(String, u32, u32)> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(MixcastError::validation(
                "audio composition name must not be empty",
            ));
        }
        let sample_rate = self.sample_rate.unwrap_or(defaults.sample_rate);
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(MixcastError::validation(format!(
                "sample rate {sample_rate} is not one of {SUPPORTED_SAMPLE_RATES:?}"
            )));
        }
        let channels = self.channels.unwrap_or(defaults.channels);
        if !(1..=MAX_CHANNELS).contains(&channels) {
            return Err(MixcastError::validation(format!(
                "channel count {channels} is outside 1..={MAX_CHANNELS}"
            )));
        }
        validate_encoder("audio encoder", &self.encoder)?;
        Ok((name.to_string(), sample_rate, channels))
    }
}

/// Serialized view of an audio composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioCompositionSnapshot {
    pub id: String,
    pub name: String,
    pub native: bool,
    pub removable: bool,
    pub sample_rate: u32,
    pub channels: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoder: Option<EncoderInfo>,
}

/// Native or custom.
pub enum AudioKind {
    Native {
        /// Encoder on the global mix, created on first use when the host
        /// has none of its own.
        fallback: Mutex<Option<EncoderHandle>>,
    },
    Custom {
        sample_rate: u32,
        channels: u32,
        mix: AudioMixHandle,
        encoder: EncoderHandle,
        released: Mutex<bool>,
    },
}

/// One audio mix plus its encoder.
pub struct AudioComposition {
    id: String,
    name: String,
    ctx: CompositionContext,
    refs: RefCounter,
    kind: AudioKind,
}

impl AudioComposition {
    pub fn native(ctx: CompositionContext) -> Arc<Self> {
        Arc::new(Self {
            id: NATIVE_AUDIO_ID.to_string(),
            name: "Main Audio".to_string(),
            ctx,
            refs: RefCounter::new(),
            kind: AudioKind::Native {
                fallback: Mutex::new(None),
            },
        })
    }

    pub fn create_custom(
        spec: &AudioCompositionSpec,
        ctx: CompositionContext,
    ) -> MixcastResult<Arc<Self>> {
        let (name, sample_rate, channels) = spec.validate(&ctx.audio)?;
        let id = uuid::Uuid::new_v4().to_string();
        let settings = spec.encoder.clone();
        let encoder_name = format!("{name} audio");

        let (mix, encoder) = ctx.engine.invoke(move |host| {
            let mut guard = Rollback::new(host);
            let mix = guard.host().create_audio_mix(sample_rate, channels)?;
            guard.track(Acquired::AudioMix(mix));
            let encoder = guard
                .host()
                .create_audio_encoder(&encoder_name, &settings, Some(mix))?;
            guard.track(Acquired::Encoder(encoder));
            guard.commit();
            Ok::<_, MixcastError>((mix, encoder))
        })??;

        tracing::info!(id = %id, name = %name, sample_rate, channels, "Created audio composition");
        Ok(Arc::new(Self {
            id,
            name,
            ctx,
            refs: RefCounter::new(),
            kind: AudioKind::Custom {
                sample_rate,
                channels,
                mix,
                encoder,
                released: Mutex::new(false),
            },
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_native(&self) -> bool {
        matches!(self.kind, AudioKind::Native { .. })
    }

    pub fn ref_count(&self) -> usize {
        self.refs.count()
    }

    pub fn holders(&self) -> std::collections::BTreeMap<String, usize> {
        self.refs.holders()
    }

    pub fn get_composition_info(
        this: &Arc<Self>,
        listener: Option<Weak<dyn CompositionListener>>,
        holder_tag: &str,
    ) -> AudioCompositionInfo {
        Lease::acquire(Arc::clone(this), listener, holder_tag)
    }

    /// Encoder an output binds for this composition's audio.
    pub fn audio_encoder(&self) -> MixcastResult<EncoderHandle> {
        match &self.kind {
            AudioKind::Custom { encoder, .. } => Ok(*encoder),
            AudioKind::Native { fallback } => {
                let mut fallback = fallback.lock();
                let cached = *fallback;
                let (encoder, created) = self.ctx.engine.invoke(move |host| {
                    if let Some(encoder) = host.host_encoders().audio {
                        return Ok((encoder, false));
                    }
                    if let Some(encoder) = cached {
                        return Ok((encoder, false));
                    }
                    host.create_audio_encoder("global audio", &default_audio_encoder(), None)
                        .map(|encoder| (encoder, true))
                })??;
                if created {
                    tracing::debug!(%encoder, "Created encoder on the global audio mix");
                    *fallback = Some(encoder);
                }
                Ok(encoder)
            }
        }
    }

    pub fn serialize(&self) -> MixcastResult<AudioCompositionSnapshot> {
        let removable = self.can_remove();
        match &self.kind {
            AudioKind::Native { fallback } => {
                let cached = *fallback.lock();
                let id = self.id.clone();
                let name = self.name.clone();
                self.ctx.engine.invoke(move |host| {
                    let mix = host.host_audio();
                    let encoder = host
                        .host_encoders()
                        .audio
                        .or(cached)
                        .and_then(|e| host.encoder_info(e));
                    AudioCompositionSnapshot {
                        id,
                        name,
                        native: true,
                        removable,
                        sample_rate: mix.sample_rate,
                        channels: mix.channels,
                        encoder,
                    }
                })
            }
            AudioKind::Custom {
                sample_rate,
                channels,
                encoder,
                ..
            } => {
                let encoder = *encoder;
                let info = self
                    .ctx
                    .engine
                    .invoke(move |host| host.encoder_info(encoder))?;
                Ok(AudioCompositionSnapshot {
                    id: self.id.clone(),
                    name: self.name.clone(),
                    native: false,
                    removable,
                    sample_rate: *sample_rate,
                    channels: *channels,
                    encoder: info,
                })
            }
        }
    }

    /// Release native resources: the encoder, then the mix. For the native
    /// composition only the fallback encoder is released.
    pub fn teardown(&self) -> MixcastResult<()> {
        match &self.kind {
            AudioKind::Native { fallback } => {
                if let Some(encoder) = fallback.lock().take() {
                    self.ctx
                        .engine
                        .invoke(move |host| host.release_encoder(encoder))?;
                }
                Ok(())
            }
            AudioKind::Custom {
                mix,
                encoder,
                released,
                ..
            } => {
                let mut released = released.lock();
                if *released {
                    return Ok(());
                }
                let (mix, encoder) = (*mix, *encoder);
                self.ctx.engine.invoke(move |host| release_custom(host, encoder, mix))?;
                *released = true;
                tracing::info!(id = %self.id, name = %self.name, "Released audio composition");
                Ok(())
            }
        }
    }
}

fn release_custom(host: &mut dyn HostEngine, encoder: EncoderHandle, mix: AudioMixHandle) {
    host.release_encoder(encoder);
    host.release_audio_mix(mix);
}

impl Leasable for AudioComposition {
    fn ref_counter(&self) -> &RefCounter {
        &self.refs
    }
}

impl Composition for AudioComposition {
    type Snapshot = AudioCompositionSnapshot;
    const KIND: &'static str = "audio composition";

    fn id(&self) -> &str {
        &self.id
    }

    fn is_native(&self) -> bool {
        AudioComposition::is_native(self)
    }

    fn lease(
        this: &Arc<Self>,
        listener: Option<Weak<dyn CompositionListener>>,
        holder_tag: &str,
    ) -> Lease<Self> {
        AudioComposition::get_composition_info(this, listener, holder_tag)
    }

    fn serialize(&self) -> MixcastResult<AudioCompositionSnapshot> {
        AudioComposition::serialize(self)
    }

    fn teardown(&self) -> MixcastResult<()> {
        AudioComposition::teardown(self)
    }
}

impl std::fmt::Debug for AudioComposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioComposition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("native", &self.is_native())
            .field("refs", &self.refs.count())
            .finish()
    }
}
