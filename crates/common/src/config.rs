//! Engine configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{MixcastError, MixcastResult};

/// Global engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Composition defaults and limits.
    pub compositions: CompositionDefaults,

    /// Audio routing and mix defaults.
    pub audio: AudioDefaults,

    /// Output behaviour.
    pub outputs: OutputDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Limits applied to custom video compositions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositionDefaults {
    /// Encoders require frame dimensions to be a multiple of this value.
    /// Requested sizes are rounded down to it.
    pub dimension_alignment: u32,

    /// Smallest accepted width/height after alignment.
    pub min_dimension: u32,

    /// Largest accepted width/height.
    pub max_dimension: u32,

    /// Duration of the automatic scene-switch blend.
    pub transition_duration_ms: u32,

    /// Name given to the scene every custom composition starts with.
    pub default_scene_name: String,
}

/// Audio defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioDefaults {
    /// Number of global audio-output slots shared by all compositions.
    pub slot_count: usize,

    /// Sample rate used when an audio composition request omits one.
    pub sample_rate: u32,

    /// Channel count used when an audio composition request omits one.
    pub channels: u32,
}

/// Output behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputDefaults {
    /// Start an output as soon as it is enabled, when its host dependency
    /// allows it.
    pub start_on_enable: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "mixcast=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

impl Default for CompositionDefaults {
    fn default() -> Self {
        Self {
            dimension_alignment: 2,
            min_dimension: 2,
            max_dimension: 16384,
            transition_duration_ms: 300,
            default_scene_name: "Scene".to_string(),
        }
    }
}

impl Default for AudioDefaults {
    fn default() -> Self {
        Self {
            slot_count: 64,
            sample_rate: 48000,
            channels: 2,
        }
    }
}

impl Default for OutputDefaults {
    fn default() -> Self {
        Self {
            start_on_enable: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl CompositionDefaults {
    /// Round a requested dimension down to the encoder alignment.
    pub fn align(&self, value: u32) -> u32 {
        let alignment = self.dimension_alignment.max(1);
        value - value % alignment
    }
}

impl EngineConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match Self::load_from(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Failed to load config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Load config from an explicit path.
    pub fn load_from(path: impl AsRef<Path>) -> MixcastResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(MixcastError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honour.
    pub fn validate(&self) -> MixcastResult<()> {
        let c = &self.compositions;
        if c.dimension_alignment == 0 {
            return Err(MixcastError::config("dimension_alignment must be positive"));
        }
        if c.min_dimension == 0 || c.min_dimension > c.max_dimension {
            return Err(MixcastError::config(format!(
                "invalid dimension range {}..={}",
                c.min_dimension, c.max_dimension
            )));
        }
        if c.default_scene_name.trim().is_empty() {
            return Err(MixcastError::config("default_scene_name must not be empty"));
        }
        if self.audio.slot_count == 0 {
            return Err(MixcastError::config("audio.slot_count must be positive"));
        }
        Ok(())
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("mixcast").join("config.json")
}
