//! Kind-specific output settings.
//!
//! Settings arrive as JSON alongside the output kind and are validated in
//! full before any native resource is touched.

use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use mixcast_common::error::{MixcastError, MixcastResult};
use mixcast_host_core::host::OutputKind;

/// URL schemes a streaming server may use.
pub const STREAM_SCHEMES: [&str; 4] = ["rtmp://", "rtmps://", "srt://", "rist://"];

/// Default recording file name pattern.
pub const DEFAULT_FILENAME_FORMAT: &str = "%CCYY-%MM-%DD %hh-%mm-%ss";

fn default_filename_format() -> String {
    DEFAULT_FILENAME_FORMAT.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingSettings {
    pub server: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub use_auth: bool,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl StreamingSettings {
    pub fn validate(&self) -> MixcastResult<()> {
        let server = self.server.trim();
        if server.is_empty() {
            return Err(MixcastError::validation("streaming server must not be empty"));
        }
        let Some(scheme) = STREAM_SCHEMES.iter().find(|s| server.starts_with(*s)) else {
            return Err(MixcastError::validation(format!(
                "streaming server '{server}' must use one of {STREAM_SCHEMES:?}"
            )));
        };
        if server.len() == scheme.len() {
            return Err(MixcastError::validation(format!(
                "streaming server '{server}' has no host"
            )));
        }
        if self.use_auth && self.username.trim().is_empty() {
            return Err(MixcastError::validation(
                "authenticated streaming requires a username",
            ));
        }
        Ok(())
    }
}

/// Recording container.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingFormat {
    #[default]
    Mkv,
    Mp4,
    Mov,
    Flv,
    Ts,
}

impl RecordingFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mkv => "mkv",
            Self::Mp4 => "mp4",
            Self::Mov => "mov",
            Self::Flv => "flv",
            Self::Ts => "ts",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingSettings {
    /// Directory recordings are written to.
    pub path: String,
    #[serde(default)]
    pub format: RecordingFormat,
    #[serde(default = "default_filename_format")]
    pub filename_format: String,
}

impl RecordingSettings {
    /// The directory may not exist yet, but an existing path must be a
    /// directory.
    pub fn validate(&self) -> MixcastResult<()> {
        let path = self.path.trim();
        if path.is_empty() {
            return Err(MixcastError::validation("recording path must not be empty"));
        }
        let dir = Path::new(path);
        if dir.exists() && !dir.is_dir() {
            return Err(MixcastError::validation(format!(
                "recording path '{path}' is not a directory"
            )));
        }
        if self.filename_format.trim().is_empty() {
            return Err(MixcastError::validation(
                "recording filename format must not be empty",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayBufferSettings {
    #[serde(flatten)]
    pub recording: RecordingSettings,
    pub max_seconds: u32,
    pub max_size_mb: u32,
}

impl ReplayBufferSettings {
    pub fn validate(&self) -> MixcastResult<()> {
        self.recording.validate()?;
        if self.max_seconds == 0 {
            return Err(MixcastError::validation(
                "replay buffer maxSeconds must be positive",
            ));
        }
        if self.max_size_mb == 0 {
            return Err(MixcastError::validation(
                "replay buffer maxSizeMb must be positive",
            ));
        }
        Ok(())
    }
}

/// Settings of one output, by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputSettings {
    Streaming(StreamingSettings),
    Recording(RecordingSettings),
    ReplayBuffer(ReplayBufferSettings),
}

impl OutputSettings {
    /// Parse and validate `value` as settings for `kind`.
    pub fn parse(kind: OutputKind, value: &Value) -> MixcastResult<Self> {
        let settings = match kind {
            OutputKind::Streaming => Self::Streaming(from_value(kind, value)?),
            OutputKind::Recording => Self::Recording(from_value(kind, value)?),
            OutputKind::ReplayBuffer => Self::ReplayBuffer(from_value(kind, value)?),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn kind(&self) -> OutputKind {
        match self {
            Self::Streaming(_) => OutputKind::Streaming,
            Self::Recording(_) => OutputKind::Recording,
            Self::ReplayBuffer(_) => OutputKind::ReplayBuffer,
        }
    }

    pub fn validate(&self) -> MixcastResult<()> {
        match self {
            Self::Streaming(s) => s.validate(),
            Self::Recording(r) => r.validate(),
            Self::ReplayBuffer(r) => r.validate(),
        }
    }

    /// Full settings handed to the host, secrets included.
    pub fn native_settings(&self) -> Value {
        let value = match self {
            Self::Streaming(s) => serde_json::to_value(s),
            Self::Recording(r) => serde_json::to_value(r),
            Self::ReplayBuffer(r) => serde_json::to_value(r),
        };
        value.unwrap_or(Value::Null)
    }

    /// Settings safe to report: the stream key becomes `keySet` and the
    /// password is left out.
    pub fn redacted(&self) -> Value {
        match self {
            Self::Streaming(s) => json!({
                "server": s.server,
                "keySet": !s.key.is_empty(),
                "useAuth": s.use_auth,
                "username": s.username,
            }),
            other => other.native_settings(),
        }
    }
}

fn from_value<T: serde::de::DeserializeOwned>(kind: OutputKind, value: &Value) -> MixcastResult<T> {
    T::deserialize(value)
        .map_err(|e| MixcastError::validation(format!("invalid {kind} settings: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streaming_server_schemes() {
        let ok = json!({ "server": "rtmp://live.example.com/app", "key": "abc" });
        assert!(OutputSettings::parse(OutputKind::Streaming, &ok).is_ok());

        for server in ["", "http://example.com", "rtmp://", "   "] {
            let bad = json!({ "server": server });
            let err = OutputSettings::parse(OutputKind::Streaming, &bad).unwrap_err();
            assert!(err.is_validation(), "{server}");
        }
    }

    #[test]
    fn test_auth_requires_username() {
        let value = json!({ "server": "srt://ingest:9000", "useAuth": true });
        assert!(OutputSettings::parse(OutputKind::Streaming, &value).is_err());
    }

    #[test]
    fn test_redacted_hides_secrets() {
        let value = json!({
            "server": "rtmps://live.example.com/app",
            "key": "secret-key",
            "useAuth": true,
            "username": "me",
            "password": "hunter2",
        });
        let settings = OutputSettings::parse(OutputKind::Streaming, &value).unwrap();
        let redacted = settings.redacted();
        assert_eq!(redacted["keySet"], true);
        assert!(redacted.get("key").is_none());
        assert!(redacted.get("password").is_none());
        assert_eq!(settings.native_settings()["key"], "secret-key");
    }

    #[test]
    fn test_recording_defaults() {
        let value = json!({ "path": "/tmp/recordings" });
        let OutputSettings::Recording(rec) =
            OutputSettings::parse(OutputKind::Recording, &value).unwrap()
        else {
            panic!("expected recording settings");
        };
        assert_eq!(rec.format, RecordingFormat::Mkv);
        assert_eq!(rec.filename_format, DEFAULT_FILENAME_FORMAT);
    }

    #[test]
    fn test_recording_rejects_bad_format_and_file_path() {
        let bad_format = json!({ "path": "/tmp", "format": "avi" });
        assert!(OutputSettings::parse(OutputKind::Recording, &bad_format).is_err());

        let file = std::env::temp_dir().join(format!("mixcast-settings-{}", std::process::id()));
        std::fs::write(&file, b"x").unwrap();
        let not_dir = json!({ "path": file.to_string_lossy() });
        assert!(OutputSettings::parse(OutputKind::Recording, &not_dir).is_err());
        std::fs::remove_file(&file).unwrap();
    }

    #[test]
    fn test_replay_buffer_limits() {
        let ok = json!({ "path": "/tmp/replays", "format": "mp4", "maxSeconds": 30, "maxSizeMb": 512 });
        let settings = OutputSettings::parse(OutputKind::ReplayBuffer, &ok).unwrap();
        assert_eq!(settings.kind(), OutputKind::ReplayBuffer);
        assert_eq!(settings.native_settings()["format"], "mp4");
        assert_eq!(settings.native_settings()["maxSeconds"], 30);

        let zero = json!({ "path": "/tmp/replays", "maxSeconds": 0, "maxSizeMb": 512 });
        assert!(OutputSettings::parse(OutputKind::ReplayBuffer, &zero).is_err());
        let missing = json!({ "path": "/tmp/replays" });
        assert!(OutputSettings::parse(OutputKind::ReplayBuffer, &missing).is_err());
    }
}
