//! Runtime failures of a native output.
//!
//! These are never returned from an operation. They are recorded on the
//! output, reported in its snapshot and published with `OutputStopped`.

use serde::{Deserialize, Serialize};

/// Why a native output stopped or failed to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum OutputError {
    #[error("the output path is invalid or not writable")]
    BadPath,

    #[error("could not connect to the server")]
    ConnectFailed,

    #[error("the stream is missing a video or audio encoder")]
    InvalidStream,

    #[error("generic output failure")]
    Generic,

    #[error("disconnected from the server")]
    Disconnected,

    #[error("the server rejected the stream settings")]
    Unsupported,

    #[error("not enough disk space")]
    NoSpace,

    #[error("the encoder failed")]
    EncodeError,

    #[error("unknown output error {0}")]
    Unknown(i32),
}

impl OutputError {
    /// Map a native stop code. `0` is a clean stop.
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            0 => return None,
            -1 => Self::BadPath,
            -2 => Self::ConnectFailed,
            -3 => Self::InvalidStream,
            -4 => Self::Generic,
            -5 => Self::Disconnected,
            -6 => Self::Unsupported,
            -7 => Self::NoSpace,
            -8 => Self::EncodeError,
            other => Self::Unknown(other),
        };
        Some(err)
    }

    /// Native stop code this error maps from.
    pub fn code(self) -> i32 {
        match self {
            Self::BadPath => -1,
            Self::ConnectFailed => -2,
            Self::InvalidStream => -3,
            Self::Generic => -4,
            Self::Disconnected => -5,
            Self::Unsupported => -6,
            Self::NoSpace => -7,
            Self::EncodeError => -8,
            Self::Unknown(code) => code,
        }
    }

    /// Short machine-readable reason.
    pub fn reason(self) -> &'static str {
        match self {
            Self::BadPath => "bad_path",
            Self::ConnectFailed => "connect_failed",
            Self::InvalidStream => "invalid_stream",
            Self::Generic => "generic",
            Self::Disconnected => "disconnected",
            Self::Unsupported => "unsupported",
            Self::NoSpace => "no_space",
            Self::EncodeError => "encode_error",
            Self::Unknown(_) => "unknown",
        }
    }
}

/// The error recorded on an output, as reported in its snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputErrorReport {
    pub reason: String,
    pub code: i32,
    pub message: String,
}

impl OutputErrorReport {
    pub fn new(error: OutputError, detail: Option<&str>) -> Self {
        let message = match detail {
            Some(detail) => format!("{error}: {detail}"),
            None => error.to_string(),
        };
        Self {
            reason: error.reason().to_string(),
            code: error.code(),
            message,
        }
    }
}

impl From<OutputError> for OutputErrorReport {
    fn from(error: OutputError) -> Self {
        Self::new(error, None)
    }
}
