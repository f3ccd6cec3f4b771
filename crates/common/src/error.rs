//! Error types shared across mixcast crates.

use std::path::PathBuf;

/// Top-level error type for mixcast operations.
#[derive(Debug, thiserror::Error)]
pub enum MixcastError {
    /// A creation request was malformed. Nothing was allocated.
    #[error("Invalid request: {message}")]
    Validation { message: String },

    /// The host refused to hand out a native resource.
    #[error("Resource acquisition failed: {message}")]
    Resource { message: String },

    /// The engine thread is gone or the call could not be marshaled.
    #[error("Engine error: {message}")]
    Engine { message: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("{kind} {id} is still referenced by {holders} holder(s)")]
    InUse {
        kind: &'static str,
        id: String,
        holders: usize,
    },

    /// Rejected by a guard predicate before any state changed.
    #[error("Operation rejected: {message}")]
    Invariant { message: String },

    #[error("Unsupported operation: {message}")]
    Unsupported { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using MixcastError.
pub type MixcastResult<T> = Result<T, MixcastError>;

impl MixcastError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource {
            message: msg.into(),
        }
    }

    pub fn engine(msg: impl Into<String>) -> Self {
        Self::Engine {
            message: msg.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::Invariant {
            message: msg.into(),
        }
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether the error was raised before any native resource was touched.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_context() {
        let err = MixcastError::InUse {
            kind: "composition",
            id: "abc".to_string(),
            holders: 2,
        };
        assert_eq!(
            err.to_string(),
            "composition abc is still referenced by 2 holder(s)"
        );
        assert!(MixcastError::validation("bad width").is_validation());
        assert!(!MixcastError::resource("no encoder").is_validation());
    }
}
