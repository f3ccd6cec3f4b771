//! Opaque handles to native host objects.
//!
//! Handles are plain ids. Owning one does not keep the native object alive;
//! lifetime is managed explicitly through the `release_*` calls on
//! [`HostEngine`](crate::host::HostEngine).

use serde::{Deserialize, Serialize};

macro_rules! native_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl $name {
            /// Raw id as assigned by the host.
            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

native_handle!(
    /// A renderable scene graph.
    SceneHandle
);
native_handle!(
    /// A render node blending between two scenes.
    TransitionHandle
);
native_handle!(
    /// An off-screen mixer rendering one transition at fixed dimensions.
    ViewHandle
);
native_handle!(
    /// A video or audio codec instance.
    EncoderHandle
);
native_handle!(
    /// An independent audio mix.
    AudioMixHandle
);
native_handle!(
    /// A streaming, recording or replay-buffer sink.
    OutputHandle
);

/// Where a composition's video frames come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "view", rename_all = "snake_case")]
pub enum VideoSource {
    /// The host application's main video mix.
    Host,
    /// A mixer view owned by a custom composition.
    View(ViewHandle),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_display_and_serde() {
        let scene = SceneHandle(7);
        assert_eq!(scene.to_string(), "SceneHandle#7");
        assert_eq!(serde_json::to_string(&scene).unwrap(), "7");

        let source = VideoSource::View(ViewHandle(3));
        let json = serde_json::to_string(&source).unwrap();
        assert_eq!(json, r#"{"type":"view","view":3}"#);
    }
}
