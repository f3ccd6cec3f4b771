//! mixcast compositions.
//!
//! A composition is one rendering pipeline: a set of scenes, a current
//! scene, and a transition node that blends between them. The host's own
//! pipeline is the native composition; custom compositions own an
//! independent pipeline with fixed dimensions and their own encoders.
//!
//! Consumers such as outputs hold a composition through a [`Lease`]. A
//! composition cannot be removed from its [`CompositionRegistry`] while any
//! lease is alive.

pub mod audio;
pub mod context;
pub mod custom;
pub mod lease;
pub mod registry;
pub mod scene;
pub mod transition;
pub mod video;

pub use audio::*;
pub use context::*;
pub use custom::{CompositionSpec, CustomVideo, ValidatedSpec};
pub use lease::*;
pub use registry::*;
pub use scene::*;
pub use transition::*;
pub use video::*;
