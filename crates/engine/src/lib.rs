//! mixcast engine.
//!
//! [`EngineContext`] owns the engine thread, the composition registries and
//! the output registry, and exposes the request surface. [`Request`] is the
//! same surface as JSON.

pub mod context;
pub mod request;

pub use context::EngineContext;
pub use request::Request;
