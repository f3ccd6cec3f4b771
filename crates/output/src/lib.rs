//! mixcast outputs.
//!
//! An output pushes one video composition and one audio composition to a
//! streaming server, a recording file or a replay buffer. Custom outputs own
//! their native output object between [`Output::start`] and
//! [`Output::stop`]. The three host-native outputs only mirror the host
//! application's own outputs and attach to them while they run.

pub mod error;
pub mod output;
pub mod registry;
pub mod settings;

pub use error::*;
pub use output::*;
pub use registry::*;
pub use settings::*;
