//! mixcast common utilities
//!
//! Shared infrastructure for all mixcast crates:
//! - Error types and result aliases
//! - Uptime clock for output sessions
//! - Tracing/logging initialization
//! - Engine configuration loading

pub mod clock;
pub mod config;
pub mod error;
pub mod logging;

pub use clock::*;
pub use config::*;
pub use error::*;
