//! mixcast host contracts.
//!
//! This crate holds everything that touches the host rendering engine
//! without knowing about compositions or outputs:
//!
//! - **Handles:** opaque ids for native scenes, transitions, views, encoders,
//!   audio mixes and outputs
//! - **HostEngine:** the collaborator trait (scene/encoder/view/output factories)
//! - **Engine actor:** the dedicated thread that owns the host and runs
//!   marshaled calls
//! - **Signals:** hook registrations that can be torn down safely while a
//!   callback is in flight
//! - **Rollback:** scope guard releasing partially built native resources
//! - **Audio slots:** the global audio-output slot table
//! - **Event sinks:** the opaque `publish(event, payload)` capability
//! - **Simulated host:** an in-memory `HostEngine` for tests and the CLI
//!
//! ```text
//!  control path                 engine thread
//!  ────────────                 ─────────────
//!  EngineHandle::invoke ──cmd──▶ Box<dyn HostEngine>
//!        ▲                            │
//!        └────────── oneshot ◀────────┘
//!                                     │ signals
//!                                     ▼
//!                               SignalHook::emit ──▶ callbacks
//! ```

pub mod actor;
pub mod audio;
pub mod events;
pub mod guard;
pub mod handle;
pub mod host;
pub mod signal;
pub mod sim;

pub use actor::*;
pub use audio::*;
pub use events::*;
pub use guard::*;
pub use handle::*;
pub use host::*;
pub use signal::*;
