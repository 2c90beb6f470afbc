//! Mediator between a source-level debugger front-end and a remote Z80
//! execution engine speaking DZRP.
//!
//! The [`session::Session`] facade owns the protocol link and presents the
//! higher-level debugging operations: continue / step-over / step-into /
//! step-out, breakpoints, watchpoints, memory and register access, snapshot
//! loading, and state save/restore.

pub mod breakpoints;
pub mod error;
pub mod eval;
pub mod events;
pub mod labels;
pub mod net;
pub mod session;
pub mod settings;
pub mod snapshot;
pub mod step;

pub(crate) mod installer;
pub(crate) mod regs;

pub use error::SessionError;
pub use session::{PauseHandle, Session, StepResult};
pub use settings::Settings;
