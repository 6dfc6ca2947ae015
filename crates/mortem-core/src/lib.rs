//! # mortem-core
//!
//! Post-mortem crash inspection for a monitored process.
//!
//! When the inferior dies on a signal or exception, this crate freezes what
//! it looked like at that moment and keeps answering questions about it:
//! - Fault classification across platforms (`SIGSEGV`, `EXC_BAD_ACCESS`,
//!   access violations) into one [`StopReason`](types::StopReason)
//! - Per-thread snapshots: registers and a lazily unwound backtrace
//! - Expression evaluation against the frozen registers and memory
//! - Stepping and resuming past a crash, following each platform's quirks
//!
//! ## Layers
//!
//! - [`classify`]: raw fault code + platform -> `StopReason`
//! - [`snapshot`]: `ThreadSnapshot`, `StopEpoch`, frame-pointer unwinding
//! - [`session`]: `InspectionSession`, the state machine and inspection calls
//! - [`controller`]: `SessionController`, launch/step/resume/wait/detach
//!
//! The OS side (ptrace, Mach, the Windows debug API) lives behind the
//! [`target`] traits; this crate contains no platform code and no `unsafe`.

pub mod classify;
pub mod config;
pub mod controller;
pub mod error;
pub mod eval;
pub mod events;
pub mod prelude;
pub mod session;
pub mod snapshot;
pub mod symbols;
pub mod target;
pub mod types;

pub use controller::{DetachHandle, SessionController};
// Re-export commonly used types
pub use error::{MortemError, MortemResult};
pub use session::{InspectionSession, SessionState};
pub use snapshot::ThreadSnapshot;
