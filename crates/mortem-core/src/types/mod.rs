//! # Types
//!
//! Platform-agnostic types used throughout the crate.
//!
//! These abstract away backend details so the session logic can work with
//! "thread", "register" and "stop reason" without knowing whether the
//! inferior lives on Linux, Darwin, or Windows.

pub mod address;
pub mod frame;
pub mod process;
pub mod registers;
pub mod stop;
pub mod value;

pub use address::Address;
pub use frame::{Frame, SourceLocation, SymbolLanguage, SymbolName, Symbolication};
pub use process::{Architecture, ExitStatus, ProcessId, ProcessInfo, ProcessState, ThreadId};
pub use registers::{RegisterName, RegisterSet};
pub use stop::{CrashStepPolicy, FaultKind, LocationId, NativeFault, Platform, StopReason};
pub use value::{ValueType, VariableInfo, VariableLocation};
