//! Common module for library exports

pub use crate::classify::{classify, Classification};
pub use crate::config::SessionConfig;
pub use crate::controller::{DetachHandle, SessionController};
pub use crate::error::{MortemError, MortemResult};
pub use crate::eval::Value;
pub use crate::events::{SessionEvent, StopObserver};
pub use crate::session::{InspectionSession, ResumeOutcome, SessionState};
pub use crate::snapshot::{StopEpoch, ThreadSnapshot};
pub use crate::target::{EventSender, Inferior, LaunchRequest, Launcher, StopCause, Symbolizer, TargetEvent, ThreadStop};
pub use crate::types::{
    Address, Architecture, ExitStatus, FaultKind, Frame, NativeFault, Platform, ProcessId, RegisterSet, StopReason,
    ThreadId,
};
