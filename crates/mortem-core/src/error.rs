//! # Error Types
//!
//! Error handling for crash inspection.
//!
//! Every failure is recoverable at the session level: after any of these the
//! session still answers metadata queries (`state()`, `process()`). Only
//! [`MortemError::ProcessNotRunning`] is sticky; once the inferior is gone
//! every inspection call reports it until a fresh launch.

use std::time::Duration;

use thiserror::Error;

use crate::types::{NativeFault, Platform, RegisterName, ThreadId};

/// A raw fault code the classifier could not map
///
/// Not fatal: the stop is still recorded, with `StopReason::None`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("cannot classify {fault} on {platform}")]
pub struct ClassificationFailure
{
    /// Platform the fault was reported for.
    pub platform: Platform,
    /// The raw fault.
    pub fault: NativeFault,
}

/// Main error type for inspection operations
///
/// ## Error Categories
///
/// 1. **State errors**: ProcessNotRunning, InvalidState, StaleSnapshot
/// 2. **Inspection errors**: RegisterUnavailable, EvaluationError, ThreadNotFound
/// 3. **Event errors**: Timeout, ClassificationFailure
/// 4. **Collaborator errors**: LaunchFailed, Target, Io
#[derive(Error, Debug)]
pub enum MortemError
{
    /// The operation needs a stopped process, but the process has exited,
    /// was detached, or has not been launched.
    #[error("Process must be launched and stopped for this operation")]
    ProcessNotRunning,

    /// The operation is not legal in the session's current state
    ///
    /// Used for lifecycle misuse that is not about a missing process, e.g.
    /// launching twice or stepping while a wait is still pending.
    #[error("Cannot {operation} while the session is {state}")]
    InvalidState
    {
        /// Operation that was attempted.
        operation: &'static str,
        /// Human-readable session state.
        state: String,
    },

    /// A snapshot was used after the session left the stop it was taken at.
    #[error("Thread snapshot for thread {thread} is stale (taken at stop {taken}, session is at stop {current})")]
    StaleSnapshot
    {
        /// Thread the snapshot belongs to.
        thread: ThreadId,
        /// Stop epoch the snapshot was captured in.
        taken: u64,
        /// Current stop epoch of the session.
        current: u64,
    },

    /// A register could not be read at OS level or does not exist.
    #[error("Register {register} unavailable on thread {thread}: {details}")]
    RegisterUnavailable
    {
        /// Register that was requested.
        register: RegisterName,
        /// Thread it was requested on.
        thread: ThreadId,
        /// Additional error details
        details: String,
    },

    /// Expression evaluation against the frozen state failed
    ///
    /// Bad address, unknown identifier, type mismatch, or a syntax error.
    #[error("Expression evaluation failed: {0}")]
    EvaluationError(String),

    /// No thread with this id exists in the current stop.
    #[error("No thread with id {0}")]
    ThreadNotFound(ThreadId),

    /// The fault classifier could not map a raw code.
    #[error("Classification failed: {0}")]
    ClassificationFailure(#[from] ClassificationFailure),

    /// No stop or exit event arrived within the configured wait bound.
    #[error("Timed out after {0:?} waiting for the inferior to stop")]
    Timeout(Duration),

    /// The launcher could not start the inferior.
    #[error("Failed to launch process: {0}")]
    LaunchFailed(String),

    /// The inferior backend reported a failure (memory, control, threads).
    #[error("Target error: {0}")]
    Target(String),

    /// Invalid argument passed to an operation or configuration value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error (symbol files, log files).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for `Result<T, MortemError>`
///
/// ```rust
/// use mortem_core::error::MortemResult;
/// fn foo() -> MortemResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type MortemResult<T> = std::result::Result<T, MortemError>;
