//! Process, thread, and architecture types.

use std::fmt;

/// Process identifier (PID)
///
/// Newtype so a PID can't be passed where a thread id or exit code is
/// expected.
///
/// ```rust
/// use mortem_core::types::ProcessId;
///
/// let pid = ProcessId::from(4242);
/// assert_eq!(u32::from(pid), 4242);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProcessId(pub u32);

impl From<u32> for ProcessId
{
    fn from(pid: u32) -> Self
    {
        ProcessId(pid)
    }
}

impl From<ProcessId> for u32
{
    fn from(pid: ProcessId) -> Self
    {
        pid.0
    }
}

impl fmt::Display for ProcessId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier
///
/// The exact representation is whatever the backend uses (a TID on Linux, a
/// Mach thread port on macOS, a thread id on Windows); it is stored as `u64`
/// so the session logic stays platform-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

impl ThreadId
{
    /// Raw `u64` representation of the thread identifier.
    ///
    /// ```rust
    /// use mortem_core::types::ThreadId;
    ///
    /// let thread = ThreadId::from(12345);
    /// assert_eq!(thread.raw(), 12345);
    /// ```
    pub fn raw(&self) -> u64
    {
        self.0
    }
}

impl From<u64> for ThreadId
{
    fn from(value: u64) -> Self
    {
        Self(value)
    }
}

impl fmt::Display for ThreadId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Coarse lifecycle state of the inferior as seen by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState
{
    /// Executing (or about to execute) inferior code.
    Running,
    /// Halted at a stop event; snapshots are valid.
    Stopped,
    /// Gone: exited, killed, detached, or lost.
    Exited,
}

impl fmt::Display for ProcessState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            ProcessState::Running => "running",
            ProcessState::Stopped => "stopped",
            ProcessState::Exited => "exited",
        };
        f.write_str(label)
    }
}

/// How the inferior's life ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus
{
    /// Normal exit with the given status code.
    Code(i32),
    /// Terminated by an uncaught signal (POSIX platforms).
    Signaled(i32),
    /// The debugger detached; the real process state is unknown.
    Detached,
    /// The event source went away without reporting an exit.
    Lost,
}

impl ExitStatus
{
    /// Exit code, when the process reported one.
    pub const fn code(self) -> Option<i32>
    {
        match self {
            ExitStatus::Code(code) => Some(code),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            ExitStatus::Code(code) => write!(f, "exited with status = {code}"),
            ExitStatus::Signaled(signal) => write!(f, "terminated by signal {signal}"),
            ExitStatus::Detached => f.write_str("detached"),
            ExitStatus::Lost => f.write_str("lost"),
        }
    }
}

/// Process metadata owned by the inspection session.
///
/// This stays readable after the process exits; everything else about the
/// inferior (threads, registers, memory) does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessInfo
{
    /// OS process id.
    pub pid: ProcessId,
    /// Current lifecycle state.
    pub state: ProcessState,
    /// Set once the process is gone.
    pub exit: Option<ExitStatus>,
}

impl ProcessInfo
{
    pub(crate) fn running(pid: ProcessId) -> Self
    {
        Self {
            pid,
            state: ProcessState::Running,
            exit: None,
        }
    }

    /// Exit code, if the process exited normally.
    pub fn exit_code(&self) -> Option<i32>
    {
        self.exit.and_then(ExitStatus::code)
    }
}

/// CPU architecture of the inferior
///
/// Determines register aliases (`pc`, `sp`, `fp`), the first
/// general-purpose register, and the frame record layout used by the
/// unwinder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 64-bit ARM (AArch64)
    Arm64,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// Any other architecture; register aliases are unavailable.
    Unknown(&'static str),
}

impl Architecture
{
    /// Architecture of the running binary, used as a default.
    pub const fn current() -> Self
    {
        #[cfg(target_arch = "aarch64")]
        {
            Architecture::Arm64
        }

        #[cfg(target_arch = "x86_64")]
        {
            Architecture::X86_64
        }

        #[cfg(not(any(target_arch = "aarch64", target_arch = "x86_64")))]
        {
            Architecture::Unknown(std::env::consts::ARCH)
        }
    }

    /// Size of a pointer in bytes for this architecture.
    #[must_use]
    pub const fn pointer_size_bytes(self) -> u8
    {
        match self {
            Architecture::Arm64 | Architecture::X86_64 | Architecture::Unknown(_) => 8,
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::X86_64 => write!(f, "x86_64"),
            Architecture::Unknown(name) => write!(f, "{name}"),
        }
    }
}
