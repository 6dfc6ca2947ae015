//! Stop reasons, platforms, and the raw fault codes they are derived from.

use std::fmt;
use std::str::FromStr;

use super::Address;
use crate::error::MortemError;

/// Operating-system family of the inferior
///
/// Every platform-dependent decision in the crate is a `match` on this enum:
/// the fault classification tables and the step-after-crash policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform
{
    /// macOS / iOS (Mach exceptions)
    Darwin,
    /// Linux (ptrace, POSIX signals)
    Linux,
    /// Windows (structured exceptions, no POSIX signals)
    Windows,
    /// Android (Linux signals plus a default SEGV handler that re-raises)
    Android,
    /// FreeBSD (ptrace, BSD signal numbering)
    FreeBSD,
    /// Anything else; treated like Linux for signals.
    Other,
}

/// What happens when a thread that stopped on a crash is stepped or resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashStepPolicy
{
    /// The pending fault is delivered and the process is expected to die.
    Terminate,
    /// The inferior is left untouched and the session stays stopped on the
    /// same reason. Observed on Darwin: `next`/`continue` after
    /// `EXC_BAD_ACCESS` has no effect. The cause is not understood; keep it.
    RemainStopped,
    /// The pending fault is delivered, but a default handler in the inferior
    /// may re-raise it, so the next event can be another crash stop.
    MayRefault,
}

impl Platform
{
    /// Platform of the running binary.
    pub const fn host() -> Self
    {
        if cfg!(any(target_os = "macos", target_os = "ios")) {
            Platform::Darwin
        } else if cfg!(target_os = "android") {
            Platform::Android
        } else if cfg!(target_os = "linux") {
            Platform::Linux
        } else if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "freebsd") {
            Platform::FreeBSD
        } else {
            Platform::Other
        }
    }

    /// Derive the platform from a target triple such as
    /// `aarch64-unknown-linux-android` or `x86_64-apple-darwin`.
    ///
    /// ```rust
    /// use mortem_core::types::Platform;
    ///
    /// assert_eq!(Platform::from_triple("aarch64-unknown-linux-android"), Platform::Android);
    /// assert_eq!(Platform::from_triple("arm64-apple-macosx14.0"), Platform::Darwin);
    /// assert_eq!(Platform::from_triple("x86_64-unknown-linux-gnu"), Platform::Linux);
    /// assert_eq!(Platform::from_triple("riscv64-unknown-none"), Platform::Other);
    /// ```
    pub fn from_triple(triple: &str) -> Self
    {
        let parts: Vec<String> = triple.split('-').map(str::to_ascii_lowercase).collect();
        let has = |prefix: &str| parts.iter().skip(1).any(|part| part.starts_with(prefix));

        if has("android") {
            Platform::Android
        } else if has("darwin") || has("macos") || has("ios") || has("apple") {
            Platform::Darwin
        } else if has("linux") {
            Platform::Linux
        } else if has("windows") || has("win32") {
            Platform::Windows
        } else if has("freebsd") {
            Platform::FreeBSD
        } else {
            Platform::Other
        }
    }

    /// Whether faults on this platform carry POSIX signal numbers.
    ///
    /// Windows reports structured exception codes only, so consumers must be
    /// ready for `StopReason::Signal { number: None, .. }` there.
    pub const fn has_signal_numbers(self) -> bool
    {
        !matches!(self, Platform::Windows)
    }

    /// Step/continue behaviour after a crash-class stop.
    pub const fn crash_step_policy(self) -> CrashStepPolicy
    {
        match self {
            Platform::Darwin => CrashStepPolicy::RemainStopped,
            Platform::Android => CrashStepPolicy::MayRefault,
            Platform::Linux | Platform::Windows | Platform::FreeBSD | Platform::Other => CrashStepPolicy::Terminate,
        }
    }
}

impl fmt::Display for Platform
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            Platform::Darwin => "darwin",
            Platform::Linux => "linux",
            Platform::Windows => "windows",
            Platform::Android => "android",
            Platform::FreeBSD => "freebsd",
            Platform::Other => "other",
        };
        f.write_str(label)
    }
}

impl FromStr for Platform
{
    type Err = MortemError;

    fn from_str(s: &str) -> Result<Self, Self::Err>
    {
        match s.trim().to_ascii_lowercase().as_str() {
            "darwin" | "macos" | "ios" => Ok(Platform::Darwin),
            "linux" => Ok(Platform::Linux),
            "windows" | "win32" => Ok(Platform::Windows),
            "android" => Ok(Platform::Android),
            "freebsd" => Ok(Platform::FreeBSD),
            "other" => Ok(Platform::Other),
            other => Err(MortemError::InvalidArgument(format!("unknown platform: {other}"))),
        }
    }
}

/// Broad category of a hardware/OS fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultKind
{
    /// Invalid memory reference (SIGSEGV family)
    Segv,
    /// Bus error: misaligned or non-existent physical address (SIGBUS)
    Bus,
    /// Illegal or privileged instruction (SIGILL)
    IllegalInstruction,
    /// Any other signal or exception
    Unknown,
}

impl FaultKind
{
    /// Conventional POSIX name for the fault, if there is one.
    pub const fn signal_name(self) -> Option<&'static str>
    {
        match self {
            FaultKind::Segv => Some("SIGSEGV"),
            FaultKind::Bus => Some("SIGBUS"),
            FaultKind::IllegalInstruction => Some("SIGILL"),
            FaultKind::Unknown => None,
        }
    }
}

/// Identifier of the breakpoint location that was hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocationId(pub u64);

impl fmt::Display for LocationId
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.0)
    }
}

/// Normalized reason a thread (and therefore the process) stopped
///
/// Produced from raw OS events by [`crate::classify::classify`] (faults) or
/// directly by the event source (breakpoints, steps, exits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason
{
    /// A breakpoint location was hit.
    Breakpoint(LocationId),
    /// A signal-style fault. `number` is `None` on platforms without POSIX
    /// signals (Windows).
    Signal
    {
        /// Platform-native signal number.
        number: Option<i32>,
        /// Normalized category.
        kind: FaultKind,
    },
    /// Bad memory access reported as an exception rather than a signal
    /// (Darwin `EXC_BAD_ACCESS`, Windows access violation).
    ExceptionBadAccess
    {
        /// Faulting data address, when the platform reports it.
        address: Option<Address>,
    },
    /// A single step completed.
    Step,
    /// The process exited with the given code.
    Exited(i32),
    /// No reason (also the result of a failed classification).
    None,
}

impl StopReason
{
    /// Shorthand for a numbered signal stop.
    pub const fn signal(number: i32, kind: FaultKind) -> Self
    {
        StopReason::Signal {
            number: Some(number),
            kind,
        }
    }

    /// Whether this is a crash-class stop (signal or bad-access exception).
    pub const fn is_crash(&self) -> bool
    {
        matches!(self, StopReason::Signal { .. } | StopReason::ExceptionBadAccess { .. })
    }

    /// The fault category for crash-class stops.
    pub const fn fault_kind(&self) -> Option<FaultKind>
    {
        match self {
            StopReason::Signal { kind, .. } => Some(*kind),
            StopReason::ExceptionBadAccess { .. } => Some(FaultKind::Segv),
            _ => None,
        }
    }
}

impl fmt::Display for StopReason
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            StopReason::Breakpoint(location) => write!(f, "breakpoint {location}"),
            StopReason::Signal { number, kind } => match (kind.signal_name(), number) {
                (Some(name), _) => write!(f, "signal {name}"),
                (None, Some(number)) => write!(f, "signal {number}"),
                (None, None) => f.write_str("exception"),
            },
            StopReason::ExceptionBadAccess { address: Some(address) } => {
                write!(f, "EXC_BAD_ACCESS (address=0x{:x})", address.value())
            }
            StopReason::ExceptionBadAccess { address: None } => f.write_str("EXC_BAD_ACCESS"),
            StopReason::Step => f.write_str("trace"),
            StopReason::Exited(code) => write!(f, "exited with status = {code}"),
            StopReason::None => f.write_str("none"),
        }
    }
}

/// Raw, platform-native description of a fault as delivered by the OS
///
/// This is what a backend hands over before any normalization; the
/// classifier turns it into a [`StopReason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NativeFault
{
    /// POSIX signal (`waitpid` stop status + `siginfo`).
    Signal
    {
        /// Signal number in the inferior platform's numbering.
        number: i32,
        /// `si_addr`, when the kernel provided one.
        address: Option<Address>,
    },
    /// Mach exception message (`exception_raise`).
    MachException
    {
        /// `exception_type_t` (e.g. `EXC_BAD_ACCESS` = 1).
        exception: i32,
        /// `code[0]` and `code[1]`; for bad access, `code[1]` is the address.
        codes: [u64; 2],
    },
    /// Windows `EXCEPTION_DEBUG_EVENT`.
    Win32Exception
    {
        /// `ExceptionCode` (e.g. `0xC0000005`).
        code: u32,
        /// Faulting data address from `ExceptionInformation[1]`.
        address: Option<Address>,
    },
}

impl fmt::Display for NativeFault
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            NativeFault::Signal { number, .. } => write!(f, "signal {number}"),
            NativeFault::MachException { exception, codes } => {
                write!(f, "mach exception {exception} (code=0x{:x}, subcode=0x{:x})", codes[0], codes[1])
            }
            NativeFault::Win32Exception { code, .. } => write!(f, "exception 0x{code:08x}"),
        }
    }
}
