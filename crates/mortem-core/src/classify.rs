//! # Fault Classification
//!
//! Maps raw OS fault reports to a normalized [`StopReason`].
//!
//! The same hardware event looks different depending on where it happens:
//!
//! - **Darwin**: a bad memory access arrives as the Mach exception
//!   `EXC_BAD_ACCESS`, not as SIGSEGV. Signals that do get through for the
//!   same fault are folded into `ExceptionBadAccess` as well, so callers
//!   never see two spellings of one crash.
//! - **Linux / Android / FreeBSD / other**: POSIX signals. SIGSEGV is 11
//!   everywhere, SIGBUS is 7 on Linux and 10 on the BSDs.
//! - **Windows**: structured exceptions, no signal numbers. An access
//!   violation becomes `ExceptionBadAccess` described as "invalid address".
//!
//! Classification never fails loudly: an unmapped code yields
//! `StopReason::None` plus a [`ClassificationFailure`] describing it.

use tracing::warn;

use crate::error::ClassificationFailure;
use crate::types::{Address, FaultKind, NativeFault, Platform, StopReason};

/// Mach `EXC_BAD_ACCESS`
pub const EXC_BAD_ACCESS: i32 = 1;
/// Mach `EXC_BAD_INSTRUCTION`
pub const EXC_BAD_INSTRUCTION: i32 = 2;
/// Mach `EXC_ARITHMETIC`
pub const EXC_ARITHMETIC: i32 = 3;
/// Mach `EXC_SOFTWARE`
pub const EXC_SOFTWARE: i32 = 5;
/// `EXC_SOFTWARE` code carrying a Unix signal in `code[1]`
pub const EXC_SOFT_SIGNAL: u64 = 0x10003;

/// Windows `EXCEPTION_ACCESS_VIOLATION`
pub const EXCEPTION_ACCESS_VIOLATION: u32 = 0xC000_0005;
/// Windows `EXCEPTION_IN_PAGE_ERROR`
pub const EXCEPTION_IN_PAGE_ERROR: u32 = 0xC000_0006;
/// Windows `EXCEPTION_ILLEGAL_INSTRUCTION`
pub const EXCEPTION_ILLEGAL_INSTRUCTION: u32 = 0xC000_001D;
/// Windows `EXCEPTION_PRIV_INSTRUCTION`
pub const EXCEPTION_PRIV_INSTRUCTION: u32 = 0xC000_0096;
/// Windows `EXCEPTION_DATATYPE_MISALIGNMENT`
pub const EXCEPTION_DATATYPE_MISALIGNMENT: u32 = 0x8000_0002;
/// Windows `EXCEPTION_STACK_OVERFLOW`
pub const EXCEPTION_STACK_OVERFLOW: u32 = 0xC000_00FD;

const SIGILL: i32 = 4;
const SIGFPE: i32 = 8;
const SIGSEGV: i32 = 11;
const SIGBUS_LINUX: i32 = 7;
const SIGBUS_BSD: i32 = 10;

/// Result of classifying one raw fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification
{
    /// Normalized stop reason (`StopReason::None` on failure).
    pub reason: StopReason,
    /// Platform-flavoured description, e.g. `"signal SIGSEGV"`,
    /// `"EXC_BAD_ACCESS (code=1, address=0x0)"`, `"invalid address"`.
    pub description: String,
    /// Set when the code could not be mapped.
    pub failure: Option<ClassificationFailure>,
}

impl Classification
{
    pub(crate) fn mapped(reason: StopReason, description: impl Into<String>) -> Self
    {
        Self {
            reason,
            description: description.into(),
            failure: None,
        }
    }

    fn failed(platform: Platform, fault: NativeFault) -> Self
    {
        let failure = ClassificationFailure { platform, fault };
        warn!(%platform, %fault, "unclassified fault");
        Self {
            reason: StopReason::None,
            description: failure.to_string(),
            failure: Some(failure),
        }
    }

    /// Whether the code was recognized.
    pub fn is_classified(&self) -> bool
    {
        self.failure.is_none()
    }
}

/// Classify a raw fault reported on `platform`.
///
/// Deterministic and total: the same inputs always give the same result and
/// no input panics.
///
/// ```rust
/// use mortem_core::classify::classify;
/// use mortem_core::types::{FaultKind, NativeFault, Platform, StopReason};
///
/// let segv = NativeFault::Signal { number: 11, address: None };
/// assert_eq!(classify(Platform::Linux, &segv).reason, StopReason::signal(11, FaultKind::Segv));
/// assert!(matches!(
///     classify(Platform::Darwin, &segv).reason,
///     StopReason::ExceptionBadAccess { .. }
/// ));
/// ```
pub fn classify(platform: Platform, fault: &NativeFault) -> Classification
{
    match (platform, *fault) {
        (Platform::Darwin, NativeFault::MachException { exception, codes }) => classify_mach(exception, codes)
            .unwrap_or_else(|| Classification::failed(platform, *fault)),
        (Platform::Darwin, NativeFault::Signal { number, address }) => classify_darwin_signal(number, address)
            .unwrap_or_else(|| Classification::failed(platform, *fault)),
        (Platform::Windows, NativeFault::Win32Exception { code, address }) => {
            classify_win32(code, address).unwrap_or_else(|| Classification::failed(platform, *fault))
        }
        (
            Platform::Linux | Platform::Android | Platform::FreeBSD | Platform::Other,
            NativeFault::Signal { number, .. },
        ) => classify_posix_signal(platform, number).unwrap_or_else(|| Classification::failed(platform, *fault)),
        // Mach exceptions off Darwin, signals on Windows, SEH codes off Windows.
        _ => Classification::failed(platform, *fault),
    }
}

fn sigbus_for(platform: Platform) -> i32
{
    match platform {
        Platform::Linux | Platform::Android | Platform::Other | Platform::Windows => SIGBUS_LINUX,
        Platform::Darwin | Platform::FreeBSD => SIGBUS_BSD,
    }
}

fn max_signal_for(platform: Platform) -> i32
{
    match platform {
        // Real-time signals extend the range on Linux.
        Platform::Linux | Platform::Android | Platform::Other => 64,
        Platform::Darwin | Platform::FreeBSD | Platform::Windows => 32,
    }
}

fn posix_fault_kind(platform: Platform, number: i32) -> FaultKind
{
    match number {
        SIGSEGV => FaultKind::Segv,
        SIGILL => FaultKind::IllegalInstruction,
        n if n == sigbus_for(platform) => FaultKind::Bus,
        _ => FaultKind::Unknown,
    }
}

fn classify_posix_signal(platform: Platform, number: i32) -> Option<Classification>
{
    if !(1..=max_signal_for(platform)).contains(&number) {
        return None;
    }

    let kind = posix_fault_kind(platform, number);
    let reason = StopReason::signal(number, kind);
    Some(Classification::mapped(reason, reason.to_string()))
}

fn classify_darwin_signal(number: i32, address: Option<Address>) -> Option<Classification>
{
    match posix_fault_kind(Platform::Darwin, number) {
        FaultKind::Segv | FaultKind::Bus => Some(bad_access(1, address)),
        _ => classify_posix_signal(Platform::Darwin, number),
    }
}

fn bad_access(code: u64, address: Option<Address>) -> Classification
{
    let description = match address {
        Some(address) => format!("EXC_BAD_ACCESS (code={code}, address=0x{:x})", address.value()),
        None => format!("EXC_BAD_ACCESS (code={code})"),
    };
    Classification::mapped(StopReason::ExceptionBadAccess { address }, description)
}

fn classify_mach(exception: i32, codes: [u64; 2]) -> Option<Classification>
{
    match exception {
        EXC_BAD_ACCESS => Some(bad_access(codes[0], Some(Address::from(codes[1])))),
        EXC_BAD_INSTRUCTION => Some(Classification::mapped(
            StopReason::signal(SIGILL, FaultKind::IllegalInstruction),
            format!("EXC_BAD_INSTRUCTION (code={})", codes[0]),
        )),
        EXC_ARITHMETIC => Some(Classification::mapped(
            StopReason::signal(SIGFPE, FaultKind::Unknown),
            format!("EXC_ARITHMETIC (code={})", codes[0]),
        )),
        EXC_SOFTWARE if codes[0] == EXC_SOFT_SIGNAL => {
            let number = i32::try_from(codes[1]).ok()?;
            classify_darwin_signal(number, None)
        }
        _ => None,
    }
}

fn classify_win32(code: u32, address: Option<Address>) -> Option<Classification>
{
    let signal_less = |kind: FaultKind, description: &str| {
        Classification::mapped(StopReason::Signal { number: None, kind }, description)
    };

    match code {
        EXCEPTION_ACCESS_VIOLATION | EXCEPTION_IN_PAGE_ERROR => Some(Classification::mapped(
            StopReason::ExceptionBadAccess { address },
            "invalid address",
        )),
        EXCEPTION_ILLEGAL_INSTRUCTION | EXCEPTION_PRIV_INSTRUCTION => {
            Some(signal_less(FaultKind::IllegalInstruction, "illegal instruction"))
        }
        EXCEPTION_DATATYPE_MISALIGNMENT => Some(signal_less(FaultKind::Bus, "datatype misalignment")),
        EXCEPTION_STACK_OVERFLOW => Some(signal_less(FaultKind::Segv, "stack overflow")),
        _ => None,
    }
}
