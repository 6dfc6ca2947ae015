//! # Target Collaborators
//!
//! The traits a backend implements to put an inferior under inspection, and
//! the events it sends back.
//!
//! The crate never talks to `ptrace`, Mach, or the Windows debug API itself.
//! A backend provides:
//!
//! - a [`Launcher`] that starts the inferior and hands back an [`Inferior`]
//! - an [`Inferior`] handle for registers, memory, and execution control
//! - [`TargetEvent`]s on the [`EventSender`] it was given at launch
//! - optionally a [`Symbolizer`] for function names, line tables and
//!   variables
//!
//! All collaborator calls are blocking and return [`MortemResult`].

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::{MortemError, MortemResult};
use crate::types::{
    Address, Architecture, Frame, LocationId, NativeFault, Platform, ProcessId, RegisterSet, Symbolication,
    ThreadId, VariableInfo,
};

/// Handle to a live inferior process
///
/// Implementations wrap whatever the platform needs (a task port, a pid
/// under `ptrace`, a process handle). Methods take `&self`; backends that
/// need mutation use interior locking. The handle is shared between the
/// session and every snapshot taken from it.
pub trait Inferior: Send + Sync
{
    /// OS process id.
    fn pid(&self) -> ProcessId;

    /// CPU architecture of the inferior.
    fn architecture(&self) -> Architecture;

    /// OS family of the inferior.
    ///
    /// Defaults to the host platform. A configured override on the session
    /// takes precedence.
    fn platform(&self) -> Platform
    {
        Platform::host()
    }

    /// Threads that currently exist in the inferior.
    fn threads(&self) -> MortemResult<Vec<ThreadId>>;

    /// All general-purpose registers of a stopped thread.
    fn read_registers(&self, thread: ThreadId) -> MortemResult<RegisterSet>;

    /// Read `len` bytes at `address`.
    ///
    /// Unmapped or protected memory is an error, not a short read.
    fn read_memory(&self, address: Address, len: usize) -> MortemResult<Vec<u8>>;

    /// Resume all threads, delivering `pending` to the faulting thread if set.
    fn resume(&self, pending: Option<&NativeFault>) -> MortemResult<()>;

    /// Single-step `thread`, delivering `pending` first if set.
    fn step(&self, thread: ThreadId, pending: Option<&NativeFault>) -> MortemResult<()>;

    /// Release the inferior. It keeps running (or dies) on its own.
    fn detach(&self) -> MortemResult<()>;

    /// Read one pointer-sized little-endian word.
    fn read_pointer(&self, address: Address) -> MortemResult<u64>
    {
        let size = usize::from(self.architecture().pointer_size_bytes());
        let bytes = self.read_memory(address, size)?;
        read_le_word(&bytes)
            .ok_or_else(|| MortemError::Target(format!("short read of {size} bytes at {address}")))
    }
}

/// Decode up to eight little-endian bytes into a word.
///
/// Returns `None` for an empty or oversized slice.
pub(crate) fn read_le_word(bytes: &[u8]) -> Option<u64>
{
    if bytes.is_empty() || bytes.len() > 8 {
        return None;
    }
    let mut buffer = [0u8; 8];
    buffer[..bytes.len()].copy_from_slice(bytes);
    Some(u64::from_le_bytes(buffer))
}

/// Starts inferiors on behalf of the controller.
pub trait Launcher: Send
{
    /// Launch the program described by `request`.
    ///
    /// The backend must report every later stop or exit of the new inferior
    /// on `events`.
    ///
    /// ## Errors
    ///
    /// - `LaunchFailed`: the program could not be started
    /// - `Io`: filesystem errors (missing executable, bad working directory)
    fn launch(&mut self, request: &LaunchRequest, events: EventSender) -> MortemResult<Arc<dyn Inferior>>;
}

/// Resolves code addresses and variables using debug information
///
/// Every method is best-effort: missing debug info means `None`, never an
/// error.
pub trait Symbolizer: Send + Sync
{
    /// Function and source position for a code address.
    fn symbolize(&self, pc: Address) -> Option<Symbolication>;

    /// Look up a variable visible in `frame`.
    fn variable(&self, _frame: &Frame, _name: &str) -> Option<VariableInfo>
    {
        None
    }
}

/// Description of a program to launch
///
/// ```rust
/// use mortem_core::target::LaunchRequest;
///
/// let request = LaunchRequest::new("/tmp/a.out").with_empty_env().with_working_dir("/tmp");
/// assert_eq!(request.argc(), 1);
/// assert_eq!(request.args()[0], "/tmp/a.out");
/// assert_eq!(request.env().map(|env| env.len()), Some(0));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest
{
    executable: PathBuf,
    args: Vec<String>,
    env: Option<Vec<(String, String)>>,
    working_dir: Option<PathBuf>,
}

impl LaunchRequest
{
    /// Launch `executable` with itself as `argv[0]` and the inherited
    /// environment.
    pub fn new(executable: impl Into<PathBuf>) -> Self
    {
        let executable = executable.into();
        let argv0 = executable.to_string_lossy().into_owned();
        Self {
            executable,
            args: vec![argv0],
            env: None,
            working_dir: None,
        }
    }

    /// Append one argument after `argv[0]`.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self
    {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable, replacing the inherited environment
    /// with an explicit one on first use.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self
    {
        self.env.get_or_insert_with(Vec::new).push((key.into(), value.into()));
        self
    }

    /// Launch with an explicit, empty environment.
    #[must_use]
    pub fn with_empty_env(mut self) -> Self
    {
        self.env = Some(Vec::new());
        self
    }

    /// Run the program from `dir`.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self
    {
        self.working_dir = Some(dir.into());
        self
    }

    /// Path of the program.
    pub fn executable(&self) -> &Path
    {
        &self.executable
    }

    /// Full argument vector, `argv[0]` included.
    pub fn args(&self) -> &[String]
    {
        &self.args
    }

    /// Number of arguments the program will see as `argc`.
    pub fn argc(&self) -> usize
    {
        self.args.len()
    }

    /// Explicit environment, or `None` to inherit the debugger's.
    pub fn env(&self) -> Option<&[(String, String)]>
    {
        self.env.as_deref()
    }

    /// Working directory, or `None` for the debugger's own.
    pub fn working_dir(&self) -> Option<&Path>
    {
        self.working_dir.as_deref()
    }
}

/// Why one thread stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause
{
    /// A breakpoint location was hit.
    Breakpoint(LocationId),
    /// A single step finished.
    Step,
    /// The thread faulted; the raw code is classified by the session.
    Fault(NativeFault),
}

/// One thread's part of a stop event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadStop
{
    /// Thread that stopped.
    pub thread: ThreadId,
    /// Why it stopped.
    pub cause: StopCause,
}

/// Event reported by a backend about its inferior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetEvent
{
    /// The process stopped. Several threads can report in one event (for
    /// example two threads faulting concurrently).
    Stopped
    {
        /// Per-thread causes, in the order the backend saw them.
        stops: SmallVec<[ThreadStop; 1]>,
    },
    /// The process exited normally.
    Exited
    {
        /// Exit status code.
        code: i32,
    },
    /// The process was terminated by a signal it did not handle.
    Signaled
    {
        /// Terminating signal number.
        signal: i32,
    },
}

impl TargetEvent
{
    /// Stop event for a single thread.
    pub fn stopped(thread: ThreadId, cause: StopCause) -> Self
    {
        let mut stops = SmallVec::new();
        stops.push(ThreadStop { thread, cause });
        TargetEvent::Stopped { stops }
    }

    /// Stop event for a single faulting thread.
    pub fn fault(thread: ThreadId, fault: NativeFault) -> Self
    {
        Self::stopped(thread, StopCause::Fault(fault))
    }
}

/// Message on the controller's channel.
///
/// Backend messages are tagged with the launch generation they belong to so
/// that a backend outliving its session cannot disturb the next one.
#[derive(Debug)]
pub(crate) enum ChannelMessage
{
    Target
    {
        generation: u64,
        event: TargetEvent,
    },
    /// Every [`EventSender`] clone for `generation` was dropped.
    Closed
    {
        generation: u64,
    },
    /// A [`crate::controller::DetachHandle`] asked the controller to look
    /// at its detach flag.
    Wake,
}

#[derive(Debug)]
struct CloseGuard
{
    generation: u64,
    inner: mpsc::Sender<ChannelMessage>,
}

impl Drop for CloseGuard
{
    fn drop(&mut self)
    {
        // The controller may already be gone.
        let _ = self.inner.send(ChannelMessage::Closed {
            generation: self.generation,
        });
    }
}

/// Sending half of the event channel, handed to the [`Launcher`]
///
/// Clone it freely. When the last clone is dropped without an exit having
/// been reported, the controller treats the inferior as lost.
#[derive(Debug, Clone)]
pub struct EventSender
{
    generation: u64,
    inner: mpsc::Sender<ChannelMessage>,
    _guard: Arc<CloseGuard>,
}

impl EventSender
{
    pub(crate) fn new(inner: mpsc::Sender<ChannelMessage>, generation: u64) -> Self
    {
        let guard = Arc::new(CloseGuard {
            generation,
            inner: inner.clone(),
        });
        Self {
            generation,
            inner,
            _guard: guard,
        }
    }

    /// Report an event.
    ///
    /// ## Errors
    ///
    /// `Target` if the controller has gone away.
    pub fn send(&self, event: TargetEvent) -> MortemResult<()>
    {
        self.inner
            .send(ChannelMessage::Target {
                generation: self.generation,
                event,
            })
            .map_err(|_| MortemError::Target("event receiver dropped".to_string()))
    }
}
