//! # Thread Snapshots
//!
//! Per-thread state captured when the inferior stops: registers, the stop
//! reason, and a lazily unwound call stack.
//!
//! ## Staleness
//!
//! A snapshot is only meaningful while the process stays at the stop it was
//! taken in. Every snapshot holds a clone of the session's [`StopEpoch`] and
//! the epoch value at capture time. The session advances the epoch whenever
//! it leaves `Stopped` (resume, step, exit, detach), after which every
//! accessor returns [`MortemError::StaleSnapshot`]. That includes an
//! [`Unwind`] that is halfway through a walk.
//!
//! ## Unwinding
//!
//! Frames are recovered by walking the frame-pointer chain. On both x86-64
//! and AArch64 a frame record is two words at the frame pointer:
//!
//! ```text
//! [fp + 0]   caller's frame pointer
//! [fp + 8]   return address
//! ```
//!
//! The walk ends at the outermost frame: a null or non-increasing frame
//! pointer, unreadable memory, a null return address, or the configured
//! depth cap.

use std::fmt;
use std::iter::FusedIterator;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{MortemError, MortemResult};
use crate::target::{Inferior, Symbolizer};
use crate::types::{Address, Architecture, Frame, RegisterName, RegisterSet, StopReason, ThreadId};

/// Generation counter shared by a session and all of its snapshots.
#[derive(Debug, Clone, Default)]
pub struct StopEpoch(Arc<AtomicU64>);

impl StopEpoch
{
    /// Fresh counter at generation 0.
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Current generation.
    pub fn current(&self) -> u64
    {
        self.0.load(Ordering::Acquire)
    }

    /// Invalidate every snapshot taken so far. Returns the new generation.
    pub(crate) fn advance(&self) -> u64
    {
        self.0.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Registers and call stack of one thread at one stop
///
/// Shared as `Arc<ThreadSnapshot>`; safe to query from several threads at
/// once since nothing in it changes until the session moves on.
pub struct ThreadSnapshot
{
    thread: ThreadId,
    epoch: StopEpoch,
    taken_at: u64,
    registers: Result<RegisterSet, String>,
    stop_reason: Option<StopReason>,
    inferior: Arc<dyn Inferior>,
    symbolizer: Arc<dyn Symbolizer>,
    max_frames: usize,
    backtrace: OnceCell<Vec<Frame>>,
}

impl fmt::Debug for ThreadSnapshot
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ThreadSnapshot")
            .field("thread", &self.thread)
            .field("taken_at", &self.taken_at)
            .field("stop_reason", &self.stop_reason)
            .field("registers", &self.registers)
            .finish_non_exhaustive()
    }
}

impl ThreadSnapshot
{
    /// Capture the state of `thread`.
    ///
    /// Never fails. If the backend cannot read the registers, the failure is
    /// kept and reported by the register accessors as `RegisterUnavailable`.
    pub fn capture(
        inferior: Arc<dyn Inferior>,
        symbolizer: Arc<dyn Symbolizer>,
        thread: ThreadId,
        stop_reason: Option<StopReason>,
        epoch: &StopEpoch,
        config: &SessionConfig,
    ) -> Self
    {
        let registers = inferior.read_registers(thread).map_err(|err| {
            warn!(%thread, error = %err, "register capture failed");
            err.to_string()
        });

        Self {
            thread,
            epoch: epoch.clone(),
            taken_at: epoch.current(),
            registers,
            stop_reason,
            inferior,
            symbolizer,
            max_frames: config.max_frames,
            backtrace: OnceCell::new(),
        }
    }

    /// Thread this snapshot belongs to.
    pub fn thread_id(&self) -> ThreadId
    {
        self.thread
    }

    /// Why this thread stopped, if it is the one that caused the stop.
    pub fn stop_reason(&self) -> Option<StopReason>
    {
        self.stop_reason
    }

    /// Stop generation the snapshot was taken in.
    pub fn taken_at(&self) -> u64
    {
        self.taken_at
    }

    /// Whether the session has moved past this snapshot's stop.
    pub fn is_stale(&self) -> bool
    {
        self.epoch.current() != self.taken_at
    }

    /// Architecture of the inferior.
    pub fn architecture(&self) -> Architecture
    {
        self.inferior.architecture()
    }

    pub(crate) fn ensure_fresh(&self) -> MortemResult<()>
    {
        let current = self.epoch.current();
        if current == self.taken_at {
            Ok(())
        } else {
            Err(MortemError::StaleSnapshot {
                thread: self.thread,
                taken: self.taken_at,
                current,
            })
        }
    }

    fn register_set(&self, wanted: &RegisterName) -> MortemResult<&RegisterSet>
    {
        self.ensure_fresh()?;
        self.registers.as_ref().map_err(|details| MortemError::RegisterUnavailable {
            register: wanted.clone(),
            thread: self.thread,
            details: details.clone(),
        })
    }

    /// All captured registers.
    ///
    /// ## Errors
    ///
    /// `StaleSnapshot`, or `RegisterUnavailable` if capture failed.
    pub fn registers(&self) -> MortemResult<&RegisterSet>
    {
        self.register_set(&RegisterName::new("*"))
    }

    /// Read one register by name or alias (`pc`, `sp`, `fp`, `lr`); a
    /// leading `$` is accepted.
    ///
    /// ## Errors
    ///
    /// - `StaleSnapshot`: the session left this stop
    /// - `RegisterUnavailable`: capture failed or the register does not exist
    pub fn read_register(&self, name: &str) -> MortemResult<u64>
    {
        let name = RegisterName::new(name);
        let registers = self.register_set(&name)?;
        registers.get(&name).ok_or_else(|| MortemError::RegisterUnavailable {
            register: name.clone(),
            thread: self.thread,
            details: format!("no such register on {}", registers.architecture()),
        })
    }

    /// The architecture's first general-purpose register (`rax`, `x0`) and
    /// its value.
    ///
    /// ## Errors
    ///
    /// Same as [`ThreadSnapshot::read_register`].
    pub fn first_general_register(&self) -> MortemResult<(RegisterName, u64)>
    {
        let wanted = RegisterName::new("gpr0");
        let registers = self.register_set(&wanted)?;
        registers.first_general().ok_or_else(|| MortemError::RegisterUnavailable {
            register: wanted,
            thread: self.thread,
            details: "no general-purpose registers captured".to_string(),
        })
    }

    /// Program counter of the thread.
    pub fn pc(&self) -> MortemResult<Address>
    {
        self.read_register("pc").map(Address::from)
    }

    /// Read inferior memory, failing if the snapshot is stale.
    pub fn read_memory(&self, address: Address, len: usize) -> MortemResult<Vec<u8>>
    {
        self.ensure_fresh()?;
        self.inferior.read_memory(address, len)
    }

    /// Read one pointer-sized word, failing if the snapshot is stale.
    pub fn read_pointer(&self, address: Address) -> MortemResult<u64>
    {
        self.ensure_fresh()?;
        self.inferior.read_pointer(address)
    }

    pub(crate) fn symbolizer(&self) -> &dyn Symbolizer
    {
        self.symbolizer.as_ref()
    }

    /// Start a lazy walk of the call stack, innermost frame first.
    ///
    /// ## Errors
    ///
    /// `StaleSnapshot`, or `RegisterUnavailable` if the program counter was
    /// not captured.
    pub fn unwind(&self) -> MortemResult<Unwind<'_>>
    {
        let pc = self.pc()?;
        let registers = self.register_set(&RegisterName::new("pc"))?;
        Ok(Unwind {
            snapshot: self,
            initial: Cursor {
                pc,
                sp: registers.sp(),
                fp: registers.fp(),
            },
            previous: None,
            index: 0,
            done: false,
        })
    }

    /// The whole call stack, unwound once and cached.
    ///
    /// ## Errors
    ///
    /// Same as [`ThreadSnapshot::unwind`], plus `StaleSnapshot` if the
    /// session moves on during the walk.
    pub fn backtrace(&self) -> MortemResult<&[Frame]>
    {
        self.ensure_fresh()?;
        let frames = self.backtrace.get_or_try_init(|| self.unwind()?.collect::<MortemResult<Vec<_>>>())?;
        Ok(frames)
    }
}

#[derive(Debug, Clone, Copy)]
struct Cursor
{
    pc: Address,
    sp: Option<Address>,
    fp: Option<Address>,
}

/// Lazy frame-pointer walk over a [`ThreadSnapshot`]
///
/// Yields `Ok(frame)` innermost first. If the snapshot goes stale the
/// iterator yields one `Err(StaleSnapshot)` and then ends.
pub struct Unwind<'a>
{
    snapshot: &'a ThreadSnapshot,
    initial: Cursor,
    previous: Option<Cursor>,
    index: usize,
    done: bool,
}

impl Unwind<'_>
{
    fn caller_of(&self, cursor: Cursor) -> Option<Cursor>
    {
        let fp = cursor.fp.filter(|fp| !fp.is_null())?;
        let word = u64::from(self.snapshot.architecture().pointer_size_bytes());

        let read = |address: Address| match self.snapshot.inferior.read_pointer(address) {
            Ok(value) => Some(Address::from(value)),
            Err(err) => {
                debug!(thread = %self.snapshot.thread, %address, error = %err, "frame record unreadable");
                None
            }
        };

        let saved_fp = read(fp)?;
        let return_address = read(fp.checked_add(word)?)?;
        if return_address.is_null() {
            return None;
        }

        Some(Cursor {
            pc: return_address,
            sp: fp.checked_add(word * 2),
            // A chain that does not grow towards the stack base is corrupt
            // or finished; the caller becomes the last frame.
            fp: (saved_fp > fp).then_some(saved_fp),
        })
    }

    fn frame_at(&self, cursor: Cursor) -> Frame
    {
        // Return addresses point past the call; look up the call itself.
        let lookup = if self.index == 0 {
            cursor.pc
        } else {
            cursor.pc.checked_sub(1).unwrap_or(cursor.pc)
        };
        let symbols = self.snapshot.symbolizer.symbolize(lookup).unwrap_or_default();

        Frame {
            index: self.index,
            pc: cursor.pc,
            sp: cursor.sp,
            fp: cursor.fp,
            function: symbols.function,
            location: symbols.location,
        }
    }
}

impl Iterator for Unwind<'_>
{
    type Item = MortemResult<Frame>;

    fn next(&mut self) -> Option<Self::Item>
    {
        if self.done {
            return None;
        }
        if let Err(err) = self.snapshot.ensure_fresh() {
            self.done = true;
            return Some(Err(err));
        }
        if self.index >= self.snapshot.max_frames {
            debug!(thread = %self.snapshot.thread, max = self.snapshot.max_frames, "unwind depth cap reached");
            self.done = true;
            return None;
        }

        let cursor = match self.previous {
            None => self.initial,
            Some(previous) => {
                if let Some(caller) = self.caller_of(previous) {
                    caller
                } else {
                    self.done = true;
                    return None;
                }
            }
        };

        let frame = self.frame_at(cursor);
        self.previous = Some(cursor);
        self.index += 1;
        Some(Ok(frame))
    }
}

impl FusedIterator for Unwind<'_> {}
