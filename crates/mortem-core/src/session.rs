//! # Inspection Session
//!
//! Owns one inferior and its frozen state between stops.
//!
//! ## States
//!
//! ```text
//! Launching --begin_run--> Running --apply_event--> Stopped(reason)
//!                             ^                        |
//!                             +--begin_step/resume-----+
//!                                                      |
//!              Exited(status) <--apply_event/detach----+
//! ```
//!
//! While `Stopped`, every thread of the inferior has a [`ThreadSnapshot`].
//! Leaving `Stopped` advances the [`StopEpoch`], which turns all snapshots
//! handed out so far stale. Once `Exited`, only metadata (`state`,
//! `process`, `platform`) is answered; everything else fails with
//! [`MortemError::ProcessNotRunning`].
//!
//! ## Stepping after a crash
//!
//! What happens when a thread that crashed is stepped or resumed depends on
//! the platform (see [`CrashStepPolicy`]):
//!
//! - `Terminate`: the pending fault is delivered and the process dies.
//! - `RemainStopped` (Darwin): the inferior is not touched; the session
//!   stays stopped with the same reason and the same snapshots.
//! - `MayRefault` (Android): the fault is delivered, but the default
//!   handler may re-raise it, producing another identical crash stop.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::classify::{classify, Classification};
use crate::config::SessionConfig;
use crate::eval::{self, Value};
use crate::events::SessionEvent;
use crate::error::{ClassificationFailure, MortemError, MortemResult};
use crate::snapshot::{StopEpoch, ThreadSnapshot};
use crate::target::{Inferior, StopCause, Symbolizer, TargetEvent, ThreadStop};
use crate::types::{
    CrashStepPolicy, ExitStatus, Frame, NativeFault, Platform, ProcessInfo, ProcessState, StopReason, ThreadId,
};

/// Lifecycle state of an [`InspectionSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState
{
    /// Created, no inferior yet.
    Launching,
    /// The inferior is executing.
    Running,
    /// The inferior is halted; snapshots are valid.
    Stopped(StopReason),
    /// The inferior is gone.
    Exited(ExitStatus),
}

impl SessionState
{
    /// Whether the session is stopped.
    pub fn is_stopped(&self) -> bool
    {
        matches!(self, SessionState::Stopped(_))
    }

    /// Whether the inferior is gone.
    pub fn is_exited(&self) -> bool
    {
        matches!(self, SessionState::Exited(_))
    }

    /// Stop reason, when stopped.
    pub fn stop_reason(&self) -> Option<StopReason>
    {
        match self {
            SessionState::Stopped(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            SessionState::Launching => f.write_str("launching"),
            SessionState::Running => f.write_str("running"),
            SessionState::Stopped(reason) => write!(f, "stopped ({reason})"),
            SessionState::Exited(status) => write!(f, "exited ({status})"),
        }
    }
}

/// What a step or resume request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome
{
    /// The inferior is executing; the next event decides the new state.
    Running,
    /// The platform left the crashed inferior untouched.
    RemainedStopped(StopReason),
}

/// State captured at one stop.
struct StopFrame
{
    snapshots: BTreeMap<ThreadId, Arc<ThreadSnapshot>>,
    selected: ThreadId,
    /// Thread the stop was reported for; owns `pending_fault`.
    reporting: ThreadId,
    pending_fault: Option<NativeFault>,
    concurrent_faults: Vec<(ThreadId, StopReason)>,
    description: String,
    /// Set when the reporting thread's fault could not be mapped.
    failure: Option<ClassificationFailure>,
}

/// One inspected process: state machine, snapshots, and inspection calls
///
/// Mutating calls take `&mut self`; inspection calls take `&self` and
/// return owned data or `Arc` snapshots, so a session can be read from
/// several threads while it is stopped.
pub struct InspectionSession
{
    config: SessionConfig,
    symbolizer: Arc<dyn Symbolizer>,
    inferior: Option<Arc<dyn Inferior>>,
    platform: Platform,
    state: SessionState,
    process: Option<ProcessInfo>,
    epoch: StopEpoch,
    stop: Option<StopFrame>,
}

impl fmt::Debug for InspectionSession
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("InspectionSession")
            .field("platform", &self.platform)
            .field("state", &self.state)
            .field("process", &self.process)
            .field("epoch", &self.epoch.current())
            .finish_non_exhaustive()
    }
}

impl InspectionSession
{
    /// New session in the `Launching` state.
    pub fn new(symbolizer: Arc<dyn Symbolizer>, config: SessionConfig) -> Self
    {
        let platform = config.platform.unwrap_or_else(Platform::host);
        Self {
            config,
            symbolizer,
            inferior: None,
            platform,
            state: SessionState::Launching,
            process: None,
            epoch: StopEpoch::new(),
            stop: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState
    {
        self.state
    }

    /// Process metadata; readable in every state once launched.
    pub fn process(&self) -> Option<ProcessInfo>
    {
        self.process
    }

    /// Platform used for classification and the crash-step policy.
    pub fn platform(&self) -> Platform
    {
        self.platform
    }

    /// Current stop generation.
    pub fn epoch(&self) -> u64
    {
        self.epoch.current()
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &SessionConfig
    {
        &self.config
    }

    fn invalid_state(&self, operation: &'static str) -> MortemError
    {
        MortemError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }

    /// Take ownership of a freshly launched inferior. `Launching -> Running`.
    ///
    /// ## Errors
    ///
    /// `InvalidState` unless the session is `Launching`.
    pub fn begin_run(&mut self, inferior: Arc<dyn Inferior>) -> MortemResult<()>
    {
        if self.state != SessionState::Launching {
            return Err(self.invalid_state("launch"));
        }

        self.platform = self.config.platform.unwrap_or_else(|| inferior.platform());
        let pid = inferior.pid();
        self.process = Some(ProcessInfo::running(pid));
        self.inferior = Some(inferior);
        self.state = SessionState::Running;
        debug!(%pid, platform = %self.platform, "session running");
        Ok(())
    }

    /// Apply an event reported by the backend. `Running -> Stopped | Exited`.
    ///
    /// ## Errors
    ///
    /// - `ProcessNotRunning`: the session already exited
    /// - `InvalidState`: the session is not running
    pub fn apply_event(&mut self, event: TargetEvent) -> MortemResult<SessionEvent>
    {
        match self.state {
            SessionState::Running => {}
            SessionState::Exited(_) => return Err(MortemError::ProcessNotRunning),
            SessionState::Launching | SessionState::Stopped(_) => return Err(self.invalid_state("apply an event")),
        }

        match event {
            TargetEvent::Stopped { stops } => self.enter_stop(&stops),
            TargetEvent::Exited { code } => Ok(self.finish(ExitStatus::Code(code))),
            TargetEvent::Signaled { signal } => Ok(self.finish(ExitStatus::Signaled(signal))),
        }
    }

    fn enter_stop(&mut self, stops: &[ThreadStop]) -> MortemResult<SessionEvent>
    {
        let inferior = self.inferior.clone().ok_or(MortemError::ProcessNotRunning)?;

        let mut classified = Vec::with_capacity(stops.len());
        for stop in stops {
            let (classification, fault) = match stop.cause {
                StopCause::Breakpoint(location) => {
                    let reason = StopReason::Breakpoint(location);
                    (Classification::mapped(reason, reason.to_string()), None)
                }
                StopCause::Step => (Classification::mapped(StopReason::Step, StopReason::Step.to_string()), None),
                StopCause::Fault(fault) => (classify(self.platform, &fault), Some(fault)),
            };
            classified.push((stop.thread, classification, fault));
        }

        // The first crash wins; failing that an unclassified fault, then
        // whatever stopped first.
        let selected_index = classified
            .iter()
            .position(|(_, classification, _)| classification.reason.is_crash())
            .or_else(|| classified.iter().position(|(_, _, fault)| fault.is_some()))
            .unwrap_or(0);

        let mut threads = match inferior.threads() {
            Ok(threads) => threads,
            Err(err) => {
                warn!(error = %err, "thread list unavailable, using stopped threads only");
                Vec::new()
            }
        };
        threads.extend(classified.iter().map(|(thread, ..)| *thread));
        threads.sort_unstable();
        threads.dedup();

        let Some(&selected) = classified
            .get(selected_index)
            .map(|(thread, ..)| thread)
            .or_else(|| threads.first())
        else {
            return Err(MortemError::Target("stop event without any thread".to_string()));
        };

        let mut reasons: BTreeMap<ThreadId, StopReason> = BTreeMap::new();
        let mut concurrent_faults = Vec::new();
        let mut selected_reason = StopReason::None;
        let mut description = StopReason::None.to_string();
        let mut pending_fault = None;
        let mut failure = None;

        for (index, (thread, classification, fault)) in classified.into_iter().enumerate() {
            let reason = classification.reason;
            if index == selected_index {
                selected_reason = reason;
                description = classification.description;
                failure = classification.failure;
                pending_fault = fault;
                reasons.insert(thread, reason);
            } else if reason.is_crash() {
                warn!(%thread, %reason, "concurrent fault on unselected thread");
                concurrent_faults.push((thread, reason));
            } else {
                reasons.entry(thread).or_insert(reason);
            }
        }

        let snapshots = threads
            .into_iter()
            .map(|thread| {
                let snapshot = ThreadSnapshot::capture(
                    Arc::clone(&inferior),
                    Arc::clone(&self.symbolizer),
                    thread,
                    reasons.get(&thread).copied(),
                    &self.epoch,
                    &self.config,
                );
                (thread, Arc::new(snapshot))
            })
            .collect();

        debug!(thread = %selected, reason = %selected_reason, %description, epoch = self.epoch.current(), "session stopped");

        self.stop = Some(StopFrame {
            snapshots,
            selected,
            reporting: selected,
            pending_fault,
            concurrent_faults,
            description,
            failure,
        });
        if let Some(process) = self.process.as_mut() {
            process.state = ProcessState::Stopped;
        }
        self.state = SessionState::Stopped(selected_reason);

        Ok(SessionEvent::Stopped {
            reason: selected_reason,
            thread: Some(selected),
        })
    }

    fn finish(&mut self, status: ExitStatus) -> SessionEvent
    {
        self.epoch.advance();
        self.stop = None;
        self.inferior = None;
        if let Some(process) = self.process.as_mut() {
            process.state = ProcessState::Exited;
            process.exit = Some(status);
        }
        self.state = SessionState::Exited(status);
        debug!(%status, "session exited");
        SessionEvent::Exited { status }
    }

    /// Step the selected thread.
    ///
    /// ## Errors
    ///
    /// - `ProcessNotRunning`: not stopped
    /// - `Target`: the backend refused; the session stays stopped
    pub fn begin_step(&mut self) -> MortemResult<ResumeOutcome>
    {
        self.leave_stop("step", |inferior, thread, pending| inferior.step(thread, pending))
    }

    /// Resume the whole process.
    ///
    /// ## Errors
    ///
    /// Same as [`InspectionSession::begin_step`].
    pub fn begin_resume(&mut self) -> MortemResult<ResumeOutcome>
    {
        self.leave_stop("resume", |inferior, _, pending| inferior.resume(pending))
    }

    fn leave_stop<F>(&mut self, operation: &'static str, control: F) -> MortemResult<ResumeOutcome>
    where
        F: FnOnce(&dyn Inferior, ThreadId, Option<&NativeFault>) -> MortemResult<()>,
    {
        let reason = match self.state {
            SessionState::Stopped(reason) => reason,
            SessionState::Running => return Err(self.invalid_state(operation)),
            SessionState::Launching | SessionState::Exited(_) => return Err(MortemError::ProcessNotRunning),
        };
        let (Some(inferior), Some(stop)) = (self.inferior.clone(), self.stop.as_ref()) else {
            return Err(MortemError::ProcessNotRunning);
        };

        let policy = self.platform.crash_step_policy();
        if reason.is_crash() && policy == CrashStepPolicy::RemainStopped {
            debug!(%reason, platform = %self.platform, operation, "crashed inferior left stopped");
            return Ok(ResumeOutcome::RemainedStopped(reason));
        }

        let pending = stop.pending_fault;
        // A pending fault goes back to the thread that raised it, whichever
        // thread is selected for inspection.
        let thread = if pending.is_some() { stop.reporting } else { stop.selected };
        if let Some(fault) = pending {
            debug!(%thread, %fault, ?policy, operation, "delivering pending fault");
        }

        control(inferior.as_ref(), thread, pending.as_ref())?;

        self.epoch.advance();
        self.stop = None;
        if let Some(process) = self.process.as_mut() {
            process.state = ProcessState::Running;
        }
        self.state = SessionState::Running;
        debug!(operation, epoch = self.epoch.current(), "session running");
        Ok(ResumeOutcome::Running)
    }

    /// Detach from the inferior. Any state with a process -> `Exited(Detached)`.
    ///
    /// A backend failure while detaching is logged; the session is detached
    /// either way.
    ///
    /// ## Errors
    ///
    /// `ProcessNotRunning` if there is no process.
    pub fn detach(&mut self) -> MortemResult<SessionEvent>
    {
        let Some(inferior) = self.inferior.clone() else {
            return Err(MortemError::ProcessNotRunning);
        };
        if let Err(err) = inferior.detach() {
            warn!(error = %err, "backend detach failed");
        }
        Ok(self.finish(ExitStatus::Detached))
    }

    /// Force the session to `Exited(status)` without touching the inferior
    /// (used when the event source disappears).
    ///
    /// Returns `None` if the session had already exited.
    pub fn force_exit(&mut self, status: ExitStatus) -> Option<SessionEvent>
    {
        if self.state.is_exited() {
            return None;
        }
        warn!(%status, state = %self.state, "forcing session exit");
        Some(self.finish(status))
    }

    fn stopped(&self) -> MortemResult<&StopFrame>
    {
        match (&self.state, &self.stop) {
            (SessionState::Stopped(_), Some(stop)) => Ok(stop),
            _ => Err(MortemError::ProcessNotRunning),
        }
    }

    /// Snapshot of `thread` at the current stop.
    ///
    /// ## Errors
    ///
    /// `ProcessNotRunning` unless stopped, `ThreadNotFound` for unknown ids.
    pub fn snapshot(&self, thread: ThreadId) -> MortemResult<Arc<ThreadSnapshot>>
    {
        self.stopped()?
            .snapshots
            .get(&thread)
            .cloned()
            .ok_or(MortemError::ThreadNotFound(thread))
    }

    fn resolve(&self, thread: Option<ThreadId>) -> MortemResult<Arc<ThreadSnapshot>>
    {
        let thread = match thread {
            Some(thread) => thread,
            None => self.stopped()?.selected,
        };
        self.snapshot(thread)
    }

    /// All threads at the current stop, in id order.
    pub fn threads(&self) -> MortemResult<Vec<ThreadId>>
    {
        Ok(self.stopped()?.snapshots.keys().copied().collect())
    }

    /// The thread inspection calls default to.
    pub fn selected_thread(&self) -> MortemResult<ThreadId>
    {
        Ok(self.stopped()?.selected)
    }

    /// Make `thread` the default for inspection calls.
    ///
    /// The pending fault stays with the thread that faulted.
    pub fn select_thread(&mut self, thread: ThreadId) -> MortemResult<()>
    {
        self.stopped()?;
        let Some(stop) = self.stop.as_mut() else {
            return Err(MortemError::ProcessNotRunning);
        };
        if !stop.snapshots.contains_key(&thread) {
            return Err(MortemError::ThreadNotFound(thread));
        }
        stop.selected = thread;
        Ok(())
    }

    /// Threads that faulted in this stop: the one carrying the crash reason
    /// first, then concurrent faults.
    pub fn crashed_threads(&self) -> MortemResult<Vec<ThreadId>>
    {
        let stop = self.stopped()?;
        let carrier = stop
            .snapshots
            .values()
            .find(|snapshot| snapshot.stop_reason().is_some_and(|reason| reason.is_crash()))
            .map(|snapshot| snapshot.thread_id());
        Ok(carrier
            .into_iter()
            .chain(stop.concurrent_faults.iter().map(|(thread, _)| *thread))
            .collect())
    }

    /// Faults on threads other than the selected crash thread.
    pub fn concurrent_faults(&self) -> MortemResult<Vec<(ThreadId, StopReason)>>
    {
        Ok(self.stopped()?.concurrent_faults.clone())
    }

    /// Platform-flavoured description of the stop, e.g.
    /// `"EXC_BAD_ACCESS (code=1, address=0x0)"`.
    pub fn stop_description(&self) -> MortemResult<String>
    {
        Ok(self.stopped()?.description.clone())
    }

    /// Why the stop's fault could not be classified, if it could not.
    ///
    /// A stop with `StopReason::None` and a failure here is an unknown
    /// fault, not a plain interrupt.
    pub fn classification_failure(&self) -> MortemResult<Option<ClassificationFailure>>
    {
        Ok(self.stopped()?.failure)
    }

    /// Read a register of `thread` (the selected thread if `None`).
    ///
    /// ## Errors
    ///
    /// `ProcessNotRunning`, `ThreadNotFound`, `RegisterUnavailable`,
    /// `StaleSnapshot`.
    pub fn read_register(&self, thread: Option<ThreadId>, name: &str) -> MortemResult<u64>
    {
        self.resolve(thread)?.read_register(name)
    }

    /// Call stack of `thread` (the selected thread if `None`), innermost
    /// frame first.
    pub fn backtrace(&self, thread: Option<ThreadId>) -> MortemResult<Vec<Frame>>
    {
        Ok(self.resolve(thread)?.backtrace()?.to_vec())
    }

    /// Call stacks of every thread, in thread id order.
    pub fn backtrace_all(&self) -> MortemResult<Vec<(ThreadId, Vec<Frame>)>>
    {
        self.stopped()?
            .snapshots
            .iter()
            .map(|(thread, snapshot)| Ok((*thread, snapshot.backtrace()?.to_vec())))
            .collect()
    }

    /// Evaluate `expression` in the innermost frame of the selected thread.
    ///
    /// ## Errors
    ///
    /// `ProcessNotRunning` unless stopped; `EvaluationError` for anything
    /// wrong with the expression or the memory it touches.
    pub fn evaluate_expression(&self, expression: &str) -> MortemResult<Value>
    {
        self.evaluate_expression_in(None, 0, expression)
    }

    /// Evaluate `expression` in frame `frame_index` of `thread`.
    pub fn evaluate_expression_in(
        &self,
        thread: Option<ThreadId>,
        frame_index: usize,
        expression: &str,
    ) -> MortemResult<Value>
    {
        let snapshot = self.resolve(thread)?;
        let frames = snapshot.backtrace()?;
        let frame = frames.get(frame_index).ok_or_else(|| {
            MortemError::InvalidArgument(format!(
                "thread {} has no frame #{frame_index} ({} frames)",
                snapshot.thread_id(),
                frames.len()
            ))
        })?;
        eval::evaluate(&snapshot, frame, expression, &self.config)
    }
}
