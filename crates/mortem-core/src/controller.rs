//! # Session Controller
//!
//! Drives an [`InspectionSession`] from backend events.
//!
//! The controller owns the [`Launcher`], the current session, the event
//! channel, and at most one [`StopObserver`]. Its blocking calls
//! (`launch`, `step`, `resume`, `wait`) return only after the session has
//! fully moved to its next state and the observer has been told, so no
//! caller ever sees a half-applied transition.
//!
//! ## Waiting
//!
//! Waits block on the channel with `recv`/`recv_timeout`. When the
//! configured timeout elapses the call fails with `Timeout` and the session
//! stays `Running`; call [`SessionController::wait`] to keep waiting.
//!
//! ## Detaching
//!
//! [`SessionController::detach`] detaches immediately.
//! [`DetachHandle::detach`] does the same from another thread: a pending
//! wait is cancelled and returns with the session `Exited(Detached)`.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mortem_core::controller::SessionController;
//! use mortem_core::config::SessionConfig;
//! use mortem_core::target::LaunchRequest;
//! # fn launcher() -> Box<dyn mortem_core::target::Launcher> { unimplemented!() }
//!
//! let mut controller = SessionController::new(launcher(), SessionConfig::from_env()?);
//! let state = controller.launch(&LaunchRequest::new("./a.out"))?;
//! if state.stop_reason().is_some_and(|reason| reason.is_crash()) {
//!     for frame in controller.session().backtrace(None)? {
//!         println!("{frame}");
//!     }
//!     println!("argc = {}", controller.session().evaluate_expression("argc")?);
//! }
//! # Ok::<(), mortem_core::error::MortemError>(())
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{MortemError, MortemResult};
use crate::events::{SessionEvent, StopObserver};
use crate::session::{InspectionSession, ResumeOutcome, SessionState};
use crate::symbols::NoSymbols;
use crate::target::{ChannelMessage, EventSender, LaunchRequest, Launcher, Symbolizer};
use crate::types::ExitStatus;

/// Cancels a controller's pending wait from another thread.
#[derive(Debug, Clone)]
pub struct DetachHandle
{
    requested: Arc<AtomicBool>,
    wake: mpsc::Sender<ChannelMessage>,
}

impl DetachHandle
{
    /// Ask the controller to detach.
    ///
    /// Takes effect immediately if the controller is waiting, otherwise at
    /// the start of its next operation.
    pub fn detach(&self)
    {
        self.requested.store(true, Ordering::Release);
        // Fails only if the controller is gone, in which case there is
        // nothing left to detach.
        let _ = self.wake.send(ChannelMessage::Wake);
    }
}

/// Orchestrates launch, event handling, and state transitions.
pub struct SessionController
{
    launcher: Box<dyn Launcher>,
    symbolizer: Arc<dyn Symbolizer>,
    config: SessionConfig,
    session: InspectionSession,
    observer: Option<Box<dyn StopObserver>>,
    sender: mpsc::Sender<ChannelMessage>,
    receiver: mpsc::Receiver<ChannelMessage>,
    generation: u64,
    detach_requested: Arc<AtomicBool>,
}

impl SessionController
{
    /// Controller without symbols.
    pub fn new(launcher: Box<dyn Launcher>, config: SessionConfig) -> Self
    {
        Self::with_symbolizer(launcher, Arc::new(NoSymbols), config)
    }

    /// Controller that symbolicates frames and resolves variables through
    /// `symbolizer`.
    pub fn with_symbolizer(launcher: Box<dyn Launcher>, symbolizer: Arc<dyn Symbolizer>, config: SessionConfig) -> Self
    {
        let (sender, receiver) = mpsc::channel();
        Self {
            launcher,
            session: InspectionSession::new(Arc::clone(&symbolizer), config.clone()),
            symbolizer,
            config,
            observer: None,
            sender,
            receiver,
            generation: 0,
            detach_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register the observer, returning the previous one.
    pub fn set_observer(&mut self, observer: Box<dyn StopObserver>) -> Option<Box<dyn StopObserver>>
    {
        self.observer.replace(observer)
    }

    /// Remove the observer.
    pub fn take_observer(&mut self) -> Option<Box<dyn StopObserver>>
    {
        self.observer.take()
    }

    /// Handle for detaching from another thread.
    pub fn detach_handle(&self) -> DetachHandle
    {
        DetachHandle {
            requested: Arc::clone(&self.detach_requested),
            wake: self.sender.clone(),
        }
    }

    /// The current session, for inspection calls.
    pub fn session(&self) -> &InspectionSession
    {
        &self.session
    }

    /// Current session state.
    pub fn state(&self) -> SessionState
    {
        self.session.state()
    }

    fn notify(&mut self, event: &SessionEvent)
    {
        debug!(event = %event.describe(), "session event");
        if let Some(observer) = self.observer.as_mut() {
            observer.on_event(event);
        }
    }

    /// Honour a detach requested through a [`DetachHandle`]. Returns whether
    /// the session was detached.
    fn take_detach_request(&mut self) -> bool
    {
        if !self.detach_requested.swap(false, Ordering::AcqRel) {
            return false;
        }
        match self.session.detach() {
            Ok(event) => {
                debug!("detached on request");
                self.notify(&event);
                true
            }
            // Nothing to detach from.
            Err(_) => false,
        }
    }

    /// Launch a program and wait for its first stop or exit.
    ///
    /// Events left over from an earlier inferior are discarded first. A new
    /// launch is allowed in `Launching` and `Exited`.
    ///
    /// ## Errors
    ///
    /// - `InvalidState`: a process is already running or stopped
    /// - `LaunchFailed` / `Io`: from the launcher
    /// - `Timeout`: no event within the wait bound (the session is `Running`)
    pub fn launch(&mut self, request: &LaunchRequest) -> MortemResult<SessionState>
    {
        match self.session.state() {
            SessionState::Launching | SessionState::Exited(_) => {}
            state @ (SessionState::Running | SessionState::Stopped(_)) => {
                return Err(MortemError::InvalidState {
                    operation: "launch",
                    state: state.to_string(),
                });
            }
        }

        self.detach_requested.store(false, Ordering::Release);
        let mut dropped = 0usize;
        while self.receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded stale events before launch");
        }

        self.generation += 1;
        self.session = InspectionSession::new(Arc::clone(&self.symbolizer), self.config.clone());

        debug!(executable = %request.executable().display(), argc = request.argc(), "launching");
        let events = EventSender::new(self.sender.clone(), self.generation);
        let inferior = self.launcher.launch(request, events)?;
        self.session.begin_run(inferior)?;

        self.wait_for_event()
    }

    /// Step the selected thread and wait for the result.
    ///
    /// After a crash this follows the platform's crash-step policy; on
    /// Darwin the call returns at once with the session still stopped.
    ///
    /// ## Errors
    ///
    /// `ProcessNotRunning` unless stopped, `Timeout`, `Target`.
    pub fn step(&mut self) -> MortemResult<SessionState>
    {
        if self.take_detach_request() {
            return Err(MortemError::ProcessNotRunning);
        }
        let outcome = self.session.begin_step()?;
        self.after_leave(outcome)
    }

    /// Resume the process and wait for the next stop or exit.
    ///
    /// ## Errors
    ///
    /// Same as [`SessionController::step`].
    pub fn resume(&mut self) -> MortemResult<SessionState>
    {
        if self.take_detach_request() {
            return Err(MortemError::ProcessNotRunning);
        }
        let outcome = self.session.begin_resume()?;
        self.after_leave(outcome)
    }

    fn after_leave(&mut self, outcome: ResumeOutcome) -> MortemResult<SessionState>
    {
        match outcome {
            ResumeOutcome::RemainedStopped(reason) => {
                let thread = self.session.selected_thread().ok();
                self.notify(&SessionEvent::Stopped { reason, thread });
                Ok(self.session.state())
            }
            ResumeOutcome::Running => {
                self.notify(&SessionEvent::Resumed);
                self.wait_for_event()
            }
        }
    }

    /// Keep waiting after a `Timeout`.
    ///
    /// Returns immediately if the session is already stopped.
    ///
    /// ## Errors
    ///
    /// `ProcessNotRunning` without a process, `Timeout`.
    pub fn wait(&mut self) -> MortemResult<SessionState>
    {
        match self.session.state() {
            SessionState::Running => self.wait_for_event(),
            state @ SessionState::Stopped(_) => Ok(state),
            SessionState::Launching | SessionState::Exited(_) => Err(MortemError::ProcessNotRunning),
        }
    }

    /// Detach from the inferior. The session ends as `Exited(Detached)`.
    ///
    /// ## Errors
    ///
    /// `ProcessNotRunning` if there is nothing to detach from.
    pub fn detach(&mut self) -> MortemResult<SessionState>
    {
        self.detach_requested.store(false, Ordering::Release);
        let event = self.session.detach()?;
        self.notify(&event);
        Ok(self.session.state())
    }

    /// The timeout bounds the whole wait; ignored messages do not restart it.
    fn wait_for_event(&mut self) -> MortemResult<SessionState>
    {
        // A bound too large to represent waits without one.
        let deadline = self
            .config
            .wait_timeout
            .and_then(|timeout| Instant::now().checked_add(timeout).map(|at| (timeout, at)));
        loop {
            if self.take_detach_request() {
                return Ok(self.session.state());
            }

            let message = match deadline {
                Some((timeout, deadline)) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    let received = if remaining.is_zero() {
                        Err(RecvTimeoutError::Timeout)
                    } else {
                        self.receiver.recv_timeout(remaining)
                    };
                    match received {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => {
                            warn!(?timeout, "no event from the inferior");
                            return Err(MortemError::Timeout(timeout));
                        }
                        // The controller holds a sender itself.
                        Err(RecvTimeoutError::Disconnected) => return Ok(self.lose()),
                    }
                }
                None => match self.receiver.recv() {
                    Ok(message) => message,
                    Err(_) => return Ok(self.lose()),
                },
            };

            match message {
                ChannelMessage::Wake => {}
                ChannelMessage::Target { generation, event } if generation == self.generation => {
                    let event = self.session.apply_event(event)?;
                    self.notify(&event);
                    return Ok(self.session.state());
                }
                ChannelMessage::Closed { generation } if generation == self.generation => {
                    warn!(generation, "event source closed without an exit");
                    return Ok(self.lose());
                }
                ChannelMessage::Target { generation, .. } | ChannelMessage::Closed { generation } => {
                    debug!(generation, current = self.generation, "ignoring message from an earlier launch");
                }
            }
        }
    }

    fn lose(&mut self) -> SessionState
    {
        if let Some(event) = self.session.force_exit(ExitStatus::Lost) {
            self.notify(&event);
        }
        self.session.state()
    }
}
