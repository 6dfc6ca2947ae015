//! Session event types and observers.
//!
//! A [`crate::controller::SessionController`] tells one registered
//! [`StopObserver`] about every stop, resume, and exit, before the blocking
//! call that caused it returns. Consumers react to state changes without
//! polling `state()`.

use std::sync::mpsc;

use crate::types::{ExitStatus, StopReason, ThreadId};

/// Event emitted by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent
{
    /// The inferior stopped.
    Stopped
    {
        /// Reason carried by the selected thread.
        reason: StopReason,
        /// Selected thread (if known).
        thread: Option<ThreadId>,
    },
    /// The inferior was resumed or stepped.
    Resumed,
    /// The inferior is gone.
    Exited
    {
        /// How it ended.
        status: ExitStatus,
    },
}

impl SessionEvent
{
    /// Human-readable description of the event.
    ///
    /// ```rust
    /// use mortem_core::events::SessionEvent;
    /// use mortem_core::types::{ExitStatus, FaultKind, StopReason, ThreadId};
    ///
    /// let stop = SessionEvent::Stopped {
    ///     reason: StopReason::signal(11, FaultKind::Segv),
    ///     thread: Some(ThreadId(7)),
    /// };
    /// assert_eq!(stop.describe(), "Process stopped: signal SIGSEGV (thread 7)");
    /// let exit = SessionEvent::Exited { status: ExitStatus::Code(0) };
    /// assert_eq!(exit.describe(), "Process exited with status = 0");
    /// ```
    #[must_use]
    pub fn describe(&self) -> String
    {
        match self {
            Self::Stopped { reason, thread } => {
                let mut description = format!("Process stopped: {reason}");
                if let Some(thread_id) = thread {
                    description.push_str(&format!(" (thread {})", thread_id.raw()));
                }
                description
            }
            Self::Resumed => "Process resumed".to_string(),
            Self::Exited { status } => format!("Process {status}"),
        }
    }
}

/// Receives session events.
///
/// Called on the controller's thread; implementations should return quickly.
pub trait StopObserver: Send
{
    /// Handle one event.
    fn on_event(&mut self, event: &SessionEvent);
}

impl StopObserver for mpsc::Sender<SessionEvent>
{
    fn on_event(&mut self, event: &SessionEvent)
    {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.send(*event);
    }
}

impl<F> StopObserver for F
where
    F: FnMut(&SessionEvent) + Send,
{
    fn on_event(&mut self, event: &SessionEvent)
    {
        self(event);
    }
}

/// Sender side of a session event channel.
pub type SessionEventSender = mpsc::Sender<SessionEvent>;
/// Receiver side of a session event channel.
pub type SessionEventReceiver = mpsc::Receiver<SessionEvent>;

/// Create a channel whose sender can be registered as an observer.
#[must_use]
pub fn event_channel() -> (SessionEventSender, SessionEventReceiver)
{
    mpsc::channel()
}
