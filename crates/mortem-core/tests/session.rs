//! Tests for the inspection session state machine

mod common;

use std::sync::Arc;

use common::{
    null_deref_fault, sigsegv, Control, CrashProgramSymbols, ScriptedInferior, CRASH_LINE, CRASH_PC, IDLE_THREAD,
    MAIN_THREAD, RAX_AT_CRASH,
};
use mortem_core::config::SessionConfig;
use mortem_core::error::{ClassificationFailure, MortemError};
use mortem_core::eval::Value;
use mortem_core::events::SessionEvent;
use mortem_core::session::{InspectionSession, ResumeOutcome, SessionState};
use mortem_core::target::{StopCause, TargetEvent, ThreadStop};
use mortem_core::types::{
    Address, ExitStatus, FaultKind, LocationId, NativeFault, Platform, ProcessState, RegisterName, StopReason,
};
use smallvec::smallvec;
use test_log::test;

/// Session stopped at the null-pointer crash on `platform`.
fn crashed(platform: Platform) -> (InspectionSession, Arc<ScriptedInferior>)
{
    let inferior = Arc::new(ScriptedInferior::crash_program(platform));
    let mut session = InspectionSession::new(Arc::new(CrashProgramSymbols), SessionConfig::default());
    session.begin_run(inferior.clone()).unwrap();
    session
        .apply_event(TargetEvent::fault(MAIN_THREAD, null_deref_fault(platform)))
        .unwrap();
    (session, inferior)
}

fn assert_not_running<T: std::fmt::Debug>(result: Result<T, MortemError>)
{
    assert!(matches!(result, Err(MortemError::ProcessNotRunning)), "got {result:?}");
}

#[test]
fn test_lifecycle_states()
{
    let inferior = Arc::new(ScriptedInferior::crash_program(Platform::Linux));
    let mut session = InspectionSession::new(Arc::new(CrashProgramSymbols), SessionConfig::default());
    assert_eq!(session.state(), SessionState::Launching);
    assert_eq!(session.process(), None);
    assert_not_running(session.threads());

    session.begin_run(inferior.clone()).unwrap();
    assert_eq!(session.state(), SessionState::Running);
    assert_eq!(session.process().map(|p| p.state), Some(ProcessState::Running));
    assert_eq!(session.platform(), Platform::Linux);

    let event = session.apply_event(TargetEvent::fault(MAIN_THREAD, sigsegv())).unwrap();
    assert_eq!(
        event,
        SessionEvent::Stopped {
            reason: StopReason::signal(11, FaultKind::Segv),
            thread: Some(MAIN_THREAD)
        }
    );
    assert_eq!(session.state(), SessionState::Stopped(StopReason::signal(11, FaultKind::Segv)));
    assert_eq!(session.process().map(|p| p.state), Some(ProcessState::Stopped));
}

#[test]
fn test_launching_twice_is_invalid()
{
    let (mut session, inferior) = crashed(Platform::Linux);
    assert!(matches!(
        session.begin_run(inferior),
        Err(MortemError::InvalidState { operation: "launch", .. })
    ));
}

#[test]
fn test_events_outside_running_are_rejected()
{
    let (mut session, _inferior) = crashed(Platform::Linux);
    assert!(matches!(
        session.apply_event(TargetEvent::Exited { code: 0 }),
        Err(MortemError::InvalidState { .. })
    ));

    session.force_exit(ExitStatus::Lost);
    assert_not_running(session.apply_event(TargetEvent::Exited { code: 0 }));
}

#[test]
fn test_register_readback_after_crash()
{
    let (session, _inferior) = crashed(Platform::Linux);
    assert_eq!(session.read_register(None, "rax").unwrap(), RAX_AT_CRASH);
    assert_eq!(session.read_register(Some(MAIN_THREAD), "$pc").unwrap(), CRASH_PC);

    let snapshot = session.snapshot(MAIN_THREAD).unwrap();
    assert_eq!(
        snapshot.first_general_register().unwrap(),
        (RegisterName::new("rax"), RAX_AT_CRASH)
    );
    assert!(matches!(
        session.read_register(None, "xmm42"),
        Err(MortemError::RegisterUnavailable { .. })
    ));
    assert!(matches!(
        session.read_register(Some(mortem_core::types::ThreadId(99)), "rax"),
        Err(MortemError::ThreadNotFound(_))
    ));
}

#[test]
fn test_backtrace_points_at_crash_line()
{
    let (session, _inferior) = crashed(Platform::Linux);
    let frames = session.backtrace(None).unwrap();

    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].index, 0);
    assert_eq!(frames[0].pc, Address::from(CRASH_PC));
    assert_eq!(frames[0].function_name(), Some("main"));
    assert_eq!(frames[0].source_line(), Some(CRASH_LINE));
    assert_eq!(
        frames[0].location.as_ref().map(|location| location.file_name()),
        Some("main.c")
    );
    assert_eq!(frames[1].function_name(), Some("__libc_start_main"));
    assert_eq!(frames[2].function_name(), Some("_start"));

    let all = session.backtrace_all().unwrap();
    let threads: Vec<_> = all.iter().map(|(thread, _)| *thread).collect();
    assert_eq!(threads, [MAIN_THREAD, IDLE_THREAD]);
    assert_eq!(all[1].1.len(), 1);
    assert!(!all[1].1[0].is_symbolicated());
}

#[test]
fn test_evaluate_crash_program_variables()
{
    let (session, _inferior) = crashed(Platform::Linux);

    assert_eq!(session.evaluate_expression("argc").unwrap().as_i64(), Some(1));
    assert_eq!(
        session.evaluate_expression("hello_world").unwrap().summary().as_deref(),
        Some("Hello")
    );
    let argv0 = session.evaluate_expression("argv[0]").unwrap().summary().unwrap();
    assert!(argv0.contains("a.out"), "{argv0}");

    let null_ptr = session.evaluate_expression("null_ptr").unwrap();
    assert_eq!(null_ptr.as_address(), Some(Address::ZERO));
    assert_eq!(null_ptr.to_string(), "0x0000000000000000");

    assert_eq!(session.evaluate_expression("*argv[0]").unwrap(), Value::Char(b'a'));
    assert_eq!(session.evaluate_expression("argc + 41").unwrap().as_i64(), Some(42));
    assert_eq!(
        session.evaluate_expression("$rax").unwrap().as_i64(),
        Some(i64::try_from(RAX_AT_CRASH).unwrap())
    );
    assert_eq!(
        session.evaluate_expression("*(hello_world + 1)").unwrap(),
        Value::Char(b'e')
    );
    assert_eq!(
        session.evaluate_expression("&argc").unwrap().as_address(),
        Some(Address::from(0x7fff_0000 - 0x14))
    );
}

#[test]
fn test_evaluation_errors()
{
    let (session, _inferior) = crashed(Platform::Linux);
    for expression in ["*null_ptr", "no_such_variable", "$notareg", "argc[0]", "*argc", "&1", "argv["] {
        let result = session.evaluate_expression(expression);
        assert!(
            matches!(result, Err(MortemError::EvaluationError(_))),
            "{expression}: {result:?}"
        );
    }
    // The session is still usable after a failed evaluation.
    assert_eq!(session.evaluate_expression("argc").unwrap().as_i64(), Some(1));
}

#[test]
fn test_evaluation_is_idempotent_within_a_stop()
{
    let (session, _inferior) = crashed(Platform::Linux);
    for expression in ["argc", "argv[0]", "hello_world", "null_ptr", "$rsp"] {
        let first = session.evaluate_expression(expression).unwrap();
        let second = session.evaluate_expression(expression).unwrap();
        assert_eq!(first, second, "{expression}");
    }
}

#[test]
fn test_evaluate_in_outer_frame_has_no_locals()
{
    let (session, _inferior) = crashed(Platform::Linux);
    assert!(matches!(
        session.evaluate_expression_in(Some(MAIN_THREAD), 1, "argc"),
        Err(MortemError::EvaluationError(_))
    ));
    assert_eq!(
        session
            .evaluate_expression_in(Some(MAIN_THREAD), 1, "hello_world")
            .unwrap()
            .summary()
            .as_deref(),
        Some("Hello")
    );
    assert!(matches!(
        session.evaluate_expression_in(None, 7, "argc"),
        Err(MortemError::InvalidArgument(_))
    ));
}

#[test]
fn test_linux_step_after_crash_exits()
{
    let (mut session, inferior) = crashed(Platform::Linux);
    let snapshot = session.snapshot(MAIN_THREAD).unwrap();

    assert_eq!(session.begin_step().unwrap(), ResumeOutcome::Running);
    assert_eq!(inferior.controls(), [Control::Step(MAIN_THREAD, Some(sigsegv()))]);
    assert!(snapshot.is_stale());
    assert!(matches!(
        snapshot.read_register("rax"),
        Err(MortemError::StaleSnapshot { .. })
    ));

    let event = session.apply_event(TargetEvent::Signaled { signal: 11 }).unwrap();
    assert_eq!(
        event,
        SessionEvent::Exited {
            status: ExitStatus::Signaled(11)
        }
    );
    assert!(session.state().is_exited());
}

#[test]
fn test_darwin_step_after_crash_remains_stopped()
{
    let (mut session, inferior) = crashed(Platform::Darwin);
    let reason = session.state().stop_reason().unwrap();
    assert_eq!(
        reason,
        StopReason::ExceptionBadAccess {
            address: Some(Address::ZERO)
        }
    );
    assert_eq!(
        session.stop_description().unwrap(),
        "EXC_BAD_ACCESS (code=1, address=0x0)"
    );
    let epoch = session.epoch();
    let snapshot = session.snapshot(MAIN_THREAD).unwrap();

    assert_eq!(session.begin_step().unwrap(), ResumeOutcome::RemainedStopped(reason));
    assert_eq!(session.begin_resume().unwrap(), ResumeOutcome::RemainedStopped(reason));

    assert_eq!(session.state(), SessionState::Stopped(reason));
    assert_eq!(session.epoch(), epoch);
    assert!(inferior.controls().is_empty());
    assert!(!snapshot.is_stale());
    assert_eq!(snapshot.read_register("rax").unwrap(), RAX_AT_CRASH);
    assert_eq!(session.backtrace(None).unwrap()[0].source_line(), Some(CRASH_LINE));
}

#[test]
fn test_android_step_after_crash_may_refault()
{
    let (mut session, inferior) = crashed(Platform::Android);
    let first = session.state().stop_reason().unwrap();
    assert_eq!(first, StopReason::signal(11, FaultKind::Segv));

    assert_eq!(session.begin_step().unwrap(), ResumeOutcome::Running);
    session.apply_event(TargetEvent::fault(MAIN_THREAD, sigsegv())).unwrap();
    assert_eq!(session.state(), SessionState::Stopped(first));

    assert_eq!(session.begin_step().unwrap(), ResumeOutcome::Running);
    session.apply_event(TargetEvent::Signaled { signal: 11 }).unwrap();
    assert_eq!(session.state(), SessionState::Exited(ExitStatus::Signaled(11)));
    assert_eq!(inferior.controls().len(), 2);
}

#[test]
fn test_resume_from_breakpoint_delivers_nothing()
{
    let inferior = Arc::new(ScriptedInferior::crash_program(Platform::Darwin));
    let mut session = InspectionSession::new(Arc::new(CrashProgramSymbols), SessionConfig::default());
    session.begin_run(inferior.clone()).unwrap();
    session
        .apply_event(TargetEvent::stopped(MAIN_THREAD, StopCause::Breakpoint(LocationId(1))))
        .unwrap();
    assert_eq!(session.state(), SessionState::Stopped(StopReason::Breakpoint(LocationId(1))));

    // Not a crash, so even Darwin resumes.
    assert_eq!(session.begin_resume().unwrap(), ResumeOutcome::Running);
    assert_eq!(inferior.controls(), [Control::Resume(None)]);
}

#[test]
fn test_operations_after_exit_fail_with_process_not_running()
{
    let (mut session, _inferior) = crashed(Platform::Linux);
    session.begin_resume().unwrap();
    session.apply_event(TargetEvent::Exited { code: 139 }).unwrap();

    assert_not_running(session.read_register(None, "rax"));
    assert_not_running(session.backtrace(None));
    assert_not_running(session.backtrace_all());
    assert_not_running(session.evaluate_expression("argc"));
    assert_not_running(session.threads());
    assert_not_running(session.selected_thread());
    assert_not_running(session.begin_step());
    assert_not_running(session.begin_resume());

    let process = session.process().unwrap();
    assert_eq!(process.state, ProcessState::Exited);
    assert_eq!(process.exit_code(), Some(139));
}

#[test]
fn test_inspection_while_running_fails()
{
    let (mut session, _inferior) = crashed(Platform::Linux);
    session.begin_resume().unwrap();
    assert_not_running(session.read_register(None, "rax"));
    assert!(matches!(session.begin_step(), Err(MortemError::InvalidState { .. })));
}

#[test]
fn test_concurrent_faults_select_one_thread()
{
    let inferior = Arc::new(ScriptedInferior::crash_program(Platform::Linux));
    let mut session = InspectionSession::new(Arc::new(CrashProgramSymbols), SessionConfig::default());
    session.begin_run(inferior.clone()).unwrap();

    let bus = NativeFault::Signal {
        number: 7,
        address: None,
    };
    session
        .apply_event(TargetEvent::Stopped {
            stops: smallvec![
                ThreadStop {
                    thread: IDLE_THREAD,
                    cause: StopCause::Breakpoint(LocationId(3)),
                },
                ThreadStop {
                    thread: MAIN_THREAD,
                    cause: StopCause::Fault(sigsegv()),
                },
                ThreadStop {
                    thread: IDLE_THREAD,
                    cause: StopCause::Fault(bus),
                },
            ],
        })
        .unwrap();

    assert_eq!(session.selected_thread().unwrap(), MAIN_THREAD);
    assert_eq!(session.state(), SessionState::Stopped(StopReason::signal(11, FaultKind::Segv)));
    assert_eq!(
        session.concurrent_faults().unwrap(),
        [(IDLE_THREAD, StopReason::signal(7, FaultKind::Bus))]
    );
    assert_eq!(session.crashed_threads().unwrap(), [MAIN_THREAD, IDLE_THREAD]);

    let crash_carriers = session
        .threads()
        .unwrap()
        .into_iter()
        .filter(|thread| {
            session
                .snapshot(*thread)
                .unwrap()
                .stop_reason()
                .is_some_and(|reason| reason.is_crash())
        })
        .count();
    assert_eq!(crash_carriers, 1);

    session.select_thread(IDLE_THREAD).unwrap();
    assert_eq!(session.read_register(None, "pc").unwrap(), 0x40_1800);

    // The pending fault still belongs to the crashed thread.
    session.begin_step().unwrap();
    assert_eq!(inferior.controls(), [Control::Step(MAIN_THREAD, Some(sigsegv()))]);
}

#[test]
fn test_register_capture_failure_is_deferred()
{
    let inferior = Arc::new(ScriptedInferior::crash_program(Platform::Linux));
    inferior.fail_registers(IDLE_THREAD);
    let mut session = InspectionSession::new(Arc::new(CrashProgramSymbols), SessionConfig::default());
    session.begin_run(inferior).unwrap();
    session.apply_event(TargetEvent::fault(MAIN_THREAD, sigsegv())).unwrap();

    assert_eq!(session.read_register(None, "rax").unwrap(), RAX_AT_CRASH);
    assert!(matches!(
        session.read_register(Some(IDLE_THREAD), "rax"),
        Err(MortemError::RegisterUnavailable { .. })
    ));
    assert!(session.backtrace_all().is_err());
}

#[test]
fn test_unclassified_fault_stops_with_no_reason()
{
    let inferior = Arc::new(ScriptedInferior::crash_program(Platform::Windows));
    let mut session = InspectionSession::new(Arc::new(CrashProgramSymbols), SessionConfig::default());
    session.begin_run(inferior.clone()).unwrap();
    session.apply_event(TargetEvent::fault(MAIN_THREAD, sigsegv())).unwrap();

    assert_eq!(session.state(), SessionState::Stopped(StopReason::None));
    assert_eq!(
        session.classification_failure().unwrap(),
        Some(ClassificationFailure {
            platform: Platform::Windows,
            fault: sigsegv(),
        })
    );
    assert_eq!(session.read_register(None, "rax").unwrap(), RAX_AT_CRASH);

    // The raw fault is still handed back to the OS.
    session.begin_resume().unwrap();
    assert_eq!(inferior.controls(), [Control::Resume(Some(sigsegv()))]);
}

#[test]
fn test_windows_access_violation_has_no_signal_number()
{
    let (session, _inferior) = crashed(Platform::Windows);
    assert_eq!(
        session.state(),
        SessionState::Stopped(StopReason::ExceptionBadAccess {
            address: Some(Address::ZERO)
        })
    );
    assert!(!matches!(
        session.state().stop_reason(),
        Some(StopReason::Signal { number: Some(_), .. })
    ));
    assert_eq!(session.stop_description().unwrap(), "invalid address");
    assert_eq!(session.classification_failure().unwrap(), None);
}

#[test]
fn test_detach_and_force_exit()
{
    let (mut session, inferior) = crashed(Platform::Linux);
    let snapshot = session.snapshot(MAIN_THREAD).unwrap();

    let event = session.detach().unwrap();
    assert_eq!(
        event,
        SessionEvent::Exited {
            status: ExitStatus::Detached
        }
    );
    assert_eq!(inferior.controls(), [Control::Detach]);
    assert!(snapshot.is_stale());
    assert_not_running(session.detach());
    assert_eq!(session.force_exit(ExitStatus::Lost), None);
    assert_eq!(session.state(), SessionState::Exited(ExitStatus::Detached));
}
