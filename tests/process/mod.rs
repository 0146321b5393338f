//! Process module tests.

mod supervisor_test;

/// Verify all public process types are exported from the library.
#[test]
fn test_all_process_types_exported() {
    use cmd_supervisor::process::{
        join_command, EventBus, ExitInfo, ExitKind, OutputStream, ProcessSupervisor, RunOptions,
        SupervisorError, SupervisorEvent, SupervisorState, ALREADY_RUNNING,
        DEFAULT_EVENT_CAPACITY,
    };

    let supervisor = ProcessSupervisor::default();
    assert_eq!(supervisor.state(), SupervisorState::Idle);
    assert!(!supervisor.is_running());

    let _ = EventBus::new(DEFAULT_EVENT_CAPACITY);
    let _ = RunOptions::new().quiet();
    assert_eq!(join_command(&["ls".to_string()]), "ls");
    assert_eq!(ALREADY_RUNNING, -1);

    let _: fn(String) -> SupervisorError = SupervisorError::ShellNotFound;
    let _ = SupervisorEvent::Output {
        stream: OutputStream::Stdout,
        chunk: Vec::new(),
    };
    assert_eq!(ExitInfo::crashed(9).kind, ExitKind::CrashExit);
}
