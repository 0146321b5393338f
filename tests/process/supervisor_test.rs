//! End-to-end tests for `ProcessSupervisor` against real shell commands.

use std::time::Duration;

use cmd_supervisor::config::SupervisorConfig;
use cmd_supervisor::process::{
    ExitKind, OutputStream, ProcessSupervisor, RunOptions, SupervisorError, SupervisorEvent,
    SupervisorState, ALREADY_RUNNING,
};
use tokio::sync::broadcast;
use tokio::time::sleep;

fn test_config() -> SupervisorConfig {
    SupervisorConfig {
        shell: "/bin/sh".to_string(),
        tick_interval_ms: 50,
        ..SupervisorConfig::default()
    }
}

fn supervisor() -> ProcessSupervisor {
    ProcessSupervisor::new(test_config())
}

fn quiet() -> RunOptions {
    RunOptions::new().quiet()
}

/// Collect everything already delivered to `rx`.
fn drain_events(rx: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Poll until `check` holds or `limit` passes.
async fn wait_until(limit: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_run_echo_captures_output() {
    let supervisor = supervisor();
    let code = supervisor.run("echo hello", quiet(), 10).await.unwrap();

    assert_eq!(code, 0);
    assert_eq!(supervisor.get_output(), "hello");
    assert_eq!(supervisor.get_error(), "");
    assert_eq!(supervisor.state(), SupervisorState::Finished);
    assert!(!supervisor.is_running());
    assert_eq!(supervisor.pid(), None);
}

#[tokio::test]
async fn test_run_reports_exit_code() {
    let supervisor = supervisor();
    let code = supervisor.run("exit 7", quiet(), 10).await.unwrap();

    assert_eq!(code, 7);
    let exit = supervisor.exit_info().unwrap();
    assert_eq!(exit.code, 7);
    assert_eq!(exit.kind, ExitKind::NormalExit);
    assert_eq!(supervisor.exit_code(), Some(7));
}

#[tokio::test]
async fn test_stderr_is_captured_separately() {
    let supervisor = supervisor();
    supervisor
        .run("echo out; echo err >&2", quiet(), 10)
        .await
        .unwrap();

    assert_eq!(supervisor.get_output(), "out");
    assert_eq!(supervisor.get_error(), "err");
}

#[tokio::test]
async fn test_output_events_match_buffer() {
    let supervisor = supervisor();
    let mut rx = supervisor.subscribe();

    supervisor
        .run("for i in 1 2 3; do echo line$i; done", quiet(), 10)
        .await
        .unwrap();

    let mut streamed = Vec::new();
    for event in drain_events(&mut rx) {
        if let SupervisorEvent::Output {
            stream: OutputStream::Stdout,
            chunk,
        } = event
        {
            streamed.extend_from_slice(&chunk);
        }
    }
    assert_eq!(String::from_utf8_lossy(&streamed).trim(), supervisor.get_output());
    assert_eq!(supervisor.get_output(), "line1\nline2\nline3");
}

#[tokio::test]
async fn test_lifecycle_events_in_order() {
    let supervisor = supervisor();
    let mut rx = supervisor.subscribe();

    supervisor.run("sleep 0.2", quiet(), 4).await.unwrap();

    let events = drain_events(&mut rx);
    assert!(matches!(events.first(), Some(SupervisorEvent::Started { pid: Some(_) })));
    assert!(matches!(events.last(), Some(SupervisorEvent::Finished { .. })));

    let finished = events
        .iter()
        .filter(|e| matches!(e, SupervisorEvent::Finished { .. }))
        .count();
    assert_eq!(finished, 1);

    let progress: Vec<(u64, u64)> = events
        .iter()
        .filter_map(|e| match e {
            SupervisorEvent::Progress { elapsed, estimated } => Some((*elapsed, *estimated)),
            _ => None,
        })
        .collect();
    assert!(!progress.is_empty(), "expected progress ticks");
    assert_eq!(progress[0], (1, 4));
    assert!(progress.windows(2).all(|w| w[1].0 == w[0].0 + 1));
}

#[tokio::test]
async fn test_second_run_while_live_is_rejected() {
    let supervisor = supervisor();

    let (first, second) = tokio::join!(
        supervisor.run("echo first; sleep 0.5", quiet(), 10),
        async {
            sleep(Duration::from_millis(150)).await;
            let code = supervisor.run("echo second", quiet(), 10).await.unwrap();
            (code, supervisor.get_output())
        }
    );

    assert_eq!(first.unwrap(), 0);
    let (code, output_during) = second;
    assert_eq!(code, ALREADY_RUNNING);
    assert_eq!(output_during, "first");
    assert_eq!(supervisor.get_output(), "first");
}

#[tokio::test]
async fn test_control_without_child() {
    let supervisor = supervisor();

    assert!(supervisor.terminate().await);
    assert!(supervisor.kill().await);
    assert!(!supervisor.pause().await);
    assert!(!supervisor.resume().await);
    supervisor.write_to_proc("ignored\n").await;
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}

#[cfg(unix)]
#[tokio::test]
async fn test_pause_freezes_ticks_until_resume() {
    let supervisor = ProcessSupervisor::new(SupervisorConfig {
        tick_interval_ms: 200,
        ..test_config()
    });
    let mut rx = supervisor.subscribe();

    let (result, ()) = tokio::join!(supervisor.run("sleep 30", quiet(), 50), async {
        while !matches!(
            rx.recv().await.unwrap(),
            SupervisorEvent::Progress { elapsed: 3, .. }
        ) {}

        assert!(supervisor.pause().await);
        assert_eq!(supervisor.state(), SupervisorState::Paused);
        assert_eq!(supervisor.elapsed_ticks(), 3);

        sleep(Duration::from_secs(2)).await;
        assert_eq!(supervisor.elapsed_ticks(), 3);
        let ticked = drain_events(&mut rx)
            .iter()
            .any(|e| matches!(e, SupervisorEvent::Progress { .. }));
        assert!(!ticked, "no progress while paused");

        assert!(supervisor.resume().await);
        assert_eq!(supervisor.state(), SupervisorState::Running);
        assert!(wait_until(Duration::from_secs(2), || supervisor.elapsed_ticks() > 3).await);

        assert!(supervisor.kill().await);
    });

    assert_eq!(result.unwrap(), 1);
    assert_eq!(supervisor.exit_info().unwrap().kind, ExitKind::CrashExit);
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminate_long_running_command() {
    let supervisor = supervisor();
    let mut rx = supervisor.subscribe();

    let (result, terminated) = tokio::join!(supervisor.run("sleep 30", quiet(), 10), async {
        assert!(wait_until(Duration::from_secs(2), || supervisor.is_running()).await);
        supervisor.terminate().await
    });

    assert!(terminated);
    assert_eq!(result.unwrap(), 1);
    let exit = supervisor.exit_info().unwrap();
    assert_eq!(exit.kind, ExitKind::CrashExit);
    assert_eq!(exit.code, 15);

    let finished = drain_events(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, SupervisorEvent::Finished { .. }))
        .count();
    assert_eq!(finished, 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_terminate_paused_command() {
    let supervisor = supervisor();

    let (result, terminated) = tokio::join!(supervisor.run("sleep 30", quiet(), 10), async {
        assert!(wait_until(Duration::from_secs(2), || supervisor.is_running()).await);
        assert!(supervisor.pause().await);
        supervisor.terminate().await
    });

    assert!(terminated);
    assert_eq!(result.unwrap(), 1);
}

#[tokio::test]
async fn test_write_to_proc_reaches_stdin() {
    let supervisor = supervisor();

    let (result, ()) = tokio::join!(
        supervisor.run("read line; echo \"got $line\"", quiet(), 10),
        async {
            assert!(wait_until(Duration::from_secs(2), || supervisor.is_running()).await);
            supervisor.write_to_proc("hi\n").await;
        }
    );

    assert_eq!(result.unwrap(), 0);
    assert_eq!(supervisor.get_output(), "got hi");
}

#[tokio::test]
async fn test_close_stdin_sends_eof() {
    let supervisor = supervisor();

    let (result, ()) = tokio::join!(supervisor.run("cat; echo done", quiet(), 10), async {
        assert!(wait_until(Duration::from_secs(2), || supervisor.is_running()).await);
        supervisor.write_to_proc("abc\n").await;
        supervisor.close_stdin().await;
    });

    assert_eq!(result.unwrap(), 0);
    assert_eq!(supervisor.get_output(), "abc\ndone");
}

/// Whether any non-zombie process still belongs to process group `pgid`.
#[cfg(target_os = "linux")]
fn group_alive(pgid: u32) -> bool {
    let Ok(entries) = std::fs::read_dir("/proc") else {
        return false;
    };
    entries.flatten().any(|entry| {
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            return false;
        };
        // Fields after the command name: state ppid pgrp ...
        let Some((_, rest)) = stat.rsplit_once(')') else {
            return false;
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        fields.len() > 2 && fields[0] != "Z" && fields[2] == pgid.to_string()
    })
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_drop_kills_process_group() {
    let supervisor = supervisor();

    // `; true` keeps the shell from exec-ing sleep, so sleep is a grandchild.
    let pgid = tokio::select! {
        _ = supervisor.run("sleep 30; true", quiet(), 10) => panic!("sleep should not finish"),
        () = sleep(Duration::from_millis(300)) => supervisor.pid().expect("child pid"),
    };
    assert!(group_alive(pgid));

    drop(supervisor);

    let gone = wait_until(Duration::from_secs(3), || !group_alive(pgid)).await;
    assert!(gone, "process group should be gone after the supervisor is dropped");
}

#[cfg(target_os = "linux")]
#[test]
fn test_runtime_shutdown_after_drop_kills_process_group() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let pgid = runtime.block_on(async {
        let supervisor = supervisor();
        let pgid = tokio::select! {
            _ = supervisor.run("sleep 30; true", quiet(), 10) => panic!("sleep should not finish"),
            () = sleep(Duration::from_millis(300)) => supervisor.pid().expect("child pid"),
        };
        assert!(group_alive(pgid));
        pgid
    });
    drop(runtime);

    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while group_alive(pgid) && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    assert!(!group_alive(pgid), "process group should not outlive the runtime");
}

#[tokio::test]
async fn test_missing_shell_is_an_error() {
    let supervisor = ProcessSupervisor::new(SupervisorConfig {
        shell: "/nonexistent/shell-12345".to_string(),
        ..test_config()
    });

    let result = supervisor.run("echo hi", quiet(), 10).await;
    assert!(matches!(result, Err(SupervisorError::ShellNotFound(_))));
    assert_eq!(supervisor.state(), SupervisorState::Idle);
}

#[tokio::test]
async fn test_get_output_of_returns_trimmed_stdout() {
    let supervisor = supervisor();
    let output = supervisor
        .get_output_of("printf '  padded  \\n\\n'", quiet(), 10)
        .await
        .unwrap();
    assert_eq!(output, "padded");
}

#[tokio::test]
async fn test_buffers_and_ticks_reset_per_run() {
    let supervisor = supervisor();

    supervisor.run("echo one; sleep 0.3", quiet(), 10).await.unwrap();
    let first_ticks = supervisor.elapsed_ticks();
    assert!(first_ticks > 0);
    assert_eq!(supervisor.get_output(), "one");

    supervisor.run("echo two", quiet(), 3).await.unwrap();
    assert!(supervisor.elapsed_ticks() < first_ticks);
    assert_eq!(supervisor.estimated_duration(), 3);
    assert_eq!(supervisor.get_output(), "two");
}

#[tokio::test]
async fn test_debug_level_is_adjustable() {
    let supervisor = supervisor();
    assert_eq!(supervisor.debug_level(), 0);
    supervisor.set_debug_level(2);
    assert_eq!(supervisor.debug_level(), 2);

    // Diagnostics only change logging, not results.
    assert_eq!(supervisor.run("exit 3", RunOptions::new(), 10).await.unwrap(), 3);
}
