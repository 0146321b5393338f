//! Fifo messages seen through a supervisor.
#![cfg(unix)]

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use cmd_supervisor::config::SupervisorConfig;
use cmd_supervisor::process::{ProcessSupervisor, RunOptions, SupervisorEvent};
use tempfile::TempDir;
use tokio::sync::broadcast;

fn supervisor() -> ProcessSupervisor {
    ProcessSupervisor::new(SupervisorConfig {
        shell: "/bin/sh".to_string(),
        ..SupervisorConfig::default()
    })
}

fn external_write(path: &Path, data: &str) {
    let mut writer = OpenOptions::new().write(true).open(path).unwrap();
    writer.write_all(data.as_bytes()).unwrap();
}

async fn next_fifo_message(rx: &mut broadcast::Receiver<SupervisorEvent>) -> Option<String> {
    tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            if let SupervisorEvent::FifoMessage { message } = rx.recv().await.ok()? {
                return Some(message);
            }
        }
    })
    .await
    .ok()
    .flatten()
}

#[tokio::test]
async fn test_connect_and_disconnect() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ctl.fifo");
    let supervisor = supervisor();

    assert!(!supervisor.is_fifo_connected());
    assert!(supervisor.connect_fifo(&path));
    assert!(supervisor.is_fifo_connected());
    assert!(path.exists());

    supervisor.disconnect_fifo();
    assert!(!supervisor.is_fifo_connected());
}

#[tokio::test]
async fn test_connect_failure_reports_false() {
    let supervisor = supervisor();
    assert!(!supervisor.connect_fifo("/nonexistent-dir-12345/ctl.fifo"));
    assert!(!supervisor.is_fifo_connected());

    // Logged, not raised.
    supervisor.write_to_fifo("nobody listening");
}

#[tokio::test]
async fn test_ping_pong_without_feedback() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ping.fifo");
    let supervisor = supervisor();
    let mut rx = supervisor.subscribe();
    assert!(supervisor.connect_fifo(&path));

    supervisor.write_to_fifo("ping");
    assert_eq!(next_fifo_message(&mut rx).await, None);

    external_write(&path, "pong\n");
    assert_eq!(next_fifo_message(&mut rx).await.as_deref(), Some("pong"));
    assert_eq!(next_fifo_message(&mut rx).await, None);
}

#[tokio::test]
async fn test_messages_arrive_during_run() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.fifo");
    let supervisor = supervisor();
    let mut rx = supervisor.subscribe();
    assert!(supervisor.connect_fifo(&path));

    let (result, message) = tokio::join!(
        supervisor.run("sleep 0.5", RunOptions::new().quiet(), 5),
        async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            external_write(&path, "status: halfway\n");
            next_fifo_message(&mut rx).await
        }
    );

    assert_eq!(result.unwrap(), 0);
    assert_eq!(message.as_deref(), Some("status: halfway"));
}
