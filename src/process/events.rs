//! Events published by a supervisor while it runs a command.
//!
//! Consumers subscribe through [`EventBus`] and receive every event emitted
//! after subscribing. Output chunks for one stream arrive in the order the
//! child wrote them; progress and output events may interleave freely.

use std::process::ExitStatus;

use serde::{Serialize, Serializer};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// One of the two captured output channels of the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// How the child terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitKind {
    /// The child called `exit` (or returned from main).
    NormalExit,
    /// The child was terminated by a signal.
    CrashExit,
}

impl ExitKind {
    /// Numeric status value: 0 for a normal exit, 1 for a crash.
    #[must_use]
    pub fn status_value(self) -> i32 {
        match self {
            Self::NormalExit => 0,
            Self::CrashExit => 1,
        }
    }
}

/// Exit snapshot of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExitInfo {
    /// Exit code for a normal exit, signal number for a crash.
    pub code: i32,
    pub kind: ExitKind,
}

impl ExitInfo {
    #[must_use]
    pub fn normal(code: i32) -> Self {
        Self {
            code,
            kind: ExitKind::NormalExit,
        }
    }

    #[must_use]
    pub fn crashed(code: i32) -> Self {
        Self {
            code,
            kind: ExitKind::CrashExit,
        }
    }

    /// Classify an OS exit status.
    #[must_use]
    pub fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return Self::normal(code);
        }

        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            Self::crashed(status.signal().unwrap_or(-1))
        }

        #[cfg(not(unix))]
        {
            Self::crashed(-1)
        }
    }

    /// Numeric result of a run.
    ///
    /// A crash is checked first: a crashed child may still report code 0.
    #[must_use]
    pub fn result_code(&self) -> i32 {
        match self.kind {
            ExitKind::CrashExit => self.kind.status_value(),
            ExitKind::NormalExit => self.code,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.kind == ExitKind::NormalExit && self.code == 0
    }
}

/// Notifications emitted by a [`ProcessSupervisor`](super::ProcessSupervisor).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorEvent {
    /// The shell was spawned.
    Started { pid: Option<u32> },
    /// A chunk of bytes was read from one of the child's output streams.
    Output {
        stream: OutputStream,
        #[serde(serialize_with = "lossy_utf8")]
        chunk: Vec<u8>,
    },
    /// A line was written into the connected fifo by another process.
    FifoMessage { message: String },
    /// Progress tick, both values in ticker units.
    Progress { elapsed: u64, estimated: u64 },
    /// The child terminated. Emitted exactly once per run.
    Finished { exit: ExitInfo },
}

impl SupervisorEvent {
    /// Text of an output chunk, if this is an output event.
    #[must_use]
    pub fn output_text(&self) -> Option<String> {
        match self {
            Self::Output { chunk, .. } => Some(String::from_utf8_lossy(chunk).into_owned()),
            _ => None,
        }
    }
}

fn lossy_utf8<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// Publish side of the supervisor's notification channel.
///
/// Cloning the bus shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.tx.subscribe()
    }

    /// Subscribe as a `Stream`.
    #[must_use]
    pub fn stream(&self) -> BroadcastStream<SupervisorEvent> {
        BroadcastStream::new(self.tx.subscribe())
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: SupervisorEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
