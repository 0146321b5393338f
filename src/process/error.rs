//! Process supervision error types.

/// Error type for supervisor operations.
#[derive(thiserror::Error, Debug)]
pub enum SupervisorError {
    /// The shell binary was not found.
    #[error("Shell not found: {0}")]
    ShellNotFound(String),
    /// Permission denied when spawning the shell.
    #[error("Permission denied spawning shell: {0}")]
    PermissionDenied(String),
    /// Other I/O error while spawning.
    #[error("Failed to spawn shell: {0}")]
    Spawn(#[from] std::io::Error),
    /// The task driving the run ended abnormally.
    #[error("Run driver failed: {0}")]
    Driver(#[from] tokio::task::JoinError),
}

impl SupervisorError {
    /// Create a `SupervisorError` from a spawn I/O error, classifying common cases.
    pub(crate) fn from_spawn(shell: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::ShellNotFound(shell.to_string()),
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied(shell.to_string()),
            _ => Self::Spawn(err),
        }
    }
}

/// Errors reported by a [`JobControl`](super::JobControl) implementation.
#[derive(thiserror::Error, Debug)]
pub enum JobControlError {
    /// The platform has no job-control primitive for this operation.
    #[error("Job control is not supported on this platform")]
    Unsupported,
    /// The process id cannot be represented as a platform pid.
    #[error("Invalid process id: {0}")]
    InvalidPid(u32),
    /// Signal delivery failed.
    #[cfg(unix)]
    #[error("Failed to signal process group {pid}: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::Error,
    },
}
