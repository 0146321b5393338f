//! Platform job control for the supervised process group.
//!
//! On Unix every child is spawned as the leader of its own process group and
//! signals go to the whole group, so shell pipelines and background jobs
//! started by the command are stopped, continued and terminated together.

use std::fmt::Debug;
use std::sync::Arc;

use super::error::JobControlError;

/// Suspend, continue and stop a process group by id.
pub trait JobControl: Send + Sync + Debug {
    /// Suspend execution (job-control stop).
    fn suspend(&self, pid: u32) -> Result<(), JobControlError>;
    /// Continue a suspended process.
    fn resume(&self, pid: u32) -> Result<(), JobControlError>;
    /// Request graceful shutdown.
    fn terminate(&self, pid: u32) -> Result<(), JobControlError>;
    /// Force the process down.
    fn kill(&self, pid: u32) -> Result<(), JobControlError>;
}

/// POSIX signal delivery to a process group.
#[cfg(unix)]
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessGroupSignals;

#[cfg(unix)]
impl ProcessGroupSignals {
    fn send(pid: u32, signal: nix::sys::signal::Signal) -> Result<(), JobControlError> {
        use nix::sys::signal::killpg;
        use nix::unistd::Pid;

        let raw = i32::try_from(pid).map_err(|_| JobControlError::InvalidPid(pid))?;
        if raw <= 0 {
            return Err(JobControlError::InvalidPid(pid));
        }
        killpg(Pid::from_raw(raw), signal).map_err(|source| JobControlError::Signal { pid, source })
    }
}

#[cfg(unix)]
impl JobControl for ProcessGroupSignals {
    fn suspend(&self, pid: u32) -> Result<(), JobControlError> {
        Self::send(pid, nix::sys::signal::Signal::SIGSTOP)
    }

    fn resume(&self, pid: u32) -> Result<(), JobControlError> {
        Self::send(pid, nix::sys::signal::Signal::SIGCONT)
    }

    fn terminate(&self, pid: u32) -> Result<(), JobControlError> {
        Self::send(pid, nix::sys::signal::Signal::SIGTERM)
    }

    fn kill(&self, pid: u32) -> Result<(), JobControlError> {
        Self::send(pid, nix::sys::signal::Signal::SIGKILL)
    }
}

/// Job control for platforms without signals.
///
/// Every operation reports [`JobControlError::Unsupported`]; the driver then
/// falls back to killing the child handle directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedJobControl;

impl JobControl for UnsupportedJobControl {
    fn suspend(&self, _pid: u32) -> Result<(), JobControlError> {
        Err(JobControlError::Unsupported)
    }

    fn resume(&self, _pid: u32) -> Result<(), JobControlError> {
        Err(JobControlError::Unsupported)
    }

    fn terminate(&self, _pid: u32) -> Result<(), JobControlError> {
        Err(JobControlError::Unsupported)
    }

    fn kill(&self, _pid: u32) -> Result<(), JobControlError> {
        Err(JobControlError::Unsupported)
    }
}

/// The job control implementation for the current platform.
#[must_use]
pub fn platform_job_control() -> Arc<dyn JobControl> {
    #[cfg(unix)]
    {
        Arc::new(ProcessGroupSignals)
    }

    #[cfg(not(unix))]
    {
        Arc::new(UnsupportedJobControl)
    }
}
