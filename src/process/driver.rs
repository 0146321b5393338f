//! Per-run event loop.
//!
//! A [`Driver`] owns everything that belongs to one child: the process
//! handle, both output pipes and the progress ticker. It is spawned as a
//! single task and reacts to child output, ticker firings, control requests
//! and cancellation from one `select!` loop, so buffers and state are only
//! ever mutated from that task.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStderr, ChildStdout};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;

use super::error::JobControlError;
use super::events::{ExitInfo, OutputStream, SupervisorEvent};
use super::job_control::JobControl;
use super::supervisor::Shared;
use super::ticker::{Progress, ProgressTicker};

/// Bytes read from a pipe per wakeup.
const READ_CHUNK: usize = 8192;

/// Poll period while reaping a child without the runtime.
const REAP_POLL: Duration = Duration::from_millis(10);

/// Signal used to stop the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StopSignal {
    Terminate,
    Kill,
}

/// Requests sent to the driver. Each carries a reply channel for the outcome.
#[derive(Debug)]
pub(crate) enum Control {
    Pause(oneshot::Sender<bool>),
    Resume(oneshot::Sender<bool>),
    Stop(StopSignal, oneshot::Sender<bool>),
}

pub(crate) struct Driver {
    pub(crate) child: Child,
    pub(crate) pid: Option<u32>,
    pub(crate) stdout: Option<ChildStdout>,
    pub(crate) stderr: Option<ChildStderr>,
    pub(crate) ticker: ProgressTicker,
    pub(crate) control_rx: mpsc::UnboundedReceiver<Control>,
    pub(crate) done_tx: watch::Sender<bool>,
    pub(crate) cancel: CancellationToken,
    pub(crate) shared: Arc<Shared>,
    pub(crate) job_control: Arc<dyn JobControl>,
    pub(crate) terminate_timeout: Duration,
    pub(crate) drain_timeout: Duration,
}

impl Driver {
    /// Drive the child until it terminates and return its exit snapshot.
    pub(crate) async fn run(mut self) -> ExitInfo {
        let mut out_buf = vec![0u8; READ_CHUNK];
        let mut err_buf = vec![0u8; READ_CHUNK];

        let waited = loop {
            tokio::select! {
                () = self.cancel.cancelled() => break self.shutdown().await,
                Some(control) = self.control_rx.recv() => self.handle_control(control),
                progress = self.ticker.tick() => self.handle_tick(progress),
                read = read_chunk(&mut self.stdout, &mut out_buf) => {
                    self.handle_read(OutputStream::Stdout, read, &out_buf);
                }
                read = read_chunk(&mut self.stderr, &mut err_buf) => {
                    self.handle_read(OutputStream::Stderr, read, &err_buf);
                }
                status = self.child.wait() => break status,
            }
        };

        self.ticker.stop();
        self.drain(&mut out_buf, &mut err_buf).await;

        let exit = match waited {
            Ok(status) => ExitInfo::from_status(status),
            Err(e) => {
                tracing::error!(pid = ?self.pid, error = %e, "Failed to wait for child");
                ExitInfo::crashed(-1)
            }
        };
        self.finish(exit)
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Pause(reply) => {
                let _ = reply.send(self.pause());
            }
            Control::Resume(reply) => {
                let _ = reply.send(self.resume());
            }
            Control::Stop(signal, reply) => {
                let _ = reply.send(self.stop(signal));
            }
        }
    }

    fn handle_tick(&mut self, progress: Progress) {
        self.shared.status().set_elapsed(progress.elapsed);
        self.shared.bus.emit(SupervisorEvent::Progress {
            elapsed: progress.elapsed,
            estimated: progress.estimated,
        });
    }

    fn handle_read(&mut self, stream: OutputStream, read: io::Result<usize>, buf: &[u8]) {
        match read {
            Ok(0) => {
                tracing::trace!(pid = ?self.pid, ?stream, "Stream closed");
                self.close(stream);
            }
            Ok(n) => self.shared.sink(stream).push(&buf[..n]),
            Err(e) => {
                tracing::warn!(pid = ?self.pid, ?stream, error = %e, "Failed to read child output");
                self.close(stream);
            }
        }
    }

    fn close(&mut self, stream: OutputStream) {
        match stream {
            OutputStream::Stdout => self.stdout = None,
            OutputStream::Stderr => self.stderr = None,
        }
    }

    fn pause(&mut self) -> bool {
        self.ticker.stop();
        let Some(pid) = self.pid else {
            return false;
        };
        match self.job_control.suspend(pid) {
            Ok(()) => {
                self.shared.status().mark_paused();
                if self.shared.diagnostics() {
                    tracing::info!(pid, "Paused process");
                }
                true
            }
            Err(e) => {
                tracing::warn!(pid, error = %e, "Failed to pause process");
                false
            }
        }
    }

    fn resume(&mut self) -> bool {
        let Some(pid) = self.pid else {
            tracing::debug!("Process id not found");
            return false;
        };
        self.ticker.restart();
        match self.job_control.resume(pid) {
            Ok(()) => {
                self.shared.status().mark_resumed();
                if self.shared.diagnostics() {
                    tracing::info!(pid, "Resumed process");
                }
                true
            }
            Err(e) => {
                tracing::warn!(pid, error = %e, "Failed to resume process");
                false
            }
        }
    }

    fn stop(&mut self, signal: StopSignal) -> bool {
        let Some(pid) = self.pid else {
            return self.child.start_kill().is_ok();
        };
        if self.shared.diagnostics() {
            tracing::info!(pid, ?signal, "Stopping process");
        }

        let sent = match signal {
            StopSignal::Terminate => self.job_control.terminate(pid),
            StopSignal::Kill => self.job_control.kill(pid),
        };
        match sent {
            Ok(()) => {
                // A stopped group holds SIGTERM pending until it is continued.
                if self.shared.status().is_paused() {
                    let _ = self.job_control.resume(pid);
                }
                true
            }
            Err(JobControlError::Unsupported) => self.child.start_kill().is_ok(),
            Err(e) => {
                tracing::warn!(pid, ?signal, error = %e, "Failed to signal process");
                false
            }
        }
    }

    /// Terminate, then kill, a child whose supervisor went away.
    async fn shutdown(&mut self) -> io::Result<ExitStatus> {
        if let Ok(Some(status)) = self.child.try_wait() {
            return Ok(status);
        }

        tracing::warn!(pid = ?self.pid, "Supervisor dropped with a live child, terminating");
        self.stop(StopSignal::Terminate);
        if let Ok(status) = timeout(self.terminate_timeout, self.child.wait()).await {
            // Members that outlived the shell still hold the group.
            if let Some(pid) = self.pid {
                let _ = self.job_control.kill(pid);
            }
            return status;
        }

        tracing::warn!(pid = ?self.pid, "Child ignored termination, killing");
        self.stop(StopSignal::Kill);
        match timeout(self.terminate_timeout, self.child.wait()).await {
            Ok(status) => status,
            Err(_) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "child did not exit after kill",
            )),
        }
    }

    /// Read what is left in both pipes after the child exited.
    ///
    /// Bounded by the drain timeout: a background job that inherited the
    /// pipes can keep them open long after the shell itself exited.
    async fn drain(&mut self, out_buf: &mut [u8], err_buf: &mut [u8]) {
        let deadline = Instant::now() + self.drain_timeout;

        while self.stdout.is_some() || self.stderr.is_some() {
            tokio::select! {
                read = read_chunk(&mut self.stdout, out_buf) => {
                    self.handle_read(OutputStream::Stdout, read, out_buf);
                }
                read = read_chunk(&mut self.stderr, err_buf) => {
                    self.handle_read(OutputStream::Stderr, read, err_buf);
                }
                () = sleep_until(deadline) => {
                    tracing::debug!(pid = ?self.pid, "Drain timeout, closing pipes");
                    break;
                }
            }
        }

        self.stdout = None;
        self.stderr = None;
    }

    fn finish(self, exit: ExitInfo) -> ExitInfo {
        self.shared.status().finish(exit);
        if self.shared.diagnostics() {
            tracing::info!(pid = ?self.pid, code = exit.code, kind = ?exit.kind, "Process finished");
        }
        self.shared.bus.emit(SupervisorEvent::Finished { exit });
        self.done_tx.send_replace(true);
        exit
    }
}

impl Driver {
    /// Poll `try_wait` on the current thread until the child exits or `limit` passes.
    fn reap_blocking(&mut self, limit: Duration) -> Option<ExitStatus> {
        let deadline = std::time::Instant::now() + limit;
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => return Some(status),
                Ok(None) if std::time::Instant::now() < deadline => std::thread::sleep(REAP_POLL),
                Ok(None) => return None,
                Err(e) => {
                    tracing::warn!(pid = ?self.pid, error = %e, "Failed to poll child");
                    return None;
                }
            }
        }
    }
}

/// Teardown for a run task dropped before the child finished, for example
/// when the runtime shuts down. Runs synchronously and blocks the dropping
/// thread for at most two terminate timeouts.
impl Drop for Driver {
    fn drop(&mut self) {
        if *self.done_tx.borrow() {
            return;
        }

        tracing::warn!(pid = ?self.pid, "Run dropped with a live child, terminating");
        self.stop(StopSignal::Terminate);
        let mut status = self.reap_blocking(self.terminate_timeout);

        // Members that outlived the shell still hold the group.
        if let Some(pid) = self.pid {
            let _ = self.job_control.kill(pid);
        }
        if status.is_none() {
            let _ = self.child.start_kill();
            status = self.reap_blocking(self.terminate_timeout);
        }

        let exit = status.map_or_else(|| ExitInfo::crashed(-1), ExitInfo::from_status);
        self.shared.status().finish(exit);
        self.shared.bus.emit(SupervisorEvent::Finished { exit });
        self.done_tx.send_replace(true);
    }
}

/// Read from an optional pipe; a closed pipe never becomes ready.
async fn read_chunk<R>(reader: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match reader.as_mut() {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}
