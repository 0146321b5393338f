//! Single-command process supervisor.
//!
//! [`ProcessSupervisor`] runs one shell command at a time. `run` does not
//! return until the child has terminated, but it only awaits: output
//! draining, progress ticks and fifo messages keep flowing while it is
//! pending, and the control methods can be awaited concurrently from the
//! same or another task.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::timeout;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;

use crate::config::SupervisorConfig;
use crate::fifo::FifoChannel;

use super::driver::{Control, Driver, StopSignal};
use super::error::SupervisorError;
use super::events::{EventBus, ExitInfo, OutputStream, SupervisorEvent};
use super::job_control::{platform_job_control, JobControl};
use super::options::RunOptions;
use super::sink::OutputSink;
use super::state::{RunStatus, SupervisorState};
use super::ticker::ProgressTicker;

/// Returned by [`ProcessSupervisor::run`] when a child is already live.
pub const ALREADY_RUNNING: i32 = -1;

/// Lock a mutex, recovering the data if a holder panicked.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the supervisor and its run driver.
#[derive(Debug)]
pub(crate) struct Shared {
    stdout: Mutex<OutputSink>,
    stderr: Mutex<OutputSink>,
    status: Mutex<RunStatus>,
    pub(crate) bus: EventBus,
    debug_level: AtomicU8,
}

impl Shared {
    fn new(bus: EventBus, debug_level: u8) -> Self {
        Self {
            stdout: Mutex::new(OutputSink::new(OutputStream::Stdout, bus.clone())),
            stderr: Mutex::new(OutputSink::new(OutputStream::Stderr, bus.clone())),
            status: Mutex::new(RunStatus::new()),
            bus,
            debug_level: AtomicU8::new(debug_level),
        }
    }

    pub(crate) fn sink(&self, stream: OutputStream) -> MutexGuard<'_, OutputSink> {
        match stream {
            OutputStream::Stdout => lock(&self.stdout),
            OutputStream::Stderr => lock(&self.stderr),
        }
    }

    pub(crate) fn status(&self) -> MutexGuard<'_, RunStatus> {
        lock(&self.status)
    }

    /// Whether lifecycle diagnostics should be logged.
    pub(crate) fn diagnostics(&self) -> bool {
        self.debug_level.load(Ordering::Relaxed) > 0
    }
}

/// Caller-side handle to the driver of one run.
#[derive(Debug, Clone)]
struct RunHandle {
    pid: Option<u32>,
    control: mpsc::UnboundedSender<Control>,
    done: watch::Receiver<bool>,
    stdin: Arc<tokio::sync::Mutex<Option<ChildStdin>>>,
    cancel: CancellationToken,
}

impl RunHandle {
    /// The child has not reached a terminal state.
    fn is_live(&self) -> bool {
        !*self.done.borrow() && !self.control.is_closed()
    }

    /// Send a request to the driver and wait for its answer.
    async fn request(&self, make: impl FnOnce(oneshot::Sender<bool>) -> Control) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.control.send(make(reply_tx)).is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Wait up to `limit` for the driver to record the exit.
    async fn wait_done(&self, limit: Duration) -> bool {
        let mut done = self.done.clone();
        let waited = timeout(limit, done.wait_for(|finished| *finished))
            .await
            .map(|changed| changed.is_ok());
        match waited {
            Ok(recorded) => recorded,
            Err(_) => !self.is_live(),
        }
    }
}

/// Supervises one external shell command at a time.
#[derive(Debug)]
pub struct ProcessSupervisor {
    config: SupervisorConfig,
    shared: Arc<Shared>,
    job_control: Arc<dyn JobControl>,
    run: Mutex<Option<RunHandle>>,
    fifo: Mutex<FifoChannel>,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self::new(SupervisorConfig::default())
    }
}

impl ProcessSupervisor {
    #[must_use]
    pub fn new(config: SupervisorConfig) -> Self {
        Self::with_job_control(config, platform_job_control())
    }

    /// Create a supervisor with a custom job control implementation.
    #[must_use]
    pub fn with_job_control(config: SupervisorConfig, job_control: Arc<dyn JobControl>) -> Self {
        let bus = EventBus::new(config.event_capacity);
        let shared = Arc::new(Shared::new(bus.clone(), config.debug_level));
        Self {
            config,
            shared,
            job_control,
            run: Mutex::new(None),
            fifo: Mutex::new(FifoChannel::new(bus)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Run `command` through the configured shell and wait for it to terminate.
    ///
    /// Returns the child's result code (see [`ExitInfo::result_code`]), or
    /// [`ALREADY_RUNNING`] without touching the in-flight run if a child is
    /// still live. `estimated` is reported with every progress tick.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError` if the shell cannot be spawned or the run
    /// driver fails.
    pub async fn run(
        &self,
        command: &str,
        options: RunOptions,
        estimated: u64,
    ) -> Result<i32, SupervisorError> {
        let driver = {
            let mut slot = lock(&self.run);
            if slot.as_ref().is_some_and(RunHandle::is_live) {
                if self.shared.diagnostics() {
                    tracing::info!("Process already running");
                }
                return Ok(ALREADY_RUNNING);
            }
            let (handle, driver) = self.spawn(command, options, estimated)?;
            *slot = Some(handle);
            driver
        };

        if !options.quiet {
            tracing::info!(command = %command, "Running command");
        }

        let exit = tokio::spawn(driver.run()).await?;

        if !options.quiet {
            tracing::info!(code = exit.code, kind = ?exit.kind, "Command exited");
        }
        Ok(exit.result_code())
    }

    /// Run `command` and return its trimmed standard output.
    ///
    /// If a child is already live the current buffer is returned unchanged.
    ///
    /// # Errors
    ///
    /// Returns `SupervisorError` if the shell cannot be spawned.
    pub async fn get_output_of(
        &self,
        command: &str,
        options: RunOptions,
        estimated: u64,
    ) -> Result<String, SupervisorError> {
        self.run(command, options, estimated).await?;
        Ok(self.get_output())
    }

    fn spawn(
        &self,
        command: &str,
        options: RunOptions,
        estimated: u64,
    ) -> Result<(RunHandle, Driver), SupervisorError> {
        self.shared.sink(OutputStream::Stdout).clear();
        self.shared.sink(OutputStream::Stderr).clear();

        let shell = &self.config.shell;
        let mut cmd = Command::new(shell);
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            tracing::error!(shell = %shell, error = %e, "Failed to spawn shell");
            SupervisorError::from_spawn(shell, e)
        })?;

        let pid = child.id();
        self.shared.status().begin(pid, estimated);

        let mut ticker = ProgressTicker::new(estimated);
        ticker.start(self.config.tick_interval(options.slow_tick));

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = watch::channel(false);
        let cancel = CancellationToken::new();
        let stdin = Arc::new(tokio::sync::Mutex::new(child.stdin.take()));

        let driver = Driver {
            pid,
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
            child,
            ticker,
            control_rx,
            done_tx,
            cancel: cancel.clone(),
            shared: Arc::clone(&self.shared),
            job_control: Arc::clone(&self.job_control),
            terminate_timeout: self.config.terminate_timeout(),
            drain_timeout: self.config.drain_timeout(),
        };
        let handle = RunHandle {
            pid,
            control: control_tx,
            done: done_rx,
            stdin,
            cancel,
        };

        if self.shared.diagnostics() {
            tracing::info!(pid = ?pid, "Process started");
        }
        self.shared.bus.emit(SupervisorEvent::Started { pid });

        Ok((handle, driver))
    }

    fn live_run(&self) -> Option<RunHandle> {
        lock(&self.run).as_ref().filter(|run| run.is_live()).cloned()
    }

    /// Request graceful shutdown and wait a bounded time for the child to exit.
    ///
    /// Returns `true` if no child is live or the child exited in time.
    pub async fn terminate(&self) -> bool {
        self.stop(StopSignal::Terminate).await
    }

    /// Force the child down and wait a bounded time for it to exit.
    ///
    /// Returns `true` if no child is live or the child exited in time.
    pub async fn kill(&self) -> bool {
        self.stop(StopSignal::Kill).await
    }

    async fn stop(&self, signal: StopSignal) -> bool {
        let Some(run) = self.live_run() else {
            return true;
        };
        if !run.request(|reply| Control::Stop(signal, reply)).await {
            return !run.is_live();
        }
        run.wait_done(self.config.terminate_timeout()).await
    }

    /// Terminate the child, falling back to kill if it does not exit in time.
    pub async fn shutdown(&self) -> bool {
        self.terminate().await || self.kill().await
    }

    /// Suspend the child and stop progress ticks.
    ///
    /// Returns `false` if no child is live or the stop signal failed.
    pub async fn pause(&self) -> bool {
        let Some(run) = self.live_run() else {
            if self.shared.diagnostics() {
                tracing::info!("Process not running");
            }
            return false;
        };
        run.request(Control::Pause).await
    }

    /// Continue a paused child and restart progress ticks.
    ///
    /// Returns `false` if no process id is known or the signal failed.
    pub async fn resume(&self) -> bool {
        let Some(run) = self.live_run() else {
            if self.shared.diagnostics() {
                tracing::info!("Process id not found");
            }
            return false;
        };
        run.request(Control::Resume).await
    }

    /// Write `text` to the child's standard input. Does nothing if no child is live.
    pub async fn write_to_proc(&self, text: &str) {
        let Some(run) = self.live_run() else {
            return;
        };
        let mut stdin = run.stdin.lock().await;
        let Some(pipe) = stdin.as_mut() else {
            return;
        };
        let written = async {
            pipe.write_all(text.as_bytes()).await?;
            pipe.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(pid = ?run.pid, error = %e, "Failed to write to process stdin");
        }
    }

    /// Close the child's standard input so it sees end of file.
    pub async fn close_stdin(&self) {
        if let Some(run) = self.live_run() {
            run.stdin.lock().await.take();
        }
    }

    /// Accumulated standard output, trimmed.
    #[must_use]
    pub fn get_output(&self) -> String {
        self.shared.sink(OutputStream::Stdout).text()
    }

    /// Accumulated standard error, trimmed.
    #[must_use]
    pub fn get_error(&self) -> String {
        self.shared.sink(OutputStream::Stderr).text()
    }

    /// True while the child has not reached a terminal state.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.live_run().is_some()
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.shared.status().state()
    }

    /// Process id of the live child.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.shared.status().pid()
    }

    #[must_use]
    pub fn elapsed_ticks(&self) -> u64 {
        self.shared.status().elapsed()
    }

    #[must_use]
    pub fn estimated_duration(&self) -> u64 {
        self.shared.status().estimated()
    }

    /// Exit snapshot of the last finished run.
    #[must_use]
    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.shared.status().exit()
    }

    /// Result code of the last finished run.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.exit_info().map(|exit| exit.result_code())
    }

    #[must_use]
    pub fn debug_level(&self) -> u8 {
        self.shared.debug_level.load(Ordering::Relaxed)
    }

    pub fn set_debug_level(&self, level: u8) {
        self.shared.debug_level.store(level, Ordering::Relaxed);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.shared.bus.subscribe()
    }

    #[must_use]
    pub fn events(&self) -> BroadcastStream<SupervisorEvent> {
        self.shared.bus.stream()
    }

    /// Connect the fifo side channel at `path`, creating the pipe if needed.
    pub fn connect_fifo(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match lock(&self.fifo).connect(path) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to connect fifo");
                false
            }
        }
    }

    pub fn disconnect_fifo(&self) {
        lock(&self.fifo).disconnect();
    }

    #[must_use]
    pub fn is_fifo_connected(&self) -> bool {
        lock(&self.fifo).is_open()
    }

    /// Write one line to the fifo. Failures are logged, never raised.
    pub fn write_to_fifo(&self, text: &str) {
        if let Err(e) = lock(&self.fifo).write(text) {
            tracing::warn!(error = %e, "Failed to write to fifo");
        }
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.disconnect_fifo();
        if let Some(run) = self.live_run() {
            tracing::warn!(pid = ?run.pid, "Supervisor dropped with a live child");
            run.cancel.cancel();
        }
    }
}
