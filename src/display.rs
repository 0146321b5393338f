//! Colored CLI display utilities for supervisor output.
//!
//! Child output is passed through untouched (stdout to stdout, stderr to
//! stderr); everything the supervisor adds goes to stderr so it never mixes
//! with the command's own standard output.

use std::io::{self, IsTerminal, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::process::{ExitInfo, ExitKind, OutputStream, SupervisorEvent};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Truncate a string to a maximum length, adding ellipsis if truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let kept: String = s.chars().take(max_len - 3).collect();
        format!("{kept}...")
    }
}

/// Format a progress tick as `elapsed/estimated (percent)`.
#[must_use]
pub fn format_progress(elapsed: u64, estimated: u64) -> String {
    if estimated == 0 {
        return format!("{elapsed}");
    }
    let percent = (elapsed.saturating_mul(100) / estimated).min(100);
    format!("{elapsed}/{estimated} ({percent}%)")
}

/// Describe an exit snapshot.
#[must_use]
pub fn format_exit(exit: &ExitInfo) -> String {
    match exit.kind {
        ExitKind::NormalExit => format!("exit code {}", exit.code),
        ExitKind::CrashExit => format!("crashed (signal {})", exit.code),
    }
}

/// Print the command about to run.
pub fn print_command(command: &str) {
    eprintln!(
        "{} {} {}",
        timestamp().dimmed(),
        "[RUN]".blue().bold(),
        truncate(command, 200).cyan()
    );
}

/// Print process start.
pub fn print_started(pid: Option<u32>) {
    eprintln!(
        "{} {} pid={}",
        timestamp().dimmed(),
        "[STARTED]".blue().bold(),
        pid.map_or_else(|| "?".to_string(), |p| p.to_string())
    );
}

/// Pass a chunk of child output through to the matching terminal stream.
pub fn print_output(stream: OutputStream, chunk: &[u8]) {
    match stream {
        OutputStream::Stdout => {
            let mut out = io::stdout().lock();
            let _ = out.write_all(chunk);
            let _ = out.flush();
        }
        OutputStream::Stderr => {
            let mut err = io::stderr().lock();
            let _ = err.write_all(chunk);
            let _ = err.flush();
        }
    }
}

/// Print a message received on the fifo.
pub fn print_fifo_message(message: &str) {
    eprintln!(
        "{} {} {}",
        timestamp().dimmed(),
        "[FIFO]".magenta().bold(),
        message
    );
}

/// Print a progress tick. Only rendered on an interactive stderr.
pub fn print_progress(elapsed: u64, estimated: u64) {
    let mut err = io::stderr();
    if !err.is_terminal() {
        return;
    }
    let _ = write!(
        err,
        "\r{} {}",
        "[PROGRESS]".yellow().bold(),
        format_progress(elapsed, estimated)
    );
    let _ = err.flush();
}

/// Print the final exit status.
pub fn print_finished(exit: &ExitInfo) {
    let label = if exit.is_success() {
        "[FINISHED]".green().bold().to_string()
    } else {
        "[FINISHED]".red().bold().to_string()
    };
    eprintln!("{} {} {}", timestamp().dimmed(), label, format_exit(exit));
}

/// Print an error message.
pub fn print_error(message: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message);
}

/// Print an event as one JSON line on stdout.
pub fn print_json_event(event: &SupervisorEvent) {
    match serde_json::to_string(event) {
        Ok(line) => {
            let mut out = io::stdout().lock();
            let _ = writeln!(out, "{line}");
            let _ = out.flush();
        }
        Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
    }
}

/// Render one supervisor event.
pub fn print_event(event: &SupervisorEvent, json: bool) {
    if json {
        print_json_event(event);
        return;
    }
    match event {
        SupervisorEvent::Started { pid } => print_started(*pid),
        SupervisorEvent::Output { stream, chunk } => print_output(*stream, chunk),
        SupervisorEvent::FifoMessage { message } => print_fifo_message(message),
        SupervisorEvent::Progress { elapsed, estimated } => print_progress(*elapsed, *estimated),
        SupervisorEvent::Finished { exit } => print_finished(exit),
    }
}
