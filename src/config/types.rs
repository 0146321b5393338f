//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::process::DEFAULT_EVENT_CAPACITY;

/// Configuration for a process supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    /// Shell invoked as `<shell> -c <command>`.
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Progress tick period in milliseconds.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Progress tick period used with the `slowtick` option.
    #[serde(default = "default_slow_tick_interval_ms")]
    pub slow_tick_interval_ms: u64,
    /// How long terminate and kill wait for the child to exit.
    #[serde(default = "default_terminate_timeout_ms")]
    pub terminate_timeout_ms: u64,
    /// How long to keep reading output after the child exited.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,
    /// Capacity of the event channel per subscriber.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Lifecycle diagnostics are logged when above zero.
    #[serde(default)]
    pub debug_level: u8,
    /// Named pipe to connect on startup.
    #[serde(default)]
    pub fifo: Option<PathBuf>,
}

fn default_shell() -> String {
    "/bin/bash".to_string()
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_slow_tick_interval_ms() -> u64 {
    1000
}

fn default_terminate_timeout_ms() -> u64 {
    1000
}

fn default_drain_timeout_ms() -> u64 {
    500
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl SupervisorConfig {
    /// Tick period for a run.
    #[must_use]
    pub fn tick_interval(&self, slow: bool) -> Duration {
        let ms = if slow {
            self.slow_tick_interval_ms
        } else {
            self.tick_interval_ms
        };
        Duration::from_millis(ms)
    }

    #[must_use]
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            tick_interval_ms: default_tick_interval_ms(),
            slow_tick_interval_ms: default_slow_tick_interval_ms(),
            terminate_timeout_ms: default_terminate_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            event_capacity: default_event_capacity(),
            debug_level: 0,
            fifo: None,
        }
    }
}
