//! Supervisor state tracking.

use serde::{Deserialize, Serialize};

use super::events::ExitInfo;

/// Lifecycle state of a supervisor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupervisorState {
    #[default]
    Idle,
    Running,
    Paused,
    Finished,
}

/// Mutable status of the current or last run.
#[derive(Debug, Clone, Default)]
pub struct RunStatus {
    state: SupervisorState,
    pid: Option<u32>,
    elapsed: u64,
    estimated: u64,
    exit: Option<ExitInfo>,
}

impl RunStatus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> SupervisorState {
        self.state
    }

    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    #[must_use]
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    #[must_use]
    pub fn estimated(&self) -> u64 {
        self.estimated
    }

    #[must_use]
    pub fn exit(&self) -> Option<ExitInfo> {
        self.exit
    }

    /// Reset counters for a new run.
    pub fn begin(&mut self, pid: Option<u32>, estimated: u64) {
        self.pid = pid;
        self.elapsed = 0;
        self.estimated = estimated;
        self.exit = None;
        self.transition(SupervisorState::Running);
    }

    pub fn set_elapsed(&mut self, elapsed: u64) {
        self.elapsed = elapsed;
    }

    /// Mark the child as paused. Only valid while running.
    pub fn mark_paused(&mut self) -> bool {
        if self.state != SupervisorState::Running {
            return false;
        }
        self.transition(SupervisorState::Paused);
        true
    }

    /// Mark the child as running again after a pause.
    pub fn mark_resumed(&mut self) {
        if self.state == SupervisorState::Paused {
            self.transition(SupervisorState::Running);
        }
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state == SupervisorState::Paused
    }

    /// Record the exit snapshot. Only the first call per run takes effect.
    pub fn finish(&mut self, exit: ExitInfo) -> bool {
        if self.exit.is_some() {
            return false;
        }
        self.exit = Some(exit);
        self.pid = None;
        self.transition(SupervisorState::Finished);
        true
    }

    fn transition(&mut self, new_state: SupervisorState) {
        tracing::debug!(from = ?self.state, to = ?new_state, "State transition");
        self.state = new_state;
    }
}
