//! Process supervision: spawning, output capture, progress and job control.

mod driver;
mod error;
mod events;
mod job_control;
mod options;
mod sink;
mod state;
mod supervisor;
mod ticker;

pub use error::{JobControlError, SupervisorError};
pub use events::{
    EventBus, ExitInfo, ExitKind, OutputStream, SupervisorEvent, DEFAULT_EVENT_CAPACITY,
};
#[cfg(unix)]
pub use job_control::ProcessGroupSignals;
pub use job_control::{platform_job_control, JobControl, UnsupportedJobControl};
pub use options::{join_command, RunOptions};
pub use sink::OutputSink;
pub use state::{RunStatus, SupervisorState};
pub use supervisor::{ProcessSupervisor, ALREADY_RUNNING};
pub use ticker::{Progress, ProgressTicker, DEFAULT_TICK_INTERVAL};
