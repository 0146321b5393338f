//! Restartable periodic progress timer.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

/// Default tick period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// One ticker firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub elapsed: u64,
    pub estimated: u64,
}

/// Periodic timer that counts firings while armed.
///
/// A disarmed ticker never fires; [`tick`](Self::tick) then pends forever,
/// which lets it sit in a `select!` next to other event sources.
#[derive(Debug)]
pub struct ProgressTicker {
    period: Duration,
    timer: Option<Interval>,
    elapsed: u64,
    estimated: u64,
}

impl ProgressTicker {
    /// Create a disarmed ticker reporting `estimated` as the target.
    #[must_use]
    pub fn new(estimated: u64) -> Self {
        Self {
            period: DEFAULT_TICK_INTERVAL,
            timer: None,
            elapsed: 0,
            estimated,
        }
    }

    /// Arm the ticker with the given period. The first firing is one period away.
    pub fn start(&mut self, period: Duration) {
        let period = period.max(Duration::from_millis(1));
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.period = period;
        self.timer = Some(timer);
    }

    /// Re-arm with the last period. No-op while armed.
    pub fn restart(&mut self) {
        if self.timer.is_none() {
            self.start(self.period);
        }
    }

    pub fn stop(&mut self) {
        self.timer = None;
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.timer.is_some()
    }

    #[must_use]
    pub fn period(&self) -> Duration {
        self.period
    }

    #[must_use]
    pub fn elapsed(&self) -> u64 {
        self.elapsed
    }

    #[must_use]
    pub fn estimated(&self) -> u64 {
        self.estimated
    }

    /// Reset the counter and the reported target.
    pub fn reset(&mut self, estimated: u64) {
        self.elapsed = 0;
        self.estimated = estimated;
    }

    /// Wait for the next firing.
    ///
    /// Cancel safe: the counter only advances when the returned future completes.
    pub async fn tick(&mut self) -> Progress {
        match self.timer.as_mut() {
            Some(timer) => {
                timer.tick().await;
                self.elapsed = self.elapsed.saturating_add(1);
                Progress {
                    elapsed: self.elapsed,
                    estimated: self.estimated,
                }
            }
            None => std::future::pending().await,
        }
    }
}
