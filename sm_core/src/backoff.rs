//! Crash-loop backoff for the process supervisor.

use std::time::Duration;

/// Delay before the first restart after a quick exit.
pub const BACKOFF_FLOOR: Duration = Duration::from_secs(1);
/// Upper bound on the delay between restarts.
pub const BACKOFF_CAP: Duration = Duration::from_secs(60);
/// A child that stays up at least this long is considered healthy.
pub const MIN_UPTIME: Duration = Duration::from_secs(5);

/// Tracks consecutive quick exits of a supervised child.
///
/// Quick exits double the wait before the next spawn, up to [`BACKOFF_CAP`].
/// A run that reaches [`MIN_UPTIME`] resets both the delay and the failure
/// counter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Backoff {
    floor: Duration,
    cap: Duration,
    min_uptime: Duration,
    delay: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new() -> Self {
        Self::with_limits(BACKOFF_FLOOR, BACKOFF_CAP, MIN_UPTIME)
    }

    pub fn with_limits(floor: Duration, cap: Duration, min_uptime: Duration) -> Self {
        Self {
            floor,
            cap,
            min_uptime,
            delay: floor,
            failures: 0,
        }
    }

    /// Record one finished run and return how long to wait before respawning.
    ///
    /// `None` means the run was long enough to respawn right away.
    pub fn record_exit(&mut self, uptime: Duration) -> Option<Duration> {
        if uptime >= self.min_uptime {
            self.delay = self.floor;
            self.failures = 0;
            return None;
        }

        self.failures += 1;
        let wait = self.delay;
        self.delay = (self.delay * 2).min(self.cap);
        Some(wait)
    }

    /// Consecutive quick exits since the last healthy run.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The wait that the next quick exit will incur.
    pub fn next_delay(&self) -> Duration {
        self.delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}
