//! Backfill pacing: how long to wait after a transient failure, and when to
//! give up.

use std::time::Duration;

/// Fixed pause used by the harvester between failed fetches.
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(6);

/// Stop after this many transient failures in a row.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// How the pause grows across consecutive failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Always wait `BackfillPolicy::pause`
    Fixed,
    /// Double the pause per consecutive failure, capped at `max`
    Exponential { max: Duration },
}

/// Caller-side policy for the backfill loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillPolicy {
    pub pause: Duration,
    pub backoff: Backoff,
    pub max_consecutive_failures: u32,
    /// Stop after this many records progressed. `None` = until drained.
    pub max_records: Option<usize>,
}

impl Default for BackfillPolicy {
    fn default() -> Self {
        Self {
            pause: DEFAULT_PAUSE,
            backoff: Backoff::Fixed,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            max_records: None,
        }
    }
}

impl BackfillPolicy {
    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max.max(1);
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = Some(max_records);
        self
    }

    /// Wait before the next attempt after `consecutive_failures` (>= 1)
    /// failures in a row.
    pub fn delay_for(&self, consecutive_failures: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.pause,
            Backoff::Exponential { max } => {
                let exponent = consecutive_failures.saturating_sub(1).min(16);
                self.pause.saturating_mul(1 << exponent).min(max)
            }
        }
    }
}

/// Why a backfill run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// No record is waiting for content
    Drained,
    /// `max_consecutive_failures` transient failures in a row
    TooManyFailures,
    /// `max_records` reached
    RecordLimit,
}

/// Totals for one backfill run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackfillSummary {
    pub populated: usize,
    pub gone: usize,
    pub transient_failures: usize,
    pub stopped: StopReason,
}

impl BackfillSummary {
    pub fn progressed(&self) -> usize {
        self.populated + self.gone
    }
}
