//! Scheduler counters.

use crate::core::RunStatus;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters updated by the scheduler loop.
#[derive(Debug, Default)]
pub struct SchedulerStats {
    ticks: AtomicU64,
    dropped_ticks: AtomicU64,
    idle_ticks: AtomicU64,
    runs_started: AtomicU64,
    runs_succeeded: AtomicU64,
    runs_failed: AtomicU64,
}

impl SchedulerStats {
    /// Records a tick, whatever happened on it.
    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a tick that was dropped.
    pub fn record_dropped(&self) {
        self.dropped_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a tick on which the source had nothing.
    pub fn record_idle(&self) {
        self.idle_ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a run start.
    pub fn record_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a run end.
    pub fn record_finished(&self, status: RunStatus) {
        match status {
            RunStatus::Success => self.runs_succeeded.fetch_add(1, Ordering::Relaxed),
            RunStatus::Failed | RunStatus::Pending => {
                self.runs_failed.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    /// Returns a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            dropped_ticks: self.dropped_ticks.load(Ordering::Relaxed),
            idle_ticks: self.idle_ticks.load(Ordering::Relaxed),
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_succeeded: self.runs_succeeded.load(Ordering::Relaxed),
            runs_failed: self.runs_failed.load(Ordering::Relaxed),
        }
    }
}

/// A copy of [`SchedulerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatsSnapshot {
    /// Ticks observed.
    pub ticks: u64,
    /// Ticks dropped because a run was in flight or cooling down.
    pub dropped_ticks: u64,
    /// Ticks with no observation available.
    pub idle_ticks: u64,
    /// Runs started.
    pub runs_started: u64,
    /// Runs that finished successfully.
    pub runs_succeeded: u64,
    /// Runs that finished failed.
    pub runs_failed: u64,
}

impl SchedulerStatsSnapshot {
    /// Runs that have finished either way.
    #[must_use]
    pub fn runs_finished(&self) -> u64 {
        self.runs_succeeded + self.runs_failed
    }
}
