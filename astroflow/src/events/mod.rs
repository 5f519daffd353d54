//! Pipeline event stream for observability and instrumentation.
//!
//! The scheduler and the runner report what they do as [`PipelineEvent`]s
//! through an [`EventSink`]. The default sink mirrors events into the log.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::core::RunStatus;
use crate::errors::StageErrorKind;
use serde::Serialize;

/// Why a tick did not start a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TickDropReason {
    /// The previous run is still executing.
    RunInFlight,
    /// The post-run cooldown has not elapsed.
    Cooldown,
}

/// Something observable that happened in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// A tick was dropped.
    TickDropped {
        /// Why it was dropped.
        reason: TickDropReason,
    },
    /// A tick found no observation to process.
    TickIdle,
    /// A run began executing.
    RunStarted {
        /// Scheduler run number.
        sequence: u64,
        /// Run id.
        run_id: String,
        /// Observation id.
        observation_id: String,
    },
    /// A stage succeeded.
    StageCompleted {
        /// Run id.
        run_id: String,
        /// Stage name.
        stage: String,
        /// Stage duration.
        duration_ms: f64,
        /// Payload summary.
        payload: serde_json::Value,
    },
    /// A stage failed.
    StageFailed {
        /// Run id.
        run_id: String,
        /// Stage name.
        stage: String,
        /// Failure kind.
        kind: StageErrorKind,
        /// Failure detail.
        message: String,
        /// Stage duration.
        duration_ms: f64,
    },
    /// A run was finalized.
    RunFinished {
        /// Scheduler run number.
        sequence: u64,
        /// Run id.
        run_id: String,
        /// Final status.
        status: RunStatus,
        /// Failure kind, if the run failed.
        error: Option<StageErrorKind>,
        /// Run duration.
        duration_ms: f64,
    },
    /// The scheduler loop exited.
    SchedulerStopped {
        /// Stop reason, if one was given.
        reason: Option<String>,
    },
}

impl PipelineEvent {
    /// Dotted event name, e.g. `run.started`.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TickDropped { .. } => "tick.dropped",
            Self::TickIdle => "tick.idle",
            Self::RunStarted { .. } => "run.started",
            Self::StageCompleted { .. } => "stage.completed",
            Self::StageFailed { .. } => "stage.failed",
            Self::RunFinished { .. } => "run.finished",
            Self::SchedulerStopped { .. } => "scheduler.stopped",
        }
    }
}
