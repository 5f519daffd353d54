//! Per-stage outcomes and the record of a whole pipeline run.

use super::{Detection, DetectionBatch, Frame, Observation, OrbitEstimate, RunStatus, StageStatus};
use crate::errors::{StageError, StageErrorKind};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// The successful output of a stage, kept for diagnostics and projection.
#[derive(Debug, Clone, PartialEq)]
pub enum StagePayload {
    /// Output of ingest or calibration.
    Frame(Frame),
    /// Output of detection.
    Detections(DetectionBatch),
    /// Output of orbit estimation.
    Orbits(Vec<OrbitEstimate>),
}

impl StagePayload {
    /// A compact description suitable for events and logs.
    #[must_use]
    pub fn summary(&self) -> serde_json::Value {
        match self {
            Self::Frame(frame) => serde_json::json!({
                "kind": "frame",
                "width": frame.pixels.width(),
                "height": frame.pixels.height(),
                "header_cards": frame.metadata.len(),
            }),
            Self::Detections(batch) => serde_json::json!({
                "kind": "detections",
                "count": batch.detections.len(),
            }),
            Self::Orbits(orbits) => serde_json::json!({
                "kind": "orbits",
                "count": orbits.len(),
            }),
        }
    }
}

impl From<Frame> for StagePayload {
    fn from(frame: Frame) -> Self {
        Self::Frame(frame)
    }
}

impl From<DetectionBatch> for StagePayload {
    fn from(batch: DetectionBatch) -> Self {
        Self::Detections(batch)
    }
}

impl From<Vec<OrbitEstimate>> for StagePayload {
    fn from(orbits: Vec<OrbitEstimate>) -> Self {
        Self::Orbits(orbits)
    }
}

/// The recorded result of one executed stage. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    stage_name: String,
    status: StageStatus,
    payload: Option<StagePayload>,
    error: Option<StageError>,
    duration_ms: f64,
}

impl StageOutcome {
    /// Records a successful stage.
    #[must_use]
    pub fn success(stage_name: impl Into<String>, payload: StagePayload, duration_ms: f64) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Success,
            payload: Some(payload),
            error: None,
            duration_ms,
        }
    }

    /// Records a failed stage.
    #[must_use]
    pub fn failed(stage_name: impl Into<String>, error: StageError, duration_ms: f64) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Failed,
            payload: None,
            error: Some(error),
            duration_ms,
        }
    }

    /// Name of the stage.
    #[must_use]
    pub fn stage_name(&self) -> &str {
        &self.stage_name
    }

    /// Stage status.
    #[must_use]
    pub fn status(&self) -> StageStatus {
        self.status
    }

    /// Payload of a successful stage.
    #[must_use]
    pub fn payload(&self) -> Option<&StagePayload> {
        self.payload.as_ref()
    }

    /// Error of a failed stage.
    #[must_use]
    pub fn error(&self) -> Option<&StageError> {
        self.error.as_ref()
    }

    /// Wall-clock duration of the stage.
    #[must_use]
    pub fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// Returns true if the stage succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StageStatus::Success
    }
}

/// Full record of one observation's trip through the pipeline.
///
/// A run starts `Pending`, is mutated only by the runner executing it and is
/// finalized exactly once. Afterwards it is moved into the result store.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Scheduler-assigned run number, zero for ad-hoc runs.
    pub sequence: u64,
    /// The observation being processed.
    pub observation: Observation,
    /// When execution began.
    pub started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    stage_outcomes: Vec<StageOutcome>,
    status: RunStatus,
    final_error: Option<StageError>,
}

impl PipelineRun {
    /// Starts a pending run for `observation`.
    #[must_use]
    pub fn new(observation: Observation) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            sequence: 0,
            observation,
            started_at: Utc::now(),
            finished_at: None,
            stage_outcomes: Vec::new(),
            status: RunStatus::Pending,
            final_error: None,
        }
    }

    /// Sets the scheduler run number.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Appends a stage outcome. Ignored once the run is finalized.
    pub(crate) fn record(&mut self, outcome: StageOutcome) {
        if self.status.is_terminal() {
            tracing::warn!(
                run_id = %self.run_id,
                stage = outcome.stage_name(),
                "Ignoring stage outcome recorded after finalization"
            );
            return;
        }
        self.stage_outcomes.push(outcome);
    }

    /// Finalizes the run as successful. Returns false if already finalized.
    pub(crate) fn finish_success(&mut self) -> bool {
        self.finalize(RunStatus::Success, None)
    }

    /// Finalizes the run as failed. Returns false if already finalized.
    pub(crate) fn finish_failed(&mut self, error: StageError) -> bool {
        self.finalize(RunStatus::Failed, Some(error))
    }

    fn finalize(&mut self, status: RunStatus, error: Option<StageError>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = status;
        self.final_error = error;
        self.finished_at = Some(Utc::now());
        true
    }

    /// Overall status.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Returns true once the run reached `Success` or `Failed`.
    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.status.is_terminal()
    }

    /// Stage outcomes in execution order.
    #[must_use]
    pub fn stage_outcomes(&self) -> &[StageOutcome] {
        &self.stage_outcomes
    }

    /// The error that failed the run.
    #[must_use]
    pub fn final_error(&self) -> Option<&StageError> {
        self.final_error.as_ref()
    }

    /// Kind of the error that failed the run.
    #[must_use]
    pub fn final_error_kind(&self) -> Option<StageErrorKind> {
        self.final_error.as_ref().map(|e| e.kind)
    }

    /// When the run was finalized.
    #[must_use]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Duration between start and finalization.
    #[must_use]
    pub fn duration_ms(&self) -> Option<f64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0)
    }

    /// The most processed frame produced by the run, if any.
    #[must_use]
    pub fn latest_frame(&self) -> Option<&Frame> {
        self.payloads().rev().find_map(|p| match p {
            StagePayload::Frame(frame) => Some(frame),
            _ => None,
        })
    }

    /// Detections produced by the run, empty if detection never succeeded.
    #[must_use]
    pub fn detections(&self) -> &[Detection] {
        self.payloads()
            .find_map(|p| match p {
                StagePayload::Detections(batch) => Some(batch.detections.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    /// Orbit estimates produced by the run, empty if estimation never succeeded.
    #[must_use]
    pub fn orbits(&self) -> &[OrbitEstimate] {
        self.payloads()
            .find_map(|p| match p {
                StagePayload::Orbits(orbits) => Some(orbits.as_slice()),
                _ => None,
            })
            .unwrap_or(&[])
    }

    fn payloads(&self) -> impl DoubleEndedIterator<Item = &StagePayload> + '_ {
        self.stage_outcomes.iter().filter_map(StageOutcome::payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Metadata, PixelGrid};

    fn frame() -> Frame {
        Frame::new(PixelGrid::filled(4, 4, 1.0).unwrap(), Metadata::new())
    }

    #[test]
    fn test_new_run_is_pending() {
        let run = PipelineRun::new(Observation::new("obs-1", "synthetic://1"));
        assert_eq!(run.status(), RunStatus::Pending);
        assert!(!run.is_finalized());
        assert!(run.finished_at().is_none());
        assert!(run.stage_outcomes().is_empty());
    }

    #[test]
    fn test_finalize_exactly_once() {
        let mut run = PipelineRun::new(Observation::new("obs-1", "synthetic://1"));
        assert!(run.finish_failed(StageError::not_found("gone")));
        assert!(!run.finish_success());

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.final_error_kind(), Some(StageErrorKind::NotFound));
        assert!(run.duration_ms().is_some());
    }

    #[test]
    fn test_outcomes_ignored_after_finalize() {
        let mut run = PipelineRun::new(Observation::new("obs-1", "synthetic://1"));
        run.record(StageOutcome::success("ingest", frame().into(), 1.0));
        run.finish_success();
        run.record(StageOutcome::success("calibrate", frame().into(), 1.0));

        assert_eq!(run.stage_outcomes().len(), 1);
    }

    #[test]
    fn test_payload_accessors() {
        let mut run = PipelineRun::new(Observation::new("obs-1", "synthetic://1"));
        run.record(StageOutcome::success("ingest", frame().into(), 1.0));
        run.record(StageOutcome::success(
            "detect",
            DetectionBatch::new(vec![Detection::new(1, 2, 0.5)], Metadata::new()).into(),
            1.0,
        ));
        run.record(StageOutcome::failed(
            "estimate_orbit",
            StageError::computation("diverged"),
            1.0,
        ));

        assert!(run.latest_frame().is_some());
        assert_eq!(run.detections().len(), 1);
        assert!(run.orbits().is_empty());
    }

    #[test]
    fn test_payload_summary() {
        let summary = StagePayload::from(frame()).summary();
        assert_eq!(summary["kind"], "frame");
        assert_eq!(summary["width"], 4);

        let summary = StagePayload::from(Vec::<OrbitEstimate>::new()).summary();
        assert_eq!(summary["count"], 0);
    }
}
