//! The externally visible projection of the latest finalized run.

use super::{Detection, OrbitEstimate, PipelineRun, RunStatus, SnapshotStatus, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-stage trail entry included in a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    /// Stage name.
    pub name: String,
    /// Stage status.
    pub status: StageStatus,
    /// Stage duration.
    pub duration_ms: f64,
    /// Error message if the stage failed.
    pub error: Option<String>,
}

/// Snapshot of the latest finalized run, as returned by the query surface.
///
/// A snapshot is always built from exactly one finalized run (or is the idle
/// placeholder) and is never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSnapshot {
    /// Outcome of the latest run.
    pub status: SnapshotStatus,
    /// Id of the processed observation.
    pub observation_id: Option<String>,
    /// Final path segment of the processed artifact.
    pub filename: Option<String>,
    /// Detections from the run.
    pub detections: Vec<Detection>,
    /// Orbit estimates from the run.
    pub orbital_elements: Vec<OrbitEstimate>,
    /// Encoded preview of the most processed frame.
    pub preview_image: Option<String>,
    /// Error kind name when the run failed.
    pub error: Option<String>,
    /// Human-readable error detail when the run failed.
    pub error_detail: Option<String>,
    /// Scheduler run number.
    pub sequence: u64,
    /// When the run was finalized.
    pub completed_at: Option<DateTime<Utc>>,
    /// Per-stage trail.
    pub stages: Vec<StageSummary>,
}

impl Default for ResultSnapshot {
    fn default() -> Self {
        Self::idle()
    }
}

impl ResultSnapshot {
    /// The snapshot served before any run has completed.
    #[must_use]
    pub fn idle() -> Self {
        Self {
            status: SnapshotStatus::Idle,
            observation_id: None,
            filename: None,
            detections: Vec::new(),
            orbital_elements: Vec::new(),
            preview_image: None,
            error: None,
            error_detail: None,
            sequence: 0,
            completed_at: None,
            stages: Vec::new(),
        }
    }

    /// Projects a finalized run.
    ///
    /// Returns `None` for a run that is still pending.
    #[must_use]
    pub fn from_run(run: &PipelineRun, preview_image: Option<String>) -> Option<Self> {
        let status = match run.status() {
            RunStatus::Pending => return None,
            RunStatus::Success => SnapshotStatus::Success,
            RunStatus::Failed => SnapshotStatus::Failed,
        };

        let stages = run
            .stage_outcomes()
            .iter()
            .map(|outcome| StageSummary {
                name: outcome.stage_name().to_string(),
                status: outcome.status(),
                duration_ms: outcome.duration_ms(),
                error: outcome.error().map(|e| e.message.clone()),
            })
            .collect();

        Some(Self {
            status,
            observation_id: Some(run.observation.id.clone()),
            filename: Some(run.observation.filename().to_string()),
            detections: run.detections().to_vec(),
            orbital_elements: run.orbits().to_vec(),
            preview_image,
            error: run.final_error_kind().map(|k| k.as_str().to_string()),
            error_detail: run.final_error().map(|e| e.message.clone()),
            sequence: run.sequence,
            completed_at: run.finished_at(),
            stages,
        })
    }

    /// Returns true for the placeholder served before the first run.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.status == SnapshotStatus::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DetectionBatch, Metadata, Observation, StageOutcome};
    use crate::errors::StageError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_idle_snapshot() {
        let snapshot = ResultSnapshot::idle();
        assert!(snapshot.is_idle());
        assert!(snapshot.detections.is_empty());
        assert!(snapshot.orbital_elements.is_empty());
        assert!(snapshot.error.is_none());
        assert_eq!(snapshot, ResultSnapshot::default());
    }

    #[test]
    fn test_pending_run_not_projected() {
        let run = PipelineRun::new(Observation::new("obs-1", "synthetic://1"));
        assert!(ResultSnapshot::from_run(&run, None).is_none());
    }

    #[test]
    fn test_failed_run_projection() {
        let mut run = PipelineRun::new(Observation::new("obs-9", "/data/frame_9.fits")).with_sequence(9);
        run.record(StageOutcome::success(
            "detect",
            DetectionBatch::new(vec![Detection::new(3, 4, 0.8)], Metadata::new()).into(),
            2.0,
        ));
        let error = StageError::computation("singular matrix");
        run.record(StageOutcome::failed("estimate_orbit", error.clone(), 1.0));
        run.finish_failed(error);

        let snapshot = ResultSnapshot::from_run(&run, None).unwrap();
        assert_eq!(snapshot.status, SnapshotStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("ComputationError"));
        assert_eq!(snapshot.error_detail.as_deref(), Some("singular matrix"));
        assert_eq!(snapshot.filename.as_deref(), Some("frame_9.fits"));
        assert_eq!(snapshot.detections, vec![Detection::new(3, 4, 0.8)]);
        assert!(snapshot.orbital_elements.is_empty());
        assert_eq!(snapshot.sequence, 9);
        assert_eq!(snapshot.stages.len(), 2);
        assert_eq!(snapshot.stages[1].status, StageStatus::Failed);
    }

    #[test]
    fn test_wire_field_names() {
        let json = serde_json::to_value(ResultSnapshot::idle()).unwrap();
        assert_eq!(json["status"], "idle");
        assert!(json["detections"].as_array().unwrap().is_empty());
        assert!(json["orbitalElements"].as_array().unwrap().is_empty());
        assert!(json["previewImage"].is_null());
        assert!(json["error"].is_null());
        assert!(json.get("observationId").is_some());
    }
}
