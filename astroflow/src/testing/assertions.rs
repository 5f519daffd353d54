//! Test assertions for pipeline runs and snapshots.

use crate::core::{PipelineRun, ResultSnapshot, RunStatus, SnapshotStatus, StageOutcome};
use crate::errors::StageErrorKind;

/// Asserts that the run finished successfully.
pub fn assert_run_succeeded(run: &PipelineRun) {
    assert_eq!(
        run.status(),
        RunStatus::Success,
        "Expected success, got {:?} with error {:?}",
        run.status(),
        run.final_error()
    );
}

/// Asserts that the run failed with the given error kind.
pub fn assert_run_failed_with(run: &PipelineRun, kind: StageErrorKind) {
    assert_eq!(
        run.status(),
        RunStatus::Failed,
        "Expected failure, got status: {:?}",
        run.status()
    );
    assert_eq!(
        run.final_error_kind(),
        Some(kind),
        "Expected error kind {kind}, got {:?}",
        run.final_error()
    );
}

/// Asserts the names of the stages that produced outcomes, in order.
pub fn assert_stage_trail(run: &PipelineRun, expected: &[&str]) {
    let actual: Vec<&str> = run
        .stage_outcomes()
        .iter()
        .map(StageOutcome::stage_name)
        .collect();
    assert_eq!(actual, expected, "Unexpected stage trail");
}

/// Asserts that a snapshot reports a failure of the given kind.
pub fn assert_snapshot_failed_with(snapshot: &ResultSnapshot, kind: StageErrorKind) {
    assert_eq!(
        snapshot.status,
        SnapshotStatus::Failed,
        "Expected failed snapshot, got {:?}",
        snapshot.status
    );
    assert_eq!(snapshot.error.as_deref(), Some(kind.as_str()));
}
