//! Testing utilities for astroflow pipelines.
//!
//! This module provides:
//! - Mock and wrapper stages (failing, panicking, slow, gated, counting)
//! - Assertions over finalized runs and snapshots
//! - Fixtures for small, fast configurations

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_run_failed_with, assert_run_succeeded, assert_snapshot_failed_with,
    assert_stage_trail,
};
pub use fixtures::{fast_config, sample_frame, synthetic_observation, wait_until, TestPipeline};
pub use mocks::{
    CountingStage, FailingStage, FixedStage, GatedStage, PanickingStage, SlowStage, StageGate,
};
