//! Core domain model types for astroflow.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage, run and snapshot status enums
//! - Observations and the typed payloads passed between stages
//! - The run record and its externally visible snapshot

mod observation;
mod payload;
mod run;
mod snapshot;
mod status;

pub use observation::Observation;
pub use payload::{
    Detection, DetectionBatch, Frame, HeaderValue, KeplerianElements, Metadata, OrbitEstimate,
    PixelGrid,
};
pub use run::{PipelineRun, StageOutcome, StagePayload};
pub use snapshot::{ResultSnapshot, StageSummary};
pub use status::{RunStatus, SnapshotStatus, StageStatus};
