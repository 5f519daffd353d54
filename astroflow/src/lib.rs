//! # Astroflow
//!
//! A scheduled observation-processing pipeline with a lock-light
//! latest-result store.
//!
//! On every tick the [`scheduler::Scheduler`] pulls an observation from an
//! [`source::ObservationSource`], runs it through four stages and publishes
//! the finalized run to a [`store::ResultStore`]:
//!
//! - **Stages**: ingest, calibrate, detect and estimate orbit, each a typed
//!   [`stages::Stage`] transform that either succeeds or fails with a
//!   [`errors::StageError`]
//! - **Runner**: strict stage order, first failure stops the run, panics and
//!   an optional watchdog are folded into the run's outcome
//! - **Store**: one writer, many readers, snapshots replaced by `Arc` swap
//! - **Query**: the latest snapshot as a typed value or a JSON record
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use astroflow::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), AstroflowError> {
//! let config = AstroflowConfig::default();
//! let store = Arc::new(ResultStore::new());
//! let handle = Scheduler::new(
//!     PipelineRunner::reference(&config)?,
//!     Arc::new(SyntheticObservationSource::new()),
//!     Arc::clone(&store),
//!     &config.scheduler,
//! )?
//! .start();
//!
//! let latest = QueryService::new(store).latest();
//! println!("{}", latest.status);
//! handle.shutdown("done").await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]

pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod preview;
pub mod query;
pub mod scheduler;
pub mod source;
pub mod stages;
pub mod store;
pub mod testing;

#[cfg(feature = "http")]
pub mod http;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{AstroflowConfig, SchedulerConfig};
    pub use crate::core::{
        Detection, DetectionBatch, Frame, Metadata, Observation, OrbitEstimate, PipelineRun,
        ResultSnapshot, RunStatus, SnapshotStatus, StageOutcome, StageStatus,
    };
    pub use crate::errors::{AstroflowError, StageError, StageErrorKind};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::pipeline::PipelineRunner;
    pub use crate::query::QueryService;
    pub use crate::scheduler::{Scheduler, SchedulerHandle, SchedulerState};
    pub use crate::source::{
        ObservationSource, QueuedObservationSource, SyntheticObservationSource,
    };
    pub use crate::stages::Stage;
    pub use crate::store::ResultStore;
}
