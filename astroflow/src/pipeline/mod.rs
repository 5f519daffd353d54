//! Pipeline execution.
//!
//! [`PipelineRunner`] drives one observation through the four stages and
//! produces a finalized [`crate::core::PipelineRun`].

mod runner;

pub use runner::PipelineRunner;
