//! Observability utilities.

mod tracing;

pub use tracing::{init_tracing, RunSpanAttributes, SpanTimer};
