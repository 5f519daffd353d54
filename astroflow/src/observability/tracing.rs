//! Tracing setup and span helpers for pipeline runs.

use crate::config::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{field, info_span, Span};
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set. Returns `false` if a
/// subscriber was already installed, which is expected in tests.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}

/// Span attributes attached to a pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSpanAttributes {
    /// Run id.
    pub run_id: Option<String>,
    /// Scheduler run number.
    pub sequence: Option<u64>,
    /// Observation id.
    pub observation_id: Option<String>,
    /// Final status.
    pub status: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
    /// Failure kind if the run failed.
    pub error: Option<String>,
}

impl RunSpanAttributes {
    /// Creates empty attributes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the run id.
    #[must_use]
    pub fn with_run_id(mut self, id: impl Into<String>) -> Self {
        self.run_id = Some(id.into());
        self
    }

    /// Sets the scheduler run number.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Sets the observation id.
    #[must_use]
    pub fn with_observation_id(mut self, id: impl Into<String>) -> Self {
        self.observation_id = Some(id.into());
        self
    }

    /// Sets the final status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: f64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    /// Sets the failure kind.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Opens the `pipeline.run` span with the identity fields filled in.
    ///
    /// Status, duration and error stay empty until
    /// [`RunSpanAttributes::record`] is called on the finished run.
    #[must_use]
    pub fn span(&self) -> Span {
        info_span!(
            "pipeline.run",
            run.id = self.run_id.as_deref(),
            run.sequence = self.sequence,
            observation.id = self.observation_id.as_deref(),
            run.status = field::Empty,
            run.duration_ms = field::Empty,
            run.error = field::Empty,
        )
    }

    /// Records the outcome fields that are set onto `span`.
    pub fn record(&self, span: &Span) {
        if let Some(ref v) = self.status {
            span.record("run.status", v.as_str());
        }
        if let Some(v) = self.duration_ms {
            span.record("run.duration_ms", v);
        }
        if let Some(ref v) = self.error {
            span.record("run.error", v.as_str());
        }
    }
}

/// Simple span timing helper.
#[derive(Debug)]
pub struct SpanTimer {
    start: Instant,
    name: String,
}

impl SpanTimer {
    /// Starts a new span timer.
    #[must_use]
    pub fn start(name: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            name: name.into(),
        }
    }

    /// Returns the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Returns the span name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Finishes the span and returns the duration.
    #[must_use]
    pub fn finish(self) -> f64 {
        self.elapsed_ms()
    }
}
