//! Test fixtures for pipeline testing.

use std::sync::Arc;

use crate::config::AstroflowConfig;
use crate::errors::AstroflowError;
use crate::core::{Frame, Metadata, Observation, PixelGrid};
use crate::events::{CollectingEventSink, EventSink};
use crate::pipeline::PipelineRunner;
use crate::source::QueuedObservationSource;
use crate::stages::SYNTHETIC_SCHEME;

/// A configuration with a small frame and a short tick, suitable for tests.
#[must_use]
pub fn fast_config() -> AstroflowConfig {
    let mut config = AstroflowConfig::new().with_tick_interval(0.02);
    config.synthetic.width = 32;
    config.synthetic.height = 32;
    config
}

/// An observation pointing at the synthetic artifact `n`.
#[must_use]
pub fn synthetic_observation(n: u64) -> Observation {
    Observation::new(format!("obs-{n:06}"), format!("{SYNTHETIC_SCHEME}{n}"))
}

/// A 16x16 frame with one bright pixel at (8, 8) and a WCS-free header.
///
/// # Panics
///
/// Never in practice; the grid size is fixed.
#[must_use]
#[allow(clippy::expect_used)]
pub fn sample_frame() -> Frame {
    let mut data = vec![10.0_f32; 16 * 16];
    for (i, v) in data.iter_mut().enumerate() {
        *v += (i % 5) as f32 * 0.2;
    }
    data[8 * 16 + 8] = 400.0;
    let pixels = PixelGrid::new(16, 16, data).expect("16x16 grid matches its data");
    Frame::new(
        pixels,
        Metadata::new().with("DATE", "2025-07-03T12:00:00"),
    )
}

/// A reference runner wired to a collecting sink and a queued source.
#[derive(Debug)]
pub struct TestPipeline {
    /// The configuration used.
    pub config: AstroflowConfig,
    /// The runner.
    pub runner: PipelineRunner,
    /// Events emitted by the runner.
    pub events: Arc<CollectingEventSink>,
    /// Observations to hand out.
    pub source: Arc<QueuedObservationSource>,
}

impl TestPipeline {
    /// Builds the fixture from [`fast_config`].
    ///
    /// # Errors
    ///
    /// See [`TestPipeline::with_config`].
    pub fn new() -> Result<Self, AstroflowError> {
        Self::with_config(fast_config())
    }

    /// Builds the fixture from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`AstroflowError::Config`] if `config` does not validate.
    pub fn with_config(config: AstroflowConfig) -> Result<Self, AstroflowError> {
        config.validate()?;
        let events = Arc::new(CollectingEventSink::new());
        let sink: Arc<dyn EventSink> = events.clone();
        let runner = PipelineRunner::reference(&config)?.with_event_sink(sink);
        Ok(Self {
            config,
            runner,
            events,
            source: Arc::new(QueuedObservationSource::new()),
        })
    }

    /// Queues synthetic observations `1..=count`.
    #[must_use]
    pub fn with_observations(self, count: u64) -> Self {
        for n in 1..=count {
            self.source.push(synthetic_observation(n));
        }
        self
    }
}

/// Polls `condition` every few milliseconds until it holds or `timeout`
/// elapses. Returns whether it held.
pub async fn wait_until<F>(timeout: std::time::Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
}
