//! Periodic driver for the pipeline.
//!
//! The scheduler is a small state machine:
//!
//! ```text
//! Idle --tick--> Running --run published--> Idle
//!   \                                        |
//!    `---------------- stop -----------------'--> Stopped
//! ```
//!
//! At most one run is in flight. A tick that arrives while a run is in
//! flight (or within the cooldown after a publish) is dropped, never queued.
//! Stopping takes effect at the loop boundary: an in-flight run finishes and
//! is published before the loop exits.

mod stats;

pub use stats::{SchedulerStats, SchedulerStatsSnapshot};

use crate::cancellation::StopSignal;
use crate::config::SchedulerConfig;
use crate::core::{PipelineRun, RunStatus};
use crate::errors::AstroflowError;
use crate::events::{EventSink, NoOpEventSink, PipelineEvent, TickDropReason};
use crate::pipeline::PipelineRunner;
use crate::source::ObservationSource;
use crate::store::ResultStore;
use futures::future::OptionFuture;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Lifecycle state of the scheduler loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Waiting for the next tick.
    #[default]
    Idle,
    /// A run is in flight.
    Running,
    /// The loop has exited.
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: RwLock<SchedulerState>,
    stats: SchedulerStats,
    stop: StopSignal,
}

impl Shared {
    fn set_state(&self, state: SchedulerState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        if previous != state {
            debug!(from = %previous, to = %state, "Scheduler state changed");
        }
    }
}

/// Drives observations from a source through a runner into a store.
pub struct Scheduler {
    runner: PipelineRunner,
    source: Arc<dyn ObservationSource>,
    store: Arc<ResultStore>,
    tick_interval: Duration,
    cooldown: Duration,
    sink: Arc<dyn EventSink>,
}

impl Scheduler {
    /// Creates a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`AstroflowError::Config`] if the tick interval or cooldown
    /// cannot be represented as a positive `Duration`.
    pub fn new(
        runner: PipelineRunner,
        source: Arc<dyn ObservationSource>,
        store: Arc<ResultStore>,
        config: &SchedulerConfig,
    ) -> Result<Self, AstroflowError> {
        Ok(Self {
            runner,
            source,
            store,
            tick_interval: config.tick_interval()?,
            cooldown: config.cooldown()?,
            sink: Arc::new(NoOpEventSink),
        })
    }

    /// Sets the event sink for the scheduler and its runner.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.runner = self.runner.with_event_sink(Arc::clone(&sink));
        self.sink = sink;
        self
    }

    /// Spawns the loop on the current runtime.
    #[must_use]
    pub fn start(self) -> SchedulerHandle {
        let shared = Arc::new(Shared::default());
        info!(
            tick_interval_ms = self.tick_interval.as_millis() as u64,
            cooldown_ms = self.cooldown.as_millis() as u64,
            run_timeout_ms = self.runner.run_timeout().map(|t| t.as_millis() as u64),
            "Scheduler starting"
        );
        let task = tokio::spawn(self.run_loop(Arc::clone(&shared)));
        SchedulerHandle { shared, task }
    }

    async fn run_loop(self, shared: Arc<Shared>) {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut in_flight: Option<JoinHandle<PipelineRun>> = None;
        let mut last_publish: Option<Instant> = None;
        let mut sequence: u64 = 0;

        loop {
            tokio::select! {
                biased;

                () = shared.stop.stopped() => break,

                Some(joined) = OptionFuture::from(in_flight.as_mut()), if in_flight.is_some() => {
                    in_flight = None;
                    self.complete(&shared, joined);
                    last_publish = Some(Instant::now());
                    shared.set_state(SchedulerState::Idle);
                }

                _ = ticker.tick() => {
                    shared.stats.record_tick();
                    if in_flight.is_some() {
                        self.drop_tick(&shared, TickDropReason::RunInFlight);
                        continue;
                    }
                    if last_publish.is_some_and(|at| at.elapsed() < self.cooldown) {
                        self.drop_tick(&shared, TickDropReason::Cooldown);
                        continue;
                    }

                    let Some(observation) = self.source.next_observation().await else {
                        debug!("No observation available, idle tick");
                        shared.stats.record_idle();
                        self.sink.emit(&PipelineEvent::TickIdle);
                        continue;
                    };

                    sequence += 1;
                    shared.stats.record_started();
                    shared.set_state(SchedulerState::Running);
                    let runner = self.runner.clone();
                    in_flight = Some(tokio::spawn(async move {
                        runner.run_sequenced(observation, sequence).await
                    }));
                }
            }
        }

        if let Some(task) = in_flight.take() {
            info!("Stop requested, waiting for the in-flight run");
            self.complete(&shared, task.await);
        }

        let reason = shared.stop.reason();
        shared.set_state(SchedulerState::Stopped);
        info!(reason = ?reason, stats = ?shared.stats.snapshot(), "Scheduler stopped");
        self.sink.emit(&PipelineEvent::SchedulerStopped { reason });
    }

    fn drop_tick(&self, shared: &Shared, reason: TickDropReason) {
        debug!(reason = ?reason, "Tick dropped");
        shared.stats.record_dropped();
        self.sink.emit(&PipelineEvent::TickDropped { reason });
    }

    fn complete(&self, shared: &Shared, joined: Result<PipelineRun, JoinError>) {
        let run = match joined {
            Ok(run) => run,
            Err(err) => {
                // the runner contains stage panics itself; this is a bug
                error!(error = %err, "Pipeline task did not return a run");
                shared.stats.record_finished(RunStatus::Failed);
                return;
            }
        };

        shared.stats.record_finished(run.status());
        if let Err(err) = self.store.publish(run) {
            warn!(error = %err, "Failed to publish run");
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("runner", &self.runner)
            .field("tick_interval", &self.tick_interval)
            .field("cooldown", &self.cooldown)
            .finish_non_exhaustive()
    }
}

/// Handle to a running scheduler loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Asks the loop to stop. Idempotent; the first reason is kept.
    pub fn stop(&self, reason: impl Into<String>) {
        self.shared.stop.stop(reason);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SchedulerState {
        *self.shared.state.read()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Returns true once the loop has exited.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state() == SchedulerState::Stopped
    }

    /// Waits for the loop to exit and returns the final counters.
    pub async fn join(self) -> Result<SchedulerStatsSnapshot, AstroflowError> {
        self.task.await?;
        Ok(self.shared.stats.snapshot())
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(
        self,
        reason: impl Into<String>,
    ) -> Result<SchedulerStatsSnapshot, AstroflowError> {
        self.stop(reason);
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::SnapshotStatus;
    use crate::events::CollectingEventSink;
    use crate::source::{MockObservationSource, QueuedObservationSource};
    use crate::stages::{
        LinearWcsOrbitStage, SyntheticIngestStage, ThresholdDetectionStage, WcsCalibrationStage,
    };
    use crate::testing::{fast_config, synthetic_observation, wait_until, GatedStage, StageGate};

    const WAIT: Duration = Duration::from_secs(5);

    fn scheduler_config(tick_ms: u64) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval_seconds: tick_ms as f64 / 1000.0,
            ..SchedulerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_processes_queued_observations() {
        let config = fast_config();
        let source = Arc::new(QueuedObservationSource::new());
        source.push(synthetic_observation(1));
        source.push(synthetic_observation(2));
        let store = Arc::new(ResultStore::new());

        let handle = Scheduler::new(
            PipelineRunner::reference(&config).unwrap(),
            source,
            Arc::clone(&store),
            &scheduler_config(10),
        )
        .unwrap()
        .start();

        assert!(wait_until(WAIT, || store.published_count() == 2).await);
        let stats = handle.shutdown("test done").await.unwrap();

        assert_eq!(stats.runs_started, 2);
        assert_eq!(stats.runs_succeeded, 2);
        assert!(stats.ticks >= 2);
        let current = store.current();
        assert_eq!(current.sequence, 2);
        assert_eq!(current.observation_id.as_deref(), Some("obs-000002"));
    }

    #[tokio::test]
    async fn test_tick_during_run_is_dropped() {
        let config = fast_config();
        let gate = StageGate::new();
        let runner = PipelineRunner::new(
            SyntheticIngestStage::new(config.synthetic.clone()),
            WcsCalibrationStage::new(),
            GatedStage::new(ThresholdDetectionStage::default(), Arc::clone(&gate)),
            LinearWcsOrbitStage::new(),
        );
        let source = Arc::new(QueuedObservationSource::new());
        source.push(synthetic_observation(1));
        source.push(synthetic_observation(2));
        let store = Arc::new(ResultStore::new());
        let sink = Arc::new(CollectingEventSink::new());

        let handle = Scheduler::new(runner, source.clone(), Arc::clone(&store), &scheduler_config(5))
            .unwrap()
            .with_event_sink(sink.clone())
            .start();

        gate.wait_entered(1).await;
        assert!(wait_until(WAIT, || handle.stats().dropped_ticks >= 2).await);
        assert_eq!(handle.state(), SchedulerState::Running);
        assert!(store.current().is_idle());
        // the second observation was not pulled while the first run was in flight
        assert_eq!(source.len(), 1);

        gate.open();
        assert!(wait_until(WAIT, || store.published_count() == 2).await);
        handle.shutdown("done").await.unwrap();

        assert!(!sink.events_of_type("tick.dropped").is_empty());
    }

    #[tokio::test]
    async fn test_stop_waits_for_in_flight_run() {
        let config = fast_config();
        let gate = StageGate::new();
        let runner = PipelineRunner::new(
            GatedStage::new(SyntheticIngestStage::new(config.synthetic.clone()), Arc::clone(&gate)),
            WcsCalibrationStage::new(),
            ThresholdDetectionStage::default(),
            LinearWcsOrbitStage::new(),
        );
        let source = Arc::new(QueuedObservationSource::new());
        source.push(synthetic_observation(1));
        let store = Arc::new(ResultStore::new());

        let handle = Scheduler::new(runner, source, Arc::clone(&store), &scheduler_config(10))
            .unwrap()
            .start();
        gate.wait_entered(1).await;

        handle.stop("shutdown");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(handle.state(), SchedulerState::Running);
        assert!(store.current().is_idle());

        gate.open();
        let stats = handle.join().await.unwrap();

        assert_eq!(stats.runs_finished(), 1);
        assert_eq!(store.current().status, SnapshotStatus::Success);
    }

    #[tokio::test]
    async fn test_empty_source_gives_idle_ticks() {
        let mut source = MockObservationSource::new();
        source.expect_next_observation().returning(|| None);
        let store = Arc::new(ResultStore::new());

        let handle = Scheduler::new(
            PipelineRunner::reference(&fast_config()).unwrap(),
            Arc::new(source),
            Arc::clone(&store),
            &scheduler_config(5),
        )
        .unwrap()
        .start();

        assert!(wait_until(WAIT, || handle.stats().idle_ticks >= 3).await);
        let stats = handle.shutdown("done").await.unwrap();

        assert_eq!(stats.runs_started, 0);
        assert!(store.current().is_idle());
    }

    #[tokio::test]
    async fn test_cooldown_drops_ticks() {
        let source = Arc::new(QueuedObservationSource::new());
        source.push(synthetic_observation(1));
        source.push(synthetic_observation(2));
        let store = Arc::new(ResultStore::new());
        let config = SchedulerConfig {
            tick_interval_seconds: 0.005,
            cooldown_seconds: 10.0,
            run_timeout_seconds: None,
        };

        let handle = Scheduler::new(
            PipelineRunner::reference(&fast_config()).unwrap(),
            source.clone(),
            Arc::clone(&store),
            &config,
        )
        .unwrap()
        .start();

        assert!(wait_until(WAIT, || store.published_count() == 1).await);
        assert!(wait_until(WAIT, || handle.stats().dropped_ticks >= 3).await);
        let stats = handle.shutdown("done").await.unwrap();

        assert_eq!(stats.runs_started, 1);
        assert_eq!(source.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_first_run() {
        let source = Arc::new(QueuedObservationSource::new());
        let handle = Scheduler::new(
            PipelineRunner::reference(&fast_config()).unwrap(),
            source,
            Arc::new(ResultStore::new()),
            &scheduler_config(1000),
        )
        .unwrap()
        .start();

        handle.stop("immediately");
        handle.stop("ignored");
        let stats = handle.join().await.unwrap();
        assert_eq!(stats.runs_started, 0);
    }

    #[test]
    fn test_unusable_interval_is_rejected() {
        for tick in [-1.0, 0.0, 1e20, f64::NAN] {
            let config = SchedulerConfig {
                tick_interval_seconds: tick,
                ..SchedulerConfig::default()
            };
            let result = Scheduler::new(
                PipelineRunner::reference(&fast_config()).unwrap(),
                Arc::new(QueuedObservationSource::new()),
                Arc::new(ResultStore::new()),
                &config,
            );
            assert!(matches!(result, Err(AstroflowError::Config(_))), "tick {tick}");
        }

        let config = SchedulerConfig {
            cooldown_seconds: -0.5,
            ..SchedulerConfig::default()
        };
        let result = Scheduler::new(
            PipelineRunner::reference(&fast_config()).unwrap(),
            Arc::new(QueuedObservationSource::new()),
            Arc::new(ResultStore::new()),
            &config,
        );
        assert!(result.is_err());
    }
}
