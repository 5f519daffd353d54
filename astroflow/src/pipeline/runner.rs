//! Sequential stage runner with failure isolation and an optional watchdog.

use crate::config::AstroflowConfig;
use crate::core::{
    DetectionBatch, Frame, Observation, OrbitEstimate, PipelineRun, StageOutcome, StagePayload,
};
use crate::errors::{AstroflowError, StageError};
use crate::events::{EventSink, NoOpEventSink, PipelineEvent};
use crate::observability::{RunSpanAttributes, SpanTimer};
use crate::stages::{
    CalibrateStage, DetectStage, IngestStage, LinearWcsOrbitStage, OrbitStage, Stage,
    SyntheticIngestStage, ThresholdDetectionStage, WcsCalibrationStage,
};
use futures::FutureExt;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Instrument, Span};
use uuid::Uuid;

/// Outcomes collected while a run executes.
///
/// Closing the trail hands the outcomes to the run; anything a detached
/// task pushes afterwards is dropped.
#[derive(Debug, Default)]
struct OutcomeTrail {
    state: Mutex<TrailState>,
}

#[derive(Debug, Default)]
struct TrailState {
    closed: bool,
    outcomes: Vec<StageOutcome>,
    in_flight: Option<(String, Instant)>,
}

impl OutcomeTrail {
    fn new() -> Self {
        Self::default()
    }

    fn enter(&self, stage: &str) {
        let mut state = self.state.lock();
        if !state.closed {
            state.in_flight = Some((stage.to_string(), Instant::now()));
        }
    }

    fn push(&self, outcome: StageOutcome) -> bool {
        let mut state = self.state.lock();
        if state.closed {
            return false;
        }
        state.in_flight = None;
        state.outcomes.push(outcome);
        true
    }

    fn close(&self) -> Vec<StageOutcome> {
        let mut state = self.state.lock();
        state.closed = true;
        state.in_flight = None;
        std::mem::take(&mut state.outcomes)
    }

    /// Stops accepting outcomes and charges `err` to the stage still
    /// executing, if any.
    fn expire(&self, err: &StageError) -> Option<StageOutcome> {
        let mut state = self.state.lock();
        state.closed = true;
        state.in_flight.take().map(|(stage, entered)| {
            StageOutcome::failed(stage, err.clone(), entered.elapsed().as_secs_f64() * 1000.0)
        })
    }
}

/// Runs observations through ingest, calibration, detection and orbit
/// estimation, in that order.
///
/// The runner never returns an error: every failure, including a panicking
/// stage or an expired watchdog, is captured in the returned run. Cloning is
/// cheap; all stages are shared.
#[derive(Clone)]
pub struct PipelineRunner {
    ingest: Arc<IngestStage>,
    calibrate: Arc<CalibrateStage>,
    detect: Arc<DetectStage>,
    estimate_orbit: Arc<OrbitStage>,
    run_timeout: Option<Duration>,
    sink: Arc<dyn EventSink>,
}

impl PipelineRunner {
    /// Creates a runner from four stages.
    pub fn new<I, C, D, O>(ingest: I, calibrate: C, detect: D, estimate_orbit: O) -> Self
    where
        I: Stage<Input = String, Output = Frame> + 'static,
        C: Stage<Input = Frame, Output = Frame> + 'static,
        D: Stage<Input = Frame, Output = DetectionBatch> + 'static,
        O: Stage<Input = DetectionBatch, Output = Vec<OrbitEstimate>> + 'static,
    {
        Self::from_shared(
            Arc::new(ingest),
            Arc::new(calibrate),
            Arc::new(detect),
            Arc::new(estimate_orbit),
        )
    }

    /// Creates a runner from already shared stages.
    #[must_use]
    pub fn from_shared(
        ingest: Arc<IngestStage>,
        calibrate: Arc<CalibrateStage>,
        detect: Arc<DetectStage>,
        estimate_orbit: Arc<OrbitStage>,
    ) -> Self {
        Self {
            ingest,
            calibrate,
            detect,
            estimate_orbit,
            run_timeout: None,
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// The reference pipeline: synthetic ingest, placeholder WCS, threshold
    /// detection and linear WCS orbit estimation.
    ///
    /// # Errors
    ///
    /// Returns [`AstroflowError::Config`] if the configured run timeout
    /// cannot be represented as a `Duration`.
    pub fn reference(config: &AstroflowConfig) -> Result<Self, AstroflowError> {
        let run_timeout = config.scheduler.run_timeout()?;
        Ok(Self::new(
            SyntheticIngestStage::new(config.synthetic.clone()),
            WcsCalibrationStage::new()
                .with_background_subtraction(config.calibration.subtract_background),
            ThresholdDetectionStage::new(config.detection.clone()),
            LinearWcsOrbitStage::new(),
        )
        .with_run_timeout(run_timeout))
    }

    /// Sets the whole-run watchdog. `None` disables it.
    #[must_use]
    pub fn with_run_timeout(mut self, run_timeout: Option<Duration>) -> Self {
        self.run_timeout = run_timeout;
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Returns the watchdog limit.
    #[must_use]
    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout
    }

    /// Names of the stages in execution order.
    #[must_use]
    pub fn stage_names(&self) -> [String; 4] {
        [
            self.ingest.name().to_string(),
            self.calibrate.name().to_string(),
            self.detect.name().to_string(),
            self.estimate_orbit.name().to_string(),
        ]
    }

    /// Runs an ad-hoc observation.
    pub async fn run(&self, observation: Observation) -> PipelineRun {
        self.run_sequenced(observation, 0).await
    }

    /// Runs an observation under a scheduler-assigned run number and
    /// returns the finalized run.
    pub async fn run_sequenced(&self, observation: Observation, sequence: u64) -> PipelineRun {
        let mut run = PipelineRun::new(observation).with_sequence(sequence);
        let run_id = run.run_id;
        let timer = SpanTimer::start("pipeline.run");
        let attrs = RunSpanAttributes::new()
            .with_run_id(run_id.to_string())
            .with_sequence(sequence)
            .with_observation_id(run.observation.id.clone());
        let span = attrs.span();

        info!(
            run_id = %run_id,
            sequence,
            observation_id = %run.observation.id,
            artifact = %run.observation.artifact_ref,
            "Pipeline run started"
        );
        self.sink.emit(&PipelineEvent::RunStarted {
            sequence,
            run_id: run_id.to_string(),
            observation_id: run.observation.id.clone(),
        });

        let trail = Arc::new(OutcomeTrail::new());
        let artifact_ref = run.observation.artifact_ref.clone();

        let mut expired = None;
        let result = match self.run_timeout {
            None => {
                self.clone()
                    .execute(run_id, artifact_ref, Arc::clone(&trail))
                    .instrument(span.clone())
                    .await
            }
            Some(limit) => {
                let task = tokio::spawn(
                    self.clone()
                        .execute(run_id, artifact_ref, Arc::clone(&trail))
                        .instrument(span.clone()),
                );
                match tokio::time::timeout(limit, task).await {
                    Ok(Ok(result)) => result,
                    Ok(Err(join_err)) => Err(StageError::internal(format!(
                        "run task failed: {join_err}"
                    ))),
                    Err(_) => {
                        let err = StageError::timeout(format!(
                            "run exceeded the {:.3}s watchdog",
                            limit.as_secs_f64()
                        ));
                        // the stage task keeps running detached; its late
                        // outcomes are dropped by the closed trail
                        let running = trail.expire(&err);
                        warn!(
                            run_id = %run_id,
                            limit_ms = limit.as_millis() as u64,
                            stage = running.as_ref().map(StageOutcome::stage_name),
                            "Run watchdog expired"
                        );
                        expired = running;
                        Err(err)
                    }
                }
            }
        };

        for outcome in trail.close() {
            run.record(outcome);
        }
        if let Some(outcome) = expired {
            self.report_stage_failed(run_id, &outcome);
            run.record(outcome);
        }
        match result {
            Ok(()) => run.finish_success(),
            Err(err) => run.finish_failed(err),
        };

        let duration_ms = timer.finish();
        self.report_finished(&run, duration_ms, attrs, &span);
        run
    }

    fn report_finished(
        &self,
        run: &PipelineRun,
        duration_ms: f64,
        attrs: RunSpanAttributes,
        span: &Span,
    ) {
        let mut attrs = attrs
            .with_status(run.status().to_string())
            .with_duration_ms(duration_ms);

        match run.final_error() {
            Some(err) => {
                attrs = attrs.with_error(err.kind.as_str());
                error!(
                    run_id = %run.run_id,
                    sequence = run.sequence,
                    kind = %err.kind,
                    error = %err.message,
                    duration_ms,
                    "Pipeline run failed"
                );
            }
            None => info!(
                run_id = %run.run_id,
                sequence = run.sequence,
                detections = run.detections().len(),
                orbits = run.orbits().len(),
                duration_ms,
                "Pipeline run completed"
            ),
        }
        attrs.record(span);

        self.sink.emit(&PipelineEvent::RunFinished {
            sequence: run.sequence,
            run_id: run.run_id.to_string(),
            status: run.status(),
            error: run.final_error_kind(),
            duration_ms,
        });
    }

    async fn execute(
        self,
        run_id: Uuid,
        artifact_ref: String,
        trail: Arc<OutcomeTrail>,
    ) -> Result<(), StageError> {
        let raw = self.step(&*self.ingest, &artifact_ref, run_id, &trail).await?;
        let calibrated = self.step(&*self.calibrate, &raw, run_id, &trail).await?;
        let batch = self.step(&*self.detect, &calibrated, run_id, &trail).await?;
        self.step(&*self.estimate_orbit, &batch, run_id, &trail)
            .await?;
        Ok(())
    }

    /// Runs one stage, records its outcome and hands back its output.
    async fn step<S>(
        &self,
        stage: &S,
        input: &S::Input,
        run_id: Uuid,
        trail: &OutcomeTrail,
    ) -> Result<S::Output, StageError>
    where
        S: Stage + ?Sized,
        S::Output: Clone + Into<StagePayload>,
    {
        let name = stage.name().to_string();
        let timer = SpanTimer::start(name.clone());
        trail.enter(&name);

        let result = match AssertUnwindSafe(stage.process(input)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(StageError::internal(format!(
                "stage '{name}' panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };
        let duration_ms = timer.finish();

        match result {
            Ok(output) => {
                let payload: StagePayload = output.clone().into();
                let summary = payload.summary();
                if trail.push(StageOutcome::success(name.clone(), payload, duration_ms)) {
                    debug!(run_id = %run_id, stage = %name, duration_ms, "Stage completed");
                    self.sink.emit(&PipelineEvent::StageCompleted {
                        run_id: run_id.to_string(),
                        stage: name,
                        duration_ms,
                        payload: summary,
                    });
                }
                Ok(output)
            }
            Err(err) => {
                let outcome = StageOutcome::failed(name, err.clone(), duration_ms);
                if trail.push(outcome.clone()) {
                    self.report_stage_failed(run_id, &outcome);
                }
                Err(err)
            }
        }
    }

    fn report_stage_failed(&self, run_id: Uuid, outcome: &StageOutcome) {
        let Some(err) = outcome.error() else {
            return;
        };
        warn!(
            run_id = %run_id,
            stage = outcome.stage_name(),
            kind = %err.kind,
            error = %err.message,
            "Stage failed"
        );
        self.sink.emit(&PipelineEvent::StageFailed {
            run_id: run_id.to_string(),
            stage: outcome.stage_name().to_string(),
            kind: err.kind,
            message: err.message.clone(),
            duration_ms: outcome.duration_ms(),
        });
    }
}

impl std::fmt::Debug for PipelineRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineRunner")
            .field("stages", &self.stage_names())
            .field("run_timeout", &self.run_timeout)
            .finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunStatus, StageStatus};
    use crate::errors::StageErrorKind;
    use crate::events::CollectingEventSink;
    use crate::testing::{FailingStage, PanickingStage, SlowStage};

    fn observation(artifact_ref: &str) -> Observation {
        Observation::new("obs-1", artifact_ref)
    }

    fn reference() -> PipelineRunner {
        PipelineRunner::reference(&AstroflowConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_reference_run_succeeds() {
        let run = reference().run(observation("synthetic://1")).await;

        assert_eq!(run.status(), RunStatus::Success);
        assert_eq!(run.stage_outcomes().len(), 4);
        assert!(run.stage_outcomes().iter().all(StageOutcome::is_success));
        assert!(run.final_error().is_none());
        assert!(run.finished_at().is_some());
        assert_eq!(run.orbits().len(), run.detections().len());
    }

    #[tokio::test]
    async fn test_ingest_failure_stops_run() {
        let run = reference().run(observation("/data/missing.fits")).await;

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.stage_outcomes().len(), 1);
        assert_eq!(run.stage_outcomes()[0].status(), StageStatus::Failed);
        assert_eq!(run.final_error_kind(), Some(StageErrorKind::NotFound));
    }

    #[tokio::test]
    async fn test_detect_failure_keeps_earlier_outcomes() {
        let runner = PipelineRunner::new(
            SyntheticIngestStage::default(),
            WcsCalibrationStage::new(),
            FailingStage::new("detect", StageError::model("weights missing")),
            LinearWcsOrbitStage::new(),
        );
        let run = runner.run(observation("synthetic://2")).await;

        assert_eq!(run.status(), RunStatus::Failed);
        let names: Vec<_> = run.stage_outcomes().iter().map(StageOutcome::stage_name).collect();
        assert_eq!(names, vec!["ingest", "calibrate", "detect"]);
        assert_eq!(run.final_error_kind(), Some(StageErrorKind::ModelError));
        assert!(run.latest_frame().is_some());
    }

    #[tokio::test]
    async fn test_panicking_stage_becomes_internal_error() {
        let runner = PipelineRunner::new(
            SyntheticIngestStage::default(),
            PanickingStage::new("calibrate", "bad pixel table"),
            ThresholdDetectionStage::default(),
            LinearWcsOrbitStage::new(),
        );
        let run = runner.run(observation("synthetic://3")).await;

        assert_eq!(run.status(), RunStatus::Failed);
        let err = run.final_error().unwrap();
        assert_eq!(err.kind, StageErrorKind::InternalError);
        assert!(err.message.contains("bad pixel table"));
        assert_eq!(run.stage_outcomes().len(), 2);
    }

    #[tokio::test]
    async fn test_watchdog_times_out_run() {
        let runner = PipelineRunner::new(
            SyntheticIngestStage::default(),
            WcsCalibrationStage::new(),
            SlowStage::new(ThresholdDetectionStage::default(), Duration::from_secs(5)),
            LinearWcsOrbitStage::new(),
        )
        .with_run_timeout(Some(Duration::from_millis(50)));

        let run = runner.run(observation("synthetic://4")).await;

        assert_eq!(run.status(), RunStatus::Failed);
        assert_eq!(run.final_error_kind(), Some(StageErrorKind::Timeout));
        // ingest and calibrate finished before the watchdog fired
        let outcomes = run.stage_outcomes();
        assert_eq!(outcomes.len(), 3);
        assert!(outcomes[..2].iter().all(StageOutcome::is_success));
        assert_eq!(outcomes[2].stage_name(), "detect");
        assert_eq!(outcomes[2].status(), StageStatus::Failed);
        assert_eq!(
            outcomes[2].error().map(|e| e.kind),
            Some(StageErrorKind::Timeout)
        );
        assert!(outcomes[2].duration_ms() > 0.0);
    }

    #[tokio::test]
    async fn test_watchdog_reports_expired_stage_once() {
        let sink = Arc::new(CollectingEventSink::new());
        let runner = PipelineRunner::new(
            SlowStage::new(SyntheticIngestStage::default(), Duration::from_millis(200)),
            WcsCalibrationStage::new(),
            ThresholdDetectionStage::default(),
            LinearWcsOrbitStage::new(),
        )
        .with_run_timeout(Some(Duration::from_millis(20)))
        .with_event_sink(sink.clone());

        let run = runner.run(observation("synthetic://6")).await;
        assert_eq!(run.stage_outcomes().len(), 1);
        assert_eq!(run.stage_outcomes()[0].stage_name(), "ingest");

        // let the detached task finish; its late outcomes must not surface
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(run.stage_outcomes().len(), 1);
        let failed = sink.events_of_type("stage.failed");
        assert_eq!(failed.len(), 1);
        assert!(sink.events_of_type("stage.completed").is_empty());
    }

    #[tokio::test]
    async fn test_events_emitted_in_order() {
        let sink = Arc::new(CollectingEventSink::new());
        let runner = reference().with_event_sink(sink.clone());
        let run = runner.run_sequenced(observation("synthetic://5"), 7).await;

        let types: Vec<_> = sink.events().iter().map(PipelineEvent::event_type).collect();
        assert_eq!(
            types,
            vec![
                "run.started",
                "stage.completed",
                "stage.completed",
                "stage.completed",
                "stage.completed",
                "run.finished"
            ]
        );
        assert_eq!(run.sequence, 7);
    }

    #[test]
    fn test_reference_rejects_unusable_timeout() {
        for seconds in [-1.0, f64::NAN, 1e20] {
            let config = AstroflowConfig::default().with_run_timeout(seconds);
            let err = PipelineRunner::reference(&config).unwrap_err();
            assert!(matches!(err, AstroflowError::Config(_)), "timeout {seconds}");
        }
        let config = AstroflowConfig::default().with_run_timeout(0.25);
        let runner = PipelineRunner::reference(&config).unwrap();
        assert_eq!(runner.run_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(
            reference().stage_names(),
            ["ingest", "calibrate", "detect", "estimate_orbit"].map(String::from)
        );
    }
}
