//! Stage trait and the reference stage implementations.
//!
//! A stage is one pure transform in the pipeline. Each stage borrows its
//! input and returns a new value, so the caller can keep the input around for
//! error reporting. The four boundaries of the pipeline are fixed:
//!
//! ```text
//! artifact ref -> Frame -> Frame -> DetectionBatch -> Vec<OrbitEstimate>
//!     ingest     calibrate    detect          estimate_orbit
//! ```

mod calibrate;
mod detect;
mod ingest;
mod orbit;

pub use calibrate::WcsCalibrationStage;
pub use detect::ThresholdDetectionStage;
pub use ingest::{SyntheticIngestStage, SYNTHETIC_SCHEME};
pub use orbit::LinearWcsOrbitStage;

use crate::core::{DetectionBatch, Frame, OrbitEstimate};
use crate::errors::StageError;
use async_trait::async_trait;
use std::fmt::Debug;
use std::marker::PhantomData;

/// Canonical stage names.
pub mod names {
    /// Ingest stage.
    pub const INGEST: &str = "ingest";
    /// Calibration stage.
    pub const CALIBRATE: &str = "calibrate";
    /// Detection stage.
    pub const DETECT: &str = "detect";
    /// Orbit estimation stage.
    pub const ESTIMATE_ORBIT: &str = "estimate_orbit";
}

/// Trait for pipeline stages.
///
/// A stage must not signal success with a partially valid payload; any
/// problem with the input or the computation is reported as a [`StageError`].
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Payload consumed by the stage.
    type Input: Send + Sync;
    /// Payload produced by the stage.
    type Output: Send;

    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Transforms `input` into the next payload.
    async fn process(&self, input: &Self::Input) -> Result<Self::Output, StageError>;
}

/// Loads a raw artifact into a frame.
pub type IngestStage = dyn Stage<Input = String, Output = Frame>;
/// Calibrates a frame.
pub type CalibrateStage = dyn Stage<Input = Frame, Output = Frame>;
/// Finds candidate objects in a calibrated frame.
pub type DetectStage = dyn Stage<Input = Frame, Output = DetectionBatch>;
/// Estimates orbits for a batch of detections.
pub type OrbitStage = dyn Stage<Input = DetectionBatch, Output = Vec<OrbitEstimate>>;

/// A simple function-based stage.
pub struct FnStage<I, O, F>
where
    F: Fn(&I) -> Result<O, StageError> + Send + Sync,
{
    name: String,
    func: F,
    _phantom: PhantomData<fn(&I) -> O>,
}

impl<I, O, F> FnStage<I, O, F>
where
    F: Fn(&I) -> Result<O, StageError> + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
            _phantom: PhantomData,
        }
    }
}

impl<I, O, F> Debug for FnStage<I, O, F>
where
    F: Fn(&I) -> Result<O, StageError> + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<I, O, F> Stage for FnStage<I, O, F>
where
    I: Send + Sync,
    O: Send,
    F: Fn(&I) -> Result<O, StageError> + Send + Sync,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, input: &I) -> Result<O, StageError> {
        (self.func)(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::StageErrorKind;

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("double", |x: &u32| Ok::<_, StageError>(x * 2));

        assert_eq!(stage.name(), "double");
        assert_eq!(stage.process(&21).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_fn_stage_error() {
        let stage = FnStage::new("reject", |_: &u32| Err::<u32, _>(StageError::invalid_input("no")));

        let err = stage.process(&1).await.unwrap_err();
        assert_eq!(err.kind, StageErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_fn_stage_as_trait_object() {
        let stage: Box<dyn Stage<Input = u32, Output = String>> =
            Box::new(FnStage::new("fmt", |x: &u32| Ok(x.to_string())));
        assert_eq!(stage.process(&7).await.unwrap(), "7");
    }
}
