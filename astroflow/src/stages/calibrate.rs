//! Placeholder astrometric calibration.

use super::{names, Stage};
use crate::core::{Frame, Metadata};
use crate::errors::StageError;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Attaches a fixed tangent-plane WCS solution to the frame header.
///
/// Pixels are passed through unchanged unless background subtraction is
/// enabled, in which case the frame mean is removed from every pixel.
#[derive(Debug, Clone)]
pub struct WcsCalibrationStage {
    /// Reference right ascension in degrees.
    pub crval1: f64,
    /// Reference declination in degrees.
    pub crval2: f64,
    /// Pixel scale along x in degrees per pixel.
    pub cdelt1: f64,
    /// Pixel scale along y in degrees per pixel.
    pub cdelt2: f64,
    /// Whether to subtract the mean background.
    pub subtract_background: bool,
}

impl Default for WcsCalibrationStage {
    fn default() -> Self {
        Self {
            crval1: 200.0,
            crval2: 30.0,
            cdelt1: -0.0001,
            cdelt2: 0.0001,
            subtract_background: false,
        }
    }
}

impl WcsCalibrationStage {
    /// Creates the stage with the default solution.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables or disables background subtraction.
    #[must_use]
    pub fn with_background_subtraction(mut self, enabled: bool) -> Self {
        self.subtract_background = enabled;
        self
    }

    fn solve(&self, frame: &Frame) -> Metadata {
        let mut header = frame.metadata.clone();
        header.insert("WCSAXES", 2_i64);
        header.insert("CRPIX1", frame.pixels.width() as f64 / 2.0);
        header.insert("CRPIX2", frame.pixels.height() as f64 / 2.0);
        header.insert("CRVAL1", self.crval1);
        header.insert("CRVAL2", self.crval2);
        header.insert("CDELT1", self.cdelt1);
        header.insert("CDELT2", self.cdelt2);
        header.insert("CTYPE1", "RA---TAN");
        header.insert("CTYPE2", "DEC--TAN");
        header.insert("PC1_1", 1.0);
        header.insert("PC1_2", 0.0);
        header.insert("PC2_1", 0.0);
        header.insert("PC2_2", 1.0);
        header.insert("CALIB", "FAKE_WCS");
        header
    }
}

#[async_trait]
impl Stage for WcsCalibrationStage {
    type Input = Frame;
    type Output = Frame;

    fn name(&self) -> &str {
        names::CALIBRATE
    }

    async fn process(&self, frame: &Frame) -> Result<Frame, StageError> {
        if !frame.pixels.is_finite() {
            return Err(StageError::invalid_input(
                "frame contains non-finite pixel values",
            ));
        }

        let pixels = if self.subtract_background {
            let (mean, _) = frame.pixels.mean_and_std();
            Arc::new(frame.pixels.map(|v| v - mean as f32))
        } else {
            Arc::clone(&frame.pixels)
        };
        let metadata = self.solve(frame);

        info!(
            width = pixels.width(),
            height = pixels.height(),
            background_subtracted = self.subtract_background,
            "Applied placeholder WCS calibration"
        );
        debug!(header = ?metadata, "Calibrated header");

        Ok(Frame { pixels, metadata })
    }
}
