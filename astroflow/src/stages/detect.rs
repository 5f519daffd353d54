//! Threshold-based source detection.

use super::{names, Stage};
use crate::config::DetectionConfig;
use crate::core::{Detection, DetectionBatch, Frame, PixelGrid};
use crate::errors::StageError;
use async_trait::async_trait;
use tracing::{debug, info};

/// Finds local maxima brighter than `mean + sigma_threshold * std`.
///
/// Candidates are ranked by brightness and thinned so that no two kept
/// detections are closer than `min_separation` pixels. Confidence is a
/// logistic function of the signal-to-noise excess over the threshold, so a
/// source sitting exactly on the threshold scores 0.5.
#[derive(Debug, Clone)]
pub struct ThresholdDetectionStage {
    config: DetectionConfig,
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    x: usize,
    y: usize,
    snr: f64,
}

impl ThresholdDetectionStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: DetectionConfig) -> Self {
        Self { config }
    }

    fn is_local_max(grid: &PixelGrid, x: usize, y: usize, value: f32) -> bool {
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if (nx, ny) == (x, y) {
                    continue;
                }
                match grid.get(nx, ny) {
                    Some(v) if v > value => return false,
                    _ => {}
                }
            }
        }
        true
    }

    fn candidates(&self, grid: &PixelGrid) -> Vec<Candidate> {
        let (mean, std) = grid.mean_and_std();
        if std <= f64::EPSILON || grid.width() < 3 || grid.height() < 3 {
            return Vec::new();
        }
        let threshold = mean + self.config.sigma_threshold * std;

        let mut found = Vec::new();
        for y in 1..grid.height() - 1 {
            for x in 1..grid.width() - 1 {
                let Some(value) = grid.get(x, y) else {
                    continue;
                };
                if f64::from(value) > threshold && Self::is_local_max(grid, x, y, value) {
                    found.push(Candidate {
                        x,
                        y,
                        snr: (f64::from(value) - mean) / std,
                    });
                }
            }
        }
        found
    }

    fn suppress(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates.sort_by(|a, b| b.snr.total_cmp(&a.snr));
        let mut kept: Vec<Candidate> = Vec::new();
        for candidate in candidates {
            if kept.len() >= self.config.max_detections {
                break;
            }
            let crowded = kept.iter().any(|k| {
                k.x.abs_diff(candidate.x).max(k.y.abs_diff(candidate.y)) < self.config.min_separation
            });
            if !crowded {
                kept.push(candidate);
            }
        }
        kept
    }

    fn confidence(&self, snr: f64) -> f64 {
        1.0 / (1.0 + (-(snr - self.config.sigma_threshold)).exp())
    }
}

impl Default for ThresholdDetectionStage {
    fn default() -> Self {
        Self::new(DetectionConfig::default())
    }
}

#[async_trait]
impl Stage for ThresholdDetectionStage {
    type Input = Frame;
    type Output = DetectionBatch;

    fn name(&self) -> &str {
        names::DETECT
    }

    async fn process(&self, frame: &Frame) -> Result<DetectionBatch, StageError> {
        if !frame.pixels.is_finite() {
            return Err(StageError::model(
                "detector received non-finite pixel values",
            ));
        }

        let detections: Vec<Detection> = self
            .suppress(self.candidates(&frame.pixels))
            .into_iter()
            .map(|c| Detection::new(c.x as i64, c.y as i64, self.confidence(c.snr)))
            .collect();

        info!(count = detections.len(), "Detection completed");
        for (i, det) in detections.iter().enumerate() {
            debug!(
                index = i + 1,
                x = det.x,
                y = det.y,
                confidence = format!("{:.2}", det.confidence),
                "Detection"
            );
        }

        Ok(DetectionBatch::new(detections, frame.metadata.clone()))
    }
}
