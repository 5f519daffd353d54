//! Synthetic ingest: turns `synthetic://` references into noise frames with
//! a handful of injected point sources.

use super::{names, Stage};
use crate::config::SyntheticConfig;
use crate::core::{Frame, Metadata, PixelGrid};
use crate::errors::StageError;
use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

/// URI scheme accepted by [`SyntheticIngestStage`].
pub const SYNTHETIC_SCHEME: &str = "synthetic://";

/// Half-width of the window used to paint an injected source.
const SOURCE_RADIUS: i64 = 3;

/// Generates a deterministic frame for every `synthetic://` reference.
///
/// The same reference always yields the same pixels. References using any
/// other scheme are reported as `NotFound`.
#[derive(Debug, Clone)]
pub struct SyntheticIngestStage {
    config: SyntheticConfig,
}

impl SyntheticIngestStage {
    /// Creates the stage.
    #[must_use]
    pub fn new(config: SyntheticConfig) -> Self {
        Self { config }
    }

    fn seed_for(artifact_ref: &str) -> u64 {
        let digest = Sha256::digest(artifact_ref.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }

    fn render(&self, artifact_ref: &str) -> Result<PixelGrid, StageError> {
        let width = self.config.width;
        let height = self.config.height;
        let mut rng = StdRng::seed_from_u64(Self::seed_for(artifact_ref));

        let background = self.config.background;
        let noise = self.config.noise;
        let mut data: Vec<f32> = (0..width * height)
            .map(|_| background + noise * rng.gen_range(-1.0_f32..1.0))
            .collect();

        let margin = SOURCE_RADIUS as usize + 1;
        if width > 2 * margin && height > 2 * margin {
            for _ in 0..self.config.sources {
                let cx = rng.gen_range(margin..width - margin) as i64;
                let cy = rng.gen_range(margin..height - margin) as i64;
                let amplitude = noise * rng.gen_range(15.0_f32..40.0);
                debug!(x = cx, y = cy, amplitude, "Injecting synthetic source");

                for dy in -SOURCE_RADIUS..=SOURCE_RADIUS {
                    for dx in -SOURCE_RADIUS..=SOURCE_RADIUS {
                        let r2 = (dx * dx + dy * dy) as f32;
                        let idx = (cy + dy) as usize * width + (cx + dx) as usize;
                        data[idx] += amplitude * (-r2 / 3.0).exp();
                    }
                }
            }
        }

        PixelGrid::new(width, height, data)
    }
}

impl Default for SyntheticIngestStage {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

#[async_trait]
impl Stage for SyntheticIngestStage {
    type Input = String;
    type Output = Frame;

    fn name(&self) -> &str {
        names::INGEST
    }

    async fn process(&self, artifact_ref: &String) -> Result<Frame, StageError> {
        let artifact_ref = artifact_ref.trim();
        if artifact_ref.is_empty() {
            return Err(StageError::invalid_input(
                "artifact reference must be a non-empty string",
            ));
        }
        if !artifact_ref.starts_with(SYNTHETIC_SCHEME) {
            return Err(StageError::not_found(format!(
                "artifact not found: {artifact_ref}"
            )));
        }

        let pixels = self.render(artifact_ref)?;
        let metadata = Metadata::new()
            .with("NAXIS", 2_i64)
            .with("NAXIS1", pixels.width() as i64)
            .with("NAXIS2", pixels.height() as i64)
            .with("DATE", Utc::now().format("%Y-%m-%dT%H:%M:%S").to_string())
            .with("EXPTIME", self.config.exposure_seconds)
            .with("TELESCOP", self.config.telescope.as_str())
            .with("OBSERVER", self.config.observer.as_str())
            .with("ARTIFACT", artifact_ref);

        info!(
            artifact = artifact_ref,
            width = pixels.width(),
            height = pixels.height(),
            header_cards = metadata.len(),
            "Ingested synthetic frame"
        );

        Ok(Frame::new(pixels, metadata))
    }
}
