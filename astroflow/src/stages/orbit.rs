//! Placeholder orbit estimation from a single frame.

use super::{names, Stage};
use crate::core::{Detection, DetectionBatch, KeplerianElements, Metadata, OrbitEstimate};
use crate::errors::StageError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

/// Linear pixel-to-sky conversion plus placeholder elements.
///
/// A single frame cannot constrain an orbit; the elements produced here are
/// seeded from the detection position so the output is reproducible.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearWcsOrbitStage;

struct LinearWcs {
    crval1: f64,
    crval2: f64,
    crpix1: f64,
    crpix2: f64,
    cdelt1: f64,
    cdelt2: f64,
}

impl LinearWcs {
    fn from_header(header: &Metadata) -> Result<Self, StageError> {
        Ok(Self {
            crval1: header.require_f64("CRVAL1")?,
            crval2: header.require_f64("CRVAL2")?,
            crpix1: header.require_f64("CRPIX1")?,
            crpix2: header.require_f64("CRPIX2")?,
            cdelt1: header.require_f64("CDELT1")?,
            cdelt2: header.require_f64("CDELT2")?,
        })
    }

    fn sky(&self, det: &Detection) -> Result<(f64, f64), StageError> {
        let ra = (self.crval1 + (det.x as f64 - self.crpix1) * self.cdelt1).rem_euclid(360.0);
        let dec = self.crval2 + (det.y as f64 - self.crpix2) * self.cdelt2;
        if !ra.is_finite() || !dec.is_finite() || dec.abs() > 90.0 {
            return Err(StageError::computation(format!(
                "detection ({}, {}) maps outside the sky: ra={ra}, dec={dec}",
                det.x, det.y
            )));
        }
        Ok((ra, dec))
    }
}

impl LinearWcsOrbitStage {
    /// Creates the stage.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn epoch(header: &Metadata) -> DateTime<Utc> {
        let Some(raw) = header.get_str("DATE") else {
            warn!("Header has no DATE keyword, using current UTC time");
            return Utc::now();
        };
        if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
            return parsed.with_timezone(&Utc);
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
            return naive.and_utc();
        }
        warn!(date = raw, "Could not parse DATE from header, using current UTC time");
        Utc::now()
    }

    fn elements(det: &Detection) -> KeplerianElements {
        let seed = ((det.x as u64) << 32) ^ (det.y as u64 & 0xffff_ffff);
        let mut rng = StdRng::seed_from_u64(seed);
        KeplerianElements {
            a: rng.gen_range(1.0..5.0),
            e: rng.gen_range(0.0..0.5),
            i: rng.gen_range(0.0..60.0),
            node: rng.gen_range(0.0..360.0),
            arg_peri: rng.gen_range(0.0..360.0),
            mean_anom: rng.gen_range(0.0..360.0),
        }
    }
}

#[async_trait]
impl Stage for LinearWcsOrbitStage {
    type Input = DetectionBatch;
    type Output = Vec<OrbitEstimate>;

    fn name(&self) -> &str {
        names::ESTIMATE_ORBIT
    }

    async fn process(&self, batch: &DetectionBatch) -> Result<Vec<OrbitEstimate>, StageError> {
        if batch.detections.is_empty() {
            info!("No detections provided for orbit estimation");
            return Ok(Vec::new());
        }

        let wcs = LinearWcs::from_header(&batch.metadata)?;
        let epoch = Self::epoch(&batch.metadata).to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut estimates = Vec::with_capacity(batch.detections.len());
        for (i, det) in batch.detections.iter().enumerate() {
            let (ra, dec) = wcs.sky(det)?;
            debug!(
                index = i + 1,
                ra = format!("{ra:.6}"),
                dec = format!("{dec:.6}"),
                epoch = %epoch,
                "Estimated orbit"
            );
            estimates.push(OrbitEstimate {
                ra,
                dec,
                epoch: epoch.clone(),
                elements: Self::elements(det),
                confidence: det.confidence,
            });
        }

        info!(count = estimates.len(), "Orbit estimation completed");
        Ok(estimates)
    }
}
