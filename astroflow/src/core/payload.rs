//! Typed payloads exchanged at each stage boundary.

use crate::errors::StageError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A row-major grid of pixel intensities.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelGrid {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl PixelGrid {
    /// Creates a grid, checking that `data` holds exactly `width * height` values.
    pub fn new(width: usize, height: usize, data: Vec<f32>) -> Result<Self, StageError> {
        if width == 0 || height == 0 {
            return Err(StageError::invalid_input(format!(
                "pixel grid must be two-dimensional, got {width}x{height}"
            )));
        }
        let expected = width.checked_mul(height).ok_or_else(|| {
            StageError::invalid_input(format!("pixel grid {width}x{height} overflows"))
        })?;
        if data.len() != expected {
            return Err(StageError::invalid_input(format!(
                "pixel grid {width}x{height} expects {expected} values, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Creates a grid filled with a constant value.
    pub fn filled(width: usize, height: usize, value: f32) -> Result<Self, StageError> {
        let len = width.checked_mul(height).ok_or_else(|| {
            StageError::invalid_input(format!("pixel grid {width}x{height} overflows"))
        })?;
        Self::new(width, height, vec![value; len])
    }

    /// Number of columns.
    #[must_use]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Number of rows.
    #[must_use]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Raw row-major values.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Value at column `x`, row `y`.
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get(y * self.width + x).copied()
    }

    /// Returns a copy with `f` applied to every pixel.
    #[must_use]
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            width: self.width,
            height: self.height,
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    /// Mean and population standard deviation of the grid.
    #[must_use]
    pub fn mean_and_std(&self) -> (f64, f64) {
        let n = self.data.len() as f64;
        let mean = self.data.iter().map(|&v| f64::from(v)).sum::<f64>() / n;
        let variance = self
            .data
            .iter()
            .map(|&v| {
                let d = f64::from(v) - mean;
                d * d
            })
            .sum::<f64>()
            / n;
        (mean, variance.sqrt())
    }

    /// Minimum and maximum pixel value.
    #[must_use]
    pub fn min_max(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Returns true if every pixel is a finite number.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }
}

/// A single header card value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// Integer card.
    Int(i64),
    /// Floating-point card.
    Float(f64),
    /// Text card.
    Text(String),
}

impl HeaderValue {
    /// Numeric view of the card, if it has one.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    /// Text view of the card, if it is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for HeaderValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for HeaderValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

/// Ordered header of an observation frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, HeaderValue>);

impl Metadata {
    /// Creates an empty header.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a card, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<HeaderValue>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style [`Metadata::insert`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the raw card.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.0.get(key)
    }

    /// Returns a numeric card.
    #[must_use]
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(HeaderValue::as_f64)
    }

    /// Returns a text card.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(HeaderValue::as_str)
    }

    /// Returns a numeric card or an `InvalidInput` error naming the key.
    pub fn require_f64(&self, key: &str) -> Result<f64, StageError> {
        self.get_f64(key).ok_or_else(|| {
            StageError::invalid_input(format!("header is missing numeric keyword '{key}'"))
        })
    }

    /// Returns true if the card exists.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Number of cards.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the header has no cards.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Pixels plus header, as produced by ingest and calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Shared, immutable pixel data.
    pub pixels: Arc<PixelGrid>,
    /// Frame header.
    pub metadata: Metadata,
}

impl Frame {
    /// Creates a frame.
    #[must_use]
    pub fn new(pixels: PixelGrid, metadata: Metadata) -> Self {
        Self {
            pixels: Arc::new(pixels),
            metadata,
        }
    }
}

/// A candidate object position in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    /// Column.
    pub x: i64,
    /// Row.
    pub y: i64,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f64,
}

impl Detection {
    /// Creates a detection, clamping confidence into `[0, 1]`.
    #[must_use]
    pub fn new(x: i64, y: i64, confidence: f64) -> Self {
        Self {
            x,
            y,
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Detections together with the calibrated header they were found in.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionBatch {
    /// Detected candidates, possibly empty.
    pub detections: Vec<Detection>,
    /// Header of the calibrated frame.
    pub metadata: Metadata,
}

impl DetectionBatch {
    /// Creates a batch.
    #[must_use]
    pub fn new(detections: Vec<Detection>, metadata: Metadata) -> Self {
        Self {
            detections,
            metadata,
        }
    }
}

/// Classical orbital elements.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeplerianElements {
    /// Semi-major axis in AU.
    pub a: f64,
    /// Eccentricity.
    pub e: f64,
    /// Inclination in degrees.
    pub i: f64,
    /// Longitude of the ascending node in degrees.
    pub node: f64,
    /// Argument of periapsis in degrees.
    pub arg_peri: f64,
    /// Mean anomaly in degrees.
    pub mean_anom: f64,
}

/// Orbit estimate for one detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbitEstimate {
    /// Right ascension in degrees, in `[0, 360)`.
    pub ra: f64,
    /// Declination in degrees.
    pub dec: f64,
    /// Observation epoch, ISO-8601 UTC.
    pub epoch: String,
    /// Estimated elements.
    pub elements: KeplerianElements,
    /// Confidence carried over from the detection.
    pub confidence: f64,
}
