//! Preview images for the query surface.

use crate::core::{Frame, PixelGrid};
use crate::errors::AstroflowError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt::Debug;

/// Turns a frame into the string served as `previewImage`.
pub trait PreviewEncoder: Send + Sync + Debug {
    /// Encodes `frame`.
    fn encode(&self, frame: &Frame) -> Result<String, AstroflowError>;
}

/// Encodes frames as base64 8-bit binary PGM (`P5`), linearly stretched
/// between the frame minimum and maximum.
///
/// Frames larger than `max_side` on either axis are decimated by an integer
/// stride first.
#[derive(Debug, Clone, Copy)]
pub struct PgmPreviewEncoder {
    max_side: usize,
}

impl Default for PgmPreviewEncoder {
    fn default() -> Self {
        Self { max_side: 256 }
    }
}

impl PgmPreviewEncoder {
    /// Creates an encoder with the default size cap.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the largest allowed side in pixels.
    #[must_use]
    pub fn with_max_side(mut self, max_side: usize) -> Self {
        self.max_side = max_side.max(1);
        self
    }

    /// Renders the raw PGM bytes.
    pub fn render(&self, pixels: &PixelGrid) -> Result<Vec<u8>, AstroflowError> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return Err(AstroflowError::Preview("frame has no pixels".to_string()));
        }
        if !pixels.is_finite() {
            return Err(AstroflowError::Preview(
                "frame contains non-finite pixel values".to_string(),
            ));
        }

        let stride = pixels
            .width()
            .max(pixels.height())
            .div_ceil(self.max_side)
            .max(1);
        let out_w = pixels.width().div_ceil(stride);
        let out_h = pixels.height().div_ceil(stride);

        let (min, max) = pixels.min_max();
        let span = f64::from(max) - f64::from(min);

        let header = format!("P5\n{out_w} {out_h}\n255\n");
        let mut bytes = Vec::with_capacity(header.len() + out_w * out_h);
        bytes.extend_from_slice(header.as_bytes());
        for y in (0..pixels.height()).step_by(stride) {
            for x in (0..pixels.width()).step_by(stride) {
                let value = pixels.get(x, y).map_or(0.0, f64::from);
                let level = if span > f64::EPSILON {
                    ((value - f64::from(min)) / span * 255.0).round()
                } else {
                    0.0
                };
                bytes.push(level.clamp(0.0, 255.0) as u8);
            }
        }
        Ok(bytes)
    }
}

impl PreviewEncoder for PgmPreviewEncoder {
    fn encode(&self, frame: &Frame) -> Result<String, AstroflowError> {
        Ok(STANDARD.encode(self.render(&frame.pixels)?))
    }
}
