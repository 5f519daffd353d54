//! The unit of work flowing through the pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One observation artifact awaiting processing.
///
/// Observations are immutable once created and consumed by exactly one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    /// Stable identifier of the observation.
    pub id: String,
    /// Reference to the raw artifact (path, URI, or synthetic handle).
    pub artifact_ref: String,
    /// When the observation was produced.
    pub created_at: DateTime<Utc>,
}

impl Observation {
    /// Creates an observation stamped with the current time.
    #[must_use]
    pub fn new(id: impl Into<String>, artifact_ref: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            artifact_ref: artifact_ref.into(),
            created_at: Utc::now(),
        }
    }

    /// Returns the final path segment of the artifact reference.
    ///
    /// This is what the query surface reports as `filename`.
    #[must_use]
    pub fn filename(&self) -> &str {
        self.artifact_ref
            .rsplit(['/', '\\'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(&self.artifact_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filename_from_path() {
        let obs = Observation::new("obs-1", "/data/night-04/frame_0012.fits");
        assert_eq!(obs.filename(), "frame_0012.fits");
    }

    #[test]
    fn test_filename_from_synthetic_ref() {
        let obs = Observation::new("obs-2", "synthetic://7");
        assert_eq!(obs.filename(), "7");
    }

    #[test]
    fn test_filename_without_separator() {
        let obs = Observation::new("obs-3", "frame.fits");
        assert_eq!(obs.filename(), "frame.fits");
    }
}
