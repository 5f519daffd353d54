//! Error types for the astroflow pipeline.
//!
//! Two layers exist: [`StageError`] is what a single stage reports and what a
//! failed run carries into its snapshot, while [`AstroflowError`] covers the
//! library surface around the pipeline (configuration, startup, publication).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Classification of a stage failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageErrorKind {
    /// The referenced artifact does not exist.
    NotFound,
    /// The artifact exists but could not be read.
    IoError,
    /// A payload at a stage boundary was malformed or missing required metadata.
    InvalidInput,
    /// The detection collaborator failed.
    ModelError,
    /// The orbit collaborator failed.
    ComputationError,
    /// The overall-run watchdog fired.
    Timeout,
    /// Any uncategorized failure, including panics inside a stage.
    InternalError,
}

impl StageErrorKind {
    /// Returns the kind name as exposed on the query surface.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::IoError => "IoError",
            Self::InvalidInput => "InvalidInput",
            Self::ModelError => "ModelError",
            Self::ComputationError => "ComputationError",
            Self::Timeout => "Timeout",
            Self::InternalError => "InternalError",
        }
    }
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a stage.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct StageError {
    /// The failure classification.
    pub kind: StageErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl StageError {
    /// Creates a new stage error.
    #[must_use]
    pub fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::NotFound, message)
    }

    /// Creates an `IoError` error.
    #[must_use]
    pub fn io(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::IoError, message)
    }

    /// Creates an `InvalidInput` error.
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::InvalidInput, message)
    }

    /// Creates a `ModelError` error.
    #[must_use]
    pub fn model(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::ModelError, message)
    }

    /// Creates a `ComputationError` error.
    #[must_use]
    pub fn computation(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::ComputationError, message)
    }

    /// Creates a `Timeout` error.
    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::Timeout, message)
    }

    /// Creates an `InternalError` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StageErrorKind::InternalError, message)
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::not_found(err.to_string()),
            _ => Self::io(err.to_string()),
        }
    }
}

/// The main error type for astroflow library operations.
#[derive(Debug, Error)]
pub enum AstroflowError {
    /// Configuration was rejected.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A process-wide singleton was installed twice.
    #[error("{0} is already initialized")]
    AlreadyInitialized(&'static str),

    /// A process-wide singleton was read before it was installed.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    /// A preview image could not be produced.
    #[error("Preview encoding failed: {0}")]
    Preview(String),

    /// A run was handed to the store before it was finalized.
    #[error("Run {run_id} is not finalized")]
    InvalidRun {
        /// The offending run id.
        run_id: String,
    },

    /// A background task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AstroflowError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
