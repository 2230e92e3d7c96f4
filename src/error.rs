//! Error taxonomy for the capture pipeline
//!
//! Component-internal failures are absorbed inside the pipeline and turned into
//! "no data" states. Only [`PipelineError::PersistenceFailed`] is surfaced to the
//! caller of a capture.

use thiserror::Error;

/// Errors raised by pipeline components
#[derive(Error, Debug)]
pub enum PipelineError {
    /// The text recognition service could not run
    #[error("text recognition unavailable: {0}")]
    RecognitionUnavailable(String),

    /// A preprocessing filter stage produced no output
    #[error("preprocessing failed at {stage}")]
    PreprocessingFailed {
        /// Name of the filter stage that failed
        stage: &'static str,
    },

    /// The nearby-place search failed or timed out
    #[error("nearby search failed: {0}")]
    SearchFailed(String),

    /// Reverse geocoding failed or timed out
    #[error("reverse geocode failed: {0}")]
    GeocodeFailed(String),

    /// Saving the capture failed
    #[error("persistence failed: {0}")]
    PersistenceFailed(String),

    /// The captured bytes could not be decoded into an image
    #[error("image decode")]
    ImageDecode(#[from] image::ImageError),

    /// Invalid configuration
    #[error("configuration: {message}")]
    Config {
        /// Description of the problem
        message: String,
    },
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::PersistenceFailed(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::PersistenceFailed(err.to_string())
    }
}

/// Result alias used across the library
pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
