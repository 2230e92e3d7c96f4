//! Text recognition adapter boundary
//!
//! The optical text recognizer is an external service. This module only fixes
//! its contract: an image plus a [`RecognitionRequest`] in, raw text
//! observations with bottom-left-origin normalized boxes out.

use image::RgbaImage;
use serde::{Deserialize, Serialize};

use crate::error::PipelineResult;
use crate::vision::NormalizedRect;

/// Recognition quality/speed trade-off
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecognitionLevel {
    Accurate,
    Fast,
}

/// Parameters for a single recognizer invocation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionRequest {
    pub level: RecognitionLevel,
    /// Observations at or below this confidence are dropped
    pub min_confidence: f32,
    /// Minimum text height relative to the image height, if restricted
    pub min_text_height: Option<f32>,
}

/// One observation returned by the recognizer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedText {
    pub text: String,
    pub confidence: f32,
    /// Normalized box, origin bottom-left
    pub bounding_box: NormalizedRect,
}

/// External text-recognition service.
///
/// Implementations may block; the orchestrator always calls them from a
/// blocking worker thread.
pub trait TextRecognizer: Send + Sync {
    /// Recognize text in `image`.
    ///
    /// Returns [`crate::error::PipelineError::RecognitionUnavailable`] when the
    /// service cannot run at all. An image with no text is `Ok(vec![])`.
    fn recognize(
        &self,
        image: &RgbaImage,
        request: &RecognitionRequest,
    ) -> PipelineResult<Vec<RecognizedText>>;
}
