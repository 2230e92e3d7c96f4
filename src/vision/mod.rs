//! Vision/OCR Layer
//!
//! Turns a captured photo into a ranked list of storefront label candidates:
//! - fixed preprocessing programs ([`preprocess`])
//! - five recognition passes over the original and preprocessed images ([`multi_pass`])
//! - a coarse luminance grid for illuminated signage ([`brightness`])
//! - composite scoring of the merged detections ([`scoring`])

pub mod brightness;
pub mod multi_pass;
pub mod preprocess;
pub mod recognition;
pub mod scoring;

pub use brightness::BrightnessGrid;
pub use multi_pass::{MultiPassOrchestrator, MultiPassResult, RecognitionPass};
pub use preprocess::{preprocess, PreprocessMode};
pub use recognition::{RecognitionLevel, RecognitionRequest, RecognizedText, TextRecognizer};
pub use scoring::{score_detections, ScoredCandidate, ScoringOutcome};

use serde::{Deserialize, Serialize};

/// Normalized rectangle in [0,1]^2 with the origin at the bottom-left corner
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl NormalizedRect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn mid_x(&self) -> f32 {
        self.x + self.width / 2.0
    }

    /// Vertical center; larger values are higher up in the photo
    pub fn mid_y(&self) -> f32 {
        self.y + self.height / 2.0
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }
}

/// Which recognition pass produced a detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DetectionMethod {
    #[serde(rename = "standard")]
    Standard,
    #[serde(rename = "enhanced-aggressive")]
    EnhancedAggressive,
    #[serde(rename = "enhanced-gentle")]
    EnhancedGentle,
    #[serde(rename = "enhanced-color")]
    EnhancedColorBoost,
    #[serde(rename = "fast")]
    Fast,
}

impl DetectionMethod {
    /// Stable label used in logs and analytics
    pub fn label(&self) -> &'static str {
        match self {
            DetectionMethod::Standard => "standard",
            DetectionMethod::EnhancedAggressive => "enhanced-aggressive",
            DetectionMethod::EnhancedGentle => "enhanced-gentle",
            DetectionMethod::EnhancedColorBoost => "enhanced-color",
            DetectionMethod::Fast => "fast",
        }
    }
}

impl std::fmt::Display for DetectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A single text observation tagged with the pass that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub text: String,
    /// Recognizer confidence in (0, 1]
    pub confidence: f32,
    /// Normalized box, origin bottom-left
    pub bounding_box: NormalizedRect,
    pub method: DetectionMethod,
}

impl RawDetection {
    /// Bounding-box area, used as the size signal
    pub fn size(&self) -> f32 {
        self.bounding_box.area()
    }
}
