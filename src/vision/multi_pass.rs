//! Multi-pass recognition
//!
//! Runs the recognizer once over the original photo at a strict threshold, once
//! over each preprocessed variant at a lenient threshold, and once in fast mode.
//! Text that survives several independent passes is stronger evidence than a
//! single high-confidence read, so every detection is kept and tagged with its
//! pass.

use image::RgbaImage;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};
use crate::vision::{
    preprocess, DetectionMethod, PreprocessMode, RawDetection, RecognitionLevel,
    RecognitionRequest, TextRecognizer,
};

/// One recognizer invocation: which image variant, which request parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognitionPass {
    pub method: DetectionMethod,
    /// `None` runs on the original photo
    pub preprocess: Option<PreprocessMode>,
    pub request: RecognitionRequest,
}

const STANDARD_REQUEST: RecognitionRequest = RecognitionRequest {
    level: RecognitionLevel::Accurate,
    min_confidence: 0.5,
    min_text_height: None,
};

const ENHANCED_REQUEST: RecognitionRequest = RecognitionRequest {
    level: RecognitionLevel::Accurate,
    min_confidence: 0.2,
    min_text_height: Some(0.03),
};

const FAST_REQUEST: RecognitionRequest = RecognitionRequest {
    level: RecognitionLevel::Fast,
    min_confidence: 0.6,
    min_text_height: None,
};

/// The fixed pass table, in merge order
pub const PASSES: [RecognitionPass; 5] = [
    RecognitionPass {
        method: DetectionMethod::Standard,
        preprocess: None,
        request: STANDARD_REQUEST,
    },
    RecognitionPass {
        method: DetectionMethod::EnhancedAggressive,
        preprocess: Some(PreprocessMode::Aggressive),
        request: ENHANCED_REQUEST,
    },
    RecognitionPass {
        method: DetectionMethod::EnhancedGentle,
        preprocess: Some(PreprocessMode::Gentle),
        request: ENHANCED_REQUEST,
    },
    RecognitionPass {
        method: DetectionMethod::EnhancedColorBoost,
        preprocess: Some(PreprocessMode::ColorBoost),
        request: ENHANCED_REQUEST,
    },
    RecognitionPass {
        method: DetectionMethod::Fast,
        preprocess: None,
        request: FAST_REQUEST,
    },
];

/// Merged output of all passes
#[derive(Debug, Clone, Default)]
pub struct MultiPassResult {
    /// Every surviving detection, in pass-table order
    pub detections: Vec<RawDetection>,
    /// Passes that were skipped or failed
    pub failed_passes: Vec<DetectionMethod>,
    pub processing_time_ms: u64,
}

impl MultiPassResult {
    /// Detection count per pass that produced anything
    pub fn method_counts(&self) -> BTreeMap<DetectionMethod, usize> {
        let mut counts = BTreeMap::new();
        for detection in &self.detections {
            *counts.entry(detection.method).or_insert(0) += 1;
        }
        counts
    }
}

/// Runs the pass table against a recognizer
pub struct MultiPassOrchestrator {
    recognizer: Arc<dyn TextRecognizer>,
}

impl MultiPassOrchestrator {
    pub fn new(recognizer: Arc<dyn TextRecognizer>) -> Self {
        Self { recognizer }
    }

    /// Run all passes concurrently on the blocking pool and merge the results.
    ///
    /// Failed passes are logged and skipped; this never fails as a whole.
    pub async fn run(&self, image: Arc<RgbaImage>) -> MultiPassResult {
        let start = Instant::now();

        let tasks = PASSES.iter().map(|&pass| {
            let recognizer = Arc::clone(&self.recognizer);
            let image = Arc::clone(&image);
            tokio::task::spawn_blocking(move || run_pass(recognizer.as_ref(), &image, &pass))
        });
        let outcomes = futures_util::future::join_all(tasks).await;

        let mut result = MultiPassResult::default();
        for (pass, outcome) in PASSES.iter().zip(outcomes) {
            match outcome {
                Ok(Ok(detections)) => {
                    debug!("Pass {}: {} detections", pass.method, detections.len());
                    result.detections.extend(detections);
                }
                Ok(Err(e)) => {
                    warn!("Pass {} skipped: {}", pass.method, e);
                    result.failed_passes.push(pass.method);
                }
                Err(e) => {
                    warn!("Pass {} worker failed: {}", pass.method, e);
                    result.failed_passes.push(pass.method);
                }
            }
        }

        result.processing_time_ms = start.elapsed().as_millis() as u64;
        debug!(
            "Multi-pass recognition complete in {}ms: {} detections, {} failed passes",
            result.processing_time_ms,
            result.detections.len(),
            result.failed_passes.len()
        );
        result
    }
}

/// Preprocess (if the pass asks for it), recognize, enforce the pass floor and tag
pub fn run_pass(
    recognizer: &dyn TextRecognizer,
    image: &RgbaImage,
    pass: &RecognitionPass,
) -> PipelineResult<Vec<RawDetection>> {
    let source: Cow<'_, RgbaImage> = match pass.preprocess {
        Some(mode) => Cow::Owned(preprocess(image, mode).ok_or(
            PipelineError::PreprocessingFailed {
                stage: preprocess_stage_name(mode),
            },
        )?),
        None => Cow::Borrowed(image),
    };

    let observations = recognizer.recognize(&source, &pass.request)?;
    let min_height = pass.request.min_text_height.unwrap_or(0.0);

    Ok(observations
        .into_iter()
        .filter(|o| o.confidence > pass.request.min_confidence)
        .filter(|o| o.bounding_box.height >= min_height)
        .filter(|o| !o.text.trim().is_empty())
        .map(|o| RawDetection {
            text: o.text,
            confidence: o.confidence,
            bounding_box: o.bounding_box,
            method: pass.method,
        })
        .collect())
}

fn preprocess_stage_name(mode: PreprocessMode) -> &'static str {
    match mode {
        PreprocessMode::Aggressive => "aggressive preprocessing",
        PreprocessMode::Gentle => "gentle preprocessing",
        PreprocessMode::ColorBoost => "color-boost preprocessing",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{NormalizedRect, RecognizedText};
    use image::Rgba;
    use parking_lot::Mutex;

    /// Returns the same observations for every call and records the requests
    struct FixedRecognizer {
        observations: Vec<RecognizedText>,
        requests: Mutex<Vec<RecognitionRequest>>,
    }

    impl FixedRecognizer {
        fn new(observations: Vec<RecognizedText>) -> Self {
            Self {
                observations,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl TextRecognizer for FixedRecognizer {
        fn recognize(
            &self,
            _image: &RgbaImage,
            request: &RecognitionRequest,
        ) -> PipelineResult<Vec<RecognizedText>> {
            self.requests.lock().push(*request);
            Ok(self.observations.clone())
        }
    }

    struct OfflineRecognizer;

    impl TextRecognizer for OfflineRecognizer {
        fn recognize(
            &self,
            _image: &RgbaImage,
            _request: &RecognitionRequest,
        ) -> PipelineResult<Vec<RecognizedText>> {
            Err(PipelineError::RecognitionUnavailable("no engine".to_string()))
        }
    }

    fn observation(text: &str, confidence: f32, height: f32) -> RecognizedText {
        RecognizedText {
            text: text.to_string(),
            confidence,
            bounding_box: NormalizedRect::new(0.3, 0.6, 0.4, height),
        }
    }

    fn photo() -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(40, 40, Rgba([120, 80, 60, 255])))
    }

    #[test]
    fn test_pass_table() {
        assert_eq!(PASSES.len(), 5);
        assert_eq!(PASSES[0].request.min_confidence, 0.5);
        assert_eq!(PASSES[4].request.level, RecognitionLevel::Fast);
        assert_eq!(PASSES[4].request.min_confidence, 0.6);
        for pass in &PASSES[1..4] {
            assert!(pass.preprocess.is_some());
            assert_eq!(pass.request.min_confidence, 0.2);
            assert_eq!(pass.request.min_text_height, Some(0.03));
        }
    }

    #[tokio::test]
    async fn test_thresholds_applied_per_pass() {
        let recognizer = Arc::new(FixedRecognizer::new(vec![
            observation("SIGN", 0.55, 0.1),
            observation("faint", 0.3, 0.1),
            observation("strong", 0.9, 0.1),
        ]));
        let orchestrator = MultiPassOrchestrator::new(recognizer.clone());
        let result = orchestrator.run(photo()).await;

        let counts = result.method_counts();
        // 0.55 and 0.9 pass the standard floor
        assert_eq!(counts[&DetectionMethod::Standard], 2);
        // Everything passes the enhanced floor
        assert_eq!(counts[&DetectionMethod::EnhancedAggressive], 3);
        assert_eq!(counts[&DetectionMethod::EnhancedGentle], 3);
        assert_eq!(counts[&DetectionMethod::EnhancedColorBoost], 3);
        // Only 0.9 passes the fast floor
        assert_eq!(counts[&DetectionMethod::Fast], 1);
        assert!(result.failed_passes.is_empty());
        assert_eq!(recognizer.requests.lock().len(), 5);
    }

    #[tokio::test]
    async fn test_merge_order_follows_pass_table() {
        let recognizer = Arc::new(FixedRecognizer::new(vec![observation("CAFE", 0.95, 0.1)]));
        let result = MultiPassOrchestrator::new(recognizer).run(photo()).await;
        let methods: Vec<DetectionMethod> = result.detections.iter().map(|d| d.method).collect();
        assert_eq!(methods, PASSES.iter().map(|p| p.method).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_small_text_dropped_from_enhanced_passes() {
        let recognizer = Arc::new(FixedRecognizer::new(vec![observation("tiny", 0.95, 0.01)]));
        let result = MultiPassOrchestrator::new(recognizer).run(photo()).await;
        let counts = result.method_counts();
        assert_eq!(counts.get(&DetectionMethod::EnhancedGentle), None);
        assert_eq!(counts[&DetectionMethod::Standard], 1);
        assert_eq!(counts[&DetectionMethod::Fast], 1);
    }

    #[tokio::test]
    async fn test_unavailable_recognizer_degrades_to_empty() {
        let result = MultiPassOrchestrator::new(Arc::new(OfflineRecognizer))
            .run(photo())
            .await;
        assert!(result.detections.is_empty());
        assert_eq!(result.failed_passes.len(), 5);
    }

    #[tokio::test]
    async fn test_missing_preprocessed_variant_skips_only_that_pass() {
        let recognizer = Arc::new(FixedRecognizer::new(vec![observation("OPEN", 0.9, 0.1)]));
        // Zero-sized image: every preprocessing program fails, raw passes still run
        let result = MultiPassOrchestrator::new(recognizer)
            .run(Arc::new(RgbaImage::new(0, 0)))
            .await;
        assert_eq!(result.failed_passes.len(), 3);
        assert_eq!(result.detections.len(), 2);
    }
}
