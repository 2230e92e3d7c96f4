//! Candidate scoring
//!
//! Merges detections from every recognition pass into unique candidates and
//! ranks them with a composite of repetition, confidence, size, position and
//! brightness.

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::vision::{BrightnessGrid, RawDetection};

/// Maximum number of ranked candidates returned
pub const MAX_CANDIDATES: usize = 5;

const METHOD_WEIGHT: f32 = 0.20;
const CONFIDENCE_WEIGHT: f32 = 0.15;
const SIZE_WEIGHT: f32 = 0.20;
const POSITION_WEIGHT: f32 = 0.20;
const BRIGHTNESS_WEIGHT: f32 = 0.25;

/// A unique text with its composite score
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredCandidate {
    pub text: String,
    pub score: f32,
    /// Average recognizer confidence over the group
    pub confidence: f32,
    /// Human-readable breakdown of the score inputs
    pub debug: String,
}

/// Per-group signals that feed the composite score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSignals {
    /// Occurrences across all passes. Repeats under the same pass count too.
    pub method_count: f32,
    pub avg_confidence: f32,
    pub avg_size: f32,
    pub position_score: f32,
    pub brightness_score: f32,
}

impl ScoreSignals {
    pub fn brightness_bonus(&self) -> f32 {
        if self.brightness_score > 0.65 {
            0.5
        } else if self.brightness_score > 0.5 {
            0.25
        } else {
            0.0
        }
    }

    pub fn size_bonus(&self) -> f32 {
        if self.avg_size > 0.02 {
            0.3
        } else if self.avg_size > 0.01 {
            0.15
        } else {
            0.0
        }
    }

    /// Weighted sum plus the brightness and size bonuses
    pub fn composite(&self) -> f32 {
        self.method_count * METHOD_WEIGHT
            + self.avg_confidence * CONFIDENCE_WEIGHT
            + self.avg_size * SIZE_WEIGHT
            + self.position_score * POSITION_WEIGHT
            + self.brightness_score * BRIGHTNESS_WEIGHT
            + self.brightness_bonus()
            + self.size_bonus()
    }
}

/// Result of ranking one capture's detections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScoringOutcome {
    /// Text of the top-ranked candidate
    pub best: Option<String>,
    /// At most [`MAX_CANDIDATES`] candidates, best first
    pub ranked: Vec<ScoredCandidate>,
}

/// Upper-center placement scores highest: full vertical credit above the
/// midline, falling linearly below it, and horizontal credit falling off with
/// distance from the center.
pub fn position_score(mid_x: f32, mid_y: f32) -> f32 {
    let vertical = if mid_y > 0.5 { 1.0 } else { mid_y / 0.5 };
    let horizontal = 1.0 - (mid_x - 0.5).abs() * 2.0;
    (vertical + horizontal) / 2.0
}

/// Group detections by case-insensitive text, preserving first-appearance order
fn group_detections(detections: &[RawDetection]) -> Vec<Vec<&RawDetection>> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<Vec<&RawDetection>> = Vec::new();

    for detection in detections {
        let key = detection.text.to_lowercase();
        match index.get(&key) {
            Some(&i) => groups[i].push(detection),
            None => {
                index.insert(key, groups.len());
                groups.push(vec![detection]);
            }
        }
    }

    groups
}

fn signals_for(group: &[&RawDetection], grid: &BrightnessGrid) -> ScoreSignals {
    let count = group.len() as f32;
    let avg_confidence = group.iter().map(|d| d.confidence).sum::<f32>() / count;
    let avg_size = group.iter().map(|d| d.size()).sum::<f32>() / count;

    // Position and brightness come from the group's first detection
    let first_box = &group[0].bounding_box;

    ScoreSignals {
        method_count: count,
        avg_confidence,
        avg_size,
        position_score: position_score(first_box.mid_x(), first_box.mid_y()),
        brightness_score: grid.sample_at(first_box),
    }
}

/// Rank detections into at most [`MAX_CANDIDATES`] candidates.
///
/// Deterministic for a given input order: groups keep first-appearance order
/// and the sort is stable, so equal scores keep that order. An empty input
/// gives `(None, [])`.
pub fn score_detections(detections: &[RawDetection], grid: &BrightnessGrid) -> ScoringOutcome {
    if detections.is_empty() {
        return ScoringOutcome::default();
    }

    let mut scored: Vec<ScoredCandidate> = group_detections(detections)
        .into_iter()
        .map(|group| {
            let signals = signals_for(&group, grid);
            ScoredCandidate {
                text: group[0].text.clone(),
                score: signals.composite(),
                confidence: signals.avg_confidence,
                debug: format!(
                    "conf:{:.2} size:{:.4} pos:{:.2} bright:{:.2}",
                    signals.avg_confidence,
                    signals.avg_size,
                    signals.position_score,
                    signals.brightness_score
                ),
            }
        })
        .collect();

    // Vec::sort_by is stable
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));

    for (rank, candidate) in scored.iter().take(3).enumerate() {
        debug!(
            "Candidate {}: \"{}\" score {:.3} ({})",
            rank + 1,
            candidate.text,
            candidate.score,
            candidate.debug
        );
    }

    scored.truncate(MAX_CANDIDATES);
    ScoringOutcome {
        best: scored.first().map(|c| c.text.clone()),
        ranked: scored,
    }
}
