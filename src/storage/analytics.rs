//! OCR analytics log
//!
//! One append-only row per recognition attempt, later annotated with the
//! user's correction so per-method accuracy can be measured. A downscaled
//! JPEG of each analysed photo is kept beside the database so attempts can be
//! checked against what the camera saw. Informational only: nothing here
//! affects which label a capture gets.

use chrono::{Local, Timelike};
use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{RgbImage, RgbaImage};
use parking_lot::Mutex;
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection};
use serde::Serialize;
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::PipelineResult;
use crate::vision::{BrightnessGrid, DetectionMethod, MultiPassResult, ScoringOutcome};

/// Hex characters of the SHA-256 digest kept as the image hash
const HASH_PREFIX_LEN: usize = 32;

/// Average brightness above which a photo counts as having lit signage
const BRIGHT_TEXT_THRESHOLD: f32 = 0.6;

/// Folder next to the analytics database holding the saved photos
pub const IMAGES_DIR_NAME: &str = "ocr_images";

/// Saved photos are scaled down to at most this width
pub const MAX_SAVED_WIDTH: u32 = 800;

const SAVED_JPEG_QUALITY: u8 = 70;

/// Local time bucket of an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeOfDay {
    Morning,
    Afternoon,
    Evening,
    Night,
}

impl TimeOfDay {
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            6..=11 => TimeOfDay::Morning,
            12..=16 => TimeOfDay::Afternoon,
            17..=19 => TimeOfDay::Evening,
            _ => TimeOfDay::Night,
        }
    }

    pub fn now() -> Self {
        Self::from_hour(Local::now().hour())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TimeOfDay::Morning => "morning",
            TimeOfDay::Afternoon => "afternoon",
            TimeOfDay::Evening => "evening",
            TimeOfDay::Night => "night",
        }
    }
}

/// Truncated SHA-256 hex digest of the encoded image
pub fn image_hash(encoded: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(encoded);
    let mut hash = format!("{:x}", hasher.finalize());
    hash.truncate(HASH_PREFIX_LEN);
    hash
}

/// Candidate as stored in the `all_candidates` column
#[derive(Serialize)]
struct CandidateSummary<'a> {
    text: &'a str,
    score: f32,
    confidence: f32,
}

/// Per-method count as stored in the `all_methods_summary` column
#[derive(Serialize)]
struct MethodSummary {
    method: DetectionMethod,
    detections: usize,
}

/// One recognition attempt
#[derive(Debug, Clone, PartialEq)]
pub struct OcrAttempt {
    pub image_hash: String,
    pub brightness_avg: f32,
    pub time_of_day: TimeOfDay,
    pub selected_text: Option<String>,
    pub selected_score: Option<f32>,
    pub selected_confidence: Option<f32>,
    pub selected_method: Option<DetectionMethod>,
    pub selected_position: Option<(f32, f32)>,
    pub selected_size: Option<f32>,
    /// JSON array of the ranked candidates
    pub all_candidates: String,
    /// JSON array of detection counts per method
    pub all_methods_summary: String,
    pub has_bright_text: bool,
    pub processing_time_ms: u64,
    pub num_candidates: usize,
    pub num_methods_detected: usize,
    pub console_log: String,
    /// Saved copy of the photo, if one was written
    pub image_path: Option<PathBuf>,
}

impl OcrAttempt {
    /// Summarize one capture's recognition and scoring
    pub fn build(
        encoded: &[u8],
        grid: &BrightnessGrid,
        passes: &MultiPassResult,
        outcome: &ScoringOutcome,
        time_of_day: TimeOfDay,
    ) -> PipelineResult<Self> {
        let brightness_avg = grid.average();
        let top = outcome.ranked.first();

        // The first raw detection with the selected text supplies method/position/size
        let selected_detection = top.and_then(|candidate| {
            let wanted = candidate.text.to_lowercase();
            passes
                .detections
                .iter()
                .find(|d| d.text.to_lowercase() == wanted)
        });

        let candidates: Vec<CandidateSummary<'_>> = outcome
            .ranked
            .iter()
            .map(|c| CandidateSummary {
                text: &c.text,
                score: c.score,
                confidence: c.confidence,
            })
            .collect();

        let method_counts = passes.method_counts();
        let methods: Vec<MethodSummary> = method_counts
            .iter()
            .map(|(&method, &detections)| MethodSummary { method, detections })
            .collect();

        Ok(Self {
            image_hash: image_hash(encoded),
            brightness_avg,
            time_of_day,
            selected_text: top.map(|c| c.text.clone()),
            selected_score: top.map(|c| c.score),
            selected_confidence: top.map(|c| c.confidence),
            selected_method: selected_detection.map(|d| d.method),
            selected_position: selected_detection
                .map(|d| (d.bounding_box.mid_x(), d.bounding_box.mid_y())),
            selected_size: selected_detection.map(|d| d.size()),
            all_candidates: serde_json::to_string(&candidates)?,
            all_methods_summary: serde_json::to_string(&methods)?,
            has_bright_text: brightness_avg > BRIGHT_TEXT_THRESHOLD,
            processing_time_ms: passes.processing_time_ms,
            num_candidates: outcome.ranked.len(),
            num_methods_detected: method_counts.len(),
            console_log: console_log(&method_counts, passes, outcome),
            image_path: None,
        })
    }

    /// "upper" when the selected text sits in the top half of the photo
    pub fn text_position(&self) -> &'static str {
        match self.selected_position {
            Some((_, y)) if y > 0.5 => "upper",
            _ => "lower",
        }
    }
}

fn console_log(
    counts: &BTreeMap<DetectionMethod, usize>,
    passes: &MultiPassResult,
    outcome: &ScoringOutcome,
) -> String {
    let mut log = String::new();
    for (method, count) in counts {
        let _ = writeln!(log, "{method}: {count} detections");
    }
    for method in &passes.failed_passes {
        let _ = writeln!(log, "{method}: skipped");
    }
    for candidate in &outcome.ranked {
        let _ = writeln!(log, "{}", candidate.debug);
    }
    match &outcome.best {
        Some(best) => {
            let _ = write!(log, "selected: {best}");
        }
        None => log.push_str("selected: none"),
    }
    log
}

/// Overall accuracy over attempts that received feedback
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AccuracyStats {
    pub total: u64,
    pub correct: u64,
    /// Percentage, 0 when there is no feedback yet
    pub accuracy: f32,
}

/// Accuracy of attempts grouped by the method of their selected text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MethodPerformance {
    pub method: String,
    pub success_rate: f32,
    pub count: u64,
}

fn percentage(correct: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        correct as f32 / total as f32 * 100.0
    }
}

/// Scale `pixels` down to `max_width` (keeping aspect) and drop alpha
fn downscale_rgb(pixels: &RgbaImage, max_width: u32) -> RgbImage {
    let (width, height) = pixels.dimensions();
    if width <= max_width {
        return pixels.convert();
    }
    let scaled_height = ((height as u64 * max_width as u64) / width as u64).max(1) as u32;
    imageops::resize(pixels, max_width, scaled_height, FilterType::Triangle).convert()
}

fn write_jpeg(pixels: &RgbaImage, dir: &Path, path: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let rgb = downscale_rgb(pixels, MAX_SAVED_WIDTH);
    let writer = BufWriter::new(File::create(path)?);
    JpegEncoder::new_with_quality(writer, SAVED_JPEG_QUALITY).encode_image(&rgb)?;
    Ok(())
}

/// SQLite-backed attempt log
pub struct AnalyticsLog {
    conn: Mutex<Connection>,
    images_dir: PathBuf,
}

impl AnalyticsLog {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS ocr_attempts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
                image_hash TEXT,
                brightness_avg REAL,
                time_of_day TEXT,
                selected_text TEXT,
                selected_score REAL,
                selected_confidence REAL,
                selected_method TEXT,
                selected_position_x REAL,
                selected_position_y REAL,
                selected_size REAL,
                corrected_text TEXT,
                was_correct INTEGER DEFAULT NULL,
                correction_timestamp DATETIME,
                all_candidates TEXT,
                all_methods_summary TEXT,
                has_bright_text INTEGER,
                text_position TEXT,
                processing_time_ms INTEGER,
                num_candidates INTEGER,
                num_methods_detected INTEGER,
                console_log TEXT,
                image_path TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_was_correct ON ocr_attempts(was_correct);
            CREATE INDEX IF NOT EXISTS idx_selected_method ON ocr_attempts(selected_method);
            CREATE INDEX IF NOT EXISTS idx_selected_text ON ocr_attempts(selected_text);",
        )?;

        // Logs created before photos were kept lack the column
        let has_image_path: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('ocr_attempts') WHERE name = 'image_path'",
            [],
            |row| row.get(0),
        )?;
        if has_image_path == 0 {
            conn.execute_batch("ALTER TABLE ocr_attempts ADD COLUMN image_path TEXT")?;
        }

        let images_dir = path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(IMAGES_DIR_NAME);
        debug!("OCR analytics log opened at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
            images_dir,
        })
    }

    /// Directory the analysed photos are written to
    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Write a JPEG copy of `pixels` as `<hash>.jpg`, at most
    /// [`MAX_SAVED_WIDTH`] wide.
    ///
    /// Returns `None` when the photo is empty or the file could not be written.
    pub fn save_image(&self, pixels: &RgbaImage, hash: &str) -> Option<PathBuf> {
        if pixels.width() == 0 || pixels.height() == 0 {
            return None;
        }
        let path = self.images_dir.join(format!("{hash}.jpg"));
        match write_jpeg(pixels, &self.images_dir, &path) {
            Ok(()) => {
                debug!("OCR image saved to {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("Failed to save OCR image {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Append one attempt; returns its row id
    pub fn log_attempt(&self, attempt: &OcrAttempt) -> PipelineResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO ocr_attempts (
                image_hash, brightness_avg, time_of_day,
                selected_text, selected_score, selected_confidence, selected_method,
                selected_position_x, selected_position_y, selected_size,
                all_candidates, all_methods_summary,
                has_bright_text, text_position,
                processing_time_ms, num_candidates, num_methods_detected,
                console_log, image_path
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            params![
                attempt.image_hash,
                attempt.brightness_avg,
                attempt.time_of_day.as_str(),
                attempt.selected_text,
                attempt.selected_score,
                attempt.selected_confidence,
                attempt.selected_method.map(|m| m.label()),
                attempt.selected_position.map(|(x, _)| x),
                attempt.selected_position.map(|(_, y)| y),
                attempt.selected_size,
                attempt.all_candidates,
                attempt.all_methods_summary,
                attempt.has_bright_text,
                attempt.text_position(),
                attempt.processing_time_ms as i64,
                attempt.num_candidates as i64,
                attempt.num_methods_detected as i64,
                attempt.console_log,
                attempt.image_path.as_deref().map(|p| p.to_string_lossy().into_owned()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Attach a user correction to the latest attempt that selected `original`.
    ///
    /// Returns `false` if no attempt selected that text.
    pub fn log_correction(&self, original: &str, corrected: &str) -> PipelineResult<bool> {
        let was_correct = original.to_lowercase() == corrected.to_lowercase();
        let updated = self.conn.lock().execute(
            "UPDATE ocr_attempts
             SET corrected_text = ?1, was_correct = ?2, correction_timestamp = CURRENT_TIMESTAMP
             WHERE id = (
                SELECT id FROM ocr_attempts WHERE selected_text = ?3 ORDER BY id DESC LIMIT 1
             )",
            params![corrected, was_correct, original],
        )?;
        if updated > 0 {
            debug!("Correction logged: '{}' -> '{}'", original, corrected);
        }
        Ok(updated > 0)
    }

    pub fn accuracy_stats(&self) -> PipelineResult<AccuracyStats> {
        let (total, correct): (i64, i64) = self.conn.lock().query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN was_correct = 1 THEN 1 ELSE 0 END), 0)
             FROM ocr_attempts WHERE was_correct IS NOT NULL",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let (total, correct) = (total as u64, correct as u64);
        Ok(AccuracyStats {
            total,
            correct,
            accuracy: percentage(correct, total),
        })
    }

    /// Success rate per selected method, most correct first
    pub fn method_performance(&self) -> PipelineResult<Vec<MethodPerformance>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT selected_method, COUNT(*) AS total,
                    SUM(CASE WHEN was_correct = 1 THEN 1 ELSE 0 END) AS correct
             FROM ocr_attempts
             WHERE was_correct IS NOT NULL AND selected_method IS NOT NULL
             GROUP BY selected_method
             ORDER BY correct DESC, selected_method ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let method: String = row.get(0)?;
            let total: i64 = row.get(1)?;
            let correct: i64 = row.get(2)?;
            Ok((method, total as u64, correct as u64))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (method, count, correct) = row?;
            results.push(MethodPerformance {
                method,
                success_rate: percentage(correct, count),
                count,
            });
        }
        Ok(results)
    }

    /// Most recent attempts as JSON objects keyed by column name
    pub fn export_recent(&self, limit: usize) -> PipelineResult<Value> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT * FROM ocr_attempts ORDER BY id DESC LIMIT ?1")?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        let mut rows = stmt.query(params![limit as i64])?;
        let mut exported = Vec::new();
        while let Some(row) = rows.next()? {
            let mut object = Map::new();
            for (i, name) in columns.iter().enumerate() {
                let value = match row.get_ref(i)? {
                    ValueRef::Null => Value::Null,
                    ValueRef::Integer(v) => json!(v),
                    ValueRef::Real(v) => json!(v),
                    ValueRef::Text(bytes) => json!(String::from_utf8_lossy(bytes)),
                    ValueRef::Blob(_) => continue,
                };
                object.insert(name.clone(), value);
            }
            exported.push(Value::Object(object));
        }
        Ok(Value::Array(exported))
    }
}
