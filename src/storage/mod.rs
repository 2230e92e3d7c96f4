//! Storage Layer
//!
//! Saved places and OCR analytics, each in its own SQLite file.

pub mod analytics;
pub mod database;

pub use analytics::{AccuracyStats, AnalyticsLog, MethodPerformance, OcrAttempt, TimeOfDay};
pub use database::{Database, PhotoRecord, PhotoStore, SavedPhoto};

use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::error::PipelineResult;

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "storefrontlens", "StorefrontLens")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Get the application data directory
pub fn get_data_dir() -> Result<PathBuf> {
    let data_dir = project_dirs()?.data_dir().to_path_buf();
    std::fs::create_dir_all(&data_dir)?;
    Ok(data_dir)
}

/// Get the configuration directory
pub fn get_config_dir() -> Result<PathBuf> {
    let config_dir = project_dirs()?.config_dir().to_path_buf();
    std::fs::create_dir_all(&config_dir)?;
    Ok(config_dir)
}

/// Replace a photo's label and, if analytics are on, record the correction
/// against the attempt that produced the old label.
///
/// Returns `false` if no photo has that id.
pub fn apply_correction(
    store: &dyn PhotoStore,
    analytics: Option<&AnalyticsLog>,
    id: i64,
    corrected: &str,
) -> PipelineResult<bool> {
    let Some(previous) = store.relabel_photo(id, corrected)? else {
        return Ok(false);
    };
    info!("Photo {} relabeled to '{}'", id, corrected);

    if let (Some(log), Some(original)) = (analytics, previous.record.extracted_text.as_deref()) {
        if let Err(e) = log.log_correction(original, corrected) {
            warn!("Failed to record correction: {}", e);
        }
    }
    Ok(true)
}
