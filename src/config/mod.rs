//! Application Configuration
//!
//! User settings stored in TOML format.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// OCR analytics logging
    pub analytics: AnalyticsConfig,
    /// Place resolution settings
    pub resolver: ResolverConfig,
    /// Storage file names
    pub storage: StorageConfig,
}

/// OCR analytics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    /// Record one analytics row per recognition attempt
    pub enabled: bool,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Nearby-search and reverse-geocode settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Search radius around the device location, in meters
    pub search_radius_m: f64,
    /// Give up on the nearby search after this long
    pub search_timeout_ms: u64,
    /// Give up on reverse geocoding after this long
    pub geocode_timeout_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            search_radius_m: 500.0,
            search_timeout_ms: 5000,
            geocode_timeout_ms: 5000,
        }
    }
}

impl ResolverConfig {
    pub fn search_timeout(&self) -> Duration {
        Duration::from_millis(self.search_timeout_ms)
    }

    pub fn geocode_timeout(&self) -> Duration {
        Duration::from_millis(self.geocode_timeout_ms)
    }
}

/// Storage settings (file names inside the data directory)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Saved places database
    pub database_file: String,
    /// OCR analytics database
    pub analytics_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "places.sqlite".to_string(),
            analytics_file: "ocr_analysis.sqlite".to_string(),
        }
    }
}

/// Load configuration from file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = toml::from_str(&content)?;
    if !(config.resolver.search_radius_m > 0.0) {
        anyhow::bail!(
            "resolver.search_radius_m must be positive, got {}",
            config.resolver.search_radius_m
        );
    }
    Ok(config)
}

/// Save configuration to file
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
