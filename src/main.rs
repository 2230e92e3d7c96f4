//! Storefront Lens - inspection tool
//!
//! Runs the candidate scorer and category classifier from the command line
//! and manages the saved-place and OCR analytics databases.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use storefront_lens::config::{self, AppConfig};
use storefront_lens::places::{categorize, Category, PoiCategory};
use storefront_lens::storage::{self, AnalyticsLog, Database, PhotoStore, SavedPhoto};
use storefront_lens::vision::{score_detections, BrightnessGrid, RawDetection};

/// Storefront Lens - storefront photo labelling
#[derive(Parser, Debug)]
#[command(name = "storefront-lens")]
#[command(about = "Inspect label scoring and manage saved storefront photos")]
struct Args {
    /// Use this config file instead of the one in the config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Score a JSON list of raw detections and print the ranked candidates
    Score {
        /// JSON file holding an array of detections
        #[arg(long)]
        detections: PathBuf,
        /// Photo used for the brightness grid
        #[arg(long)]
        image: Option<PathBuf>,
    },
    /// Classify a structured category code and/or a label
    Categorize {
        /// Structured category code, e.g. "restaurant"
        #[arg(long)]
        poi: Option<String>,
        #[arg(long)]
        text: Option<String>,
    },
    /// List saved places grouped by category
    Places {
        /// Only show this category
        #[arg(long)]
        category: Option<Category>,
    },
    /// Search saved places by label, category or address
    Search { query: String },
    /// Correct the label of a saved place
    Relabel { id: i64, text: String },
    /// Delete a saved place
    Delete { id: i64 },
    /// Show OCR accuracy statistics
    Stats,
    /// Export recent OCR attempts as JSON
    Export {
        #[arg(long, default_value = "100")]
        limit: usize,
    },
}

fn main() -> Result<()> {
    // Initialize logging; stdout is reserved for command output
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => load_or_create_config(),
    };

    match args.command {
        Command::Score { detections, image } => run_score(&detections, image.as_deref()),
        Command::Categorize { poi, text } => {
            let structured = poi.as_deref().map(PoiCategory::from_code);
            println!("{}", categorize(structured, text.as_deref()));
            Ok(())
        }
        Command::Places { category } => run_places(&config, category),
        Command::Search { query } => {
            let db = open_database(&config)?;
            print_photos(&db.search_photos(&query)?);
            Ok(())
        }
        Command::Relabel { id, text } => {
            let db = open_database(&config)?;
            let analytics = open_analytics(&config)?;
            if storage::apply_correction(&db, analytics.as_ref(), id, &text)? {
                println!("Photo {id} relabeled to '{text}'");
            } else {
                println!("No photo with id {id}");
            }
            Ok(())
        }
        Command::Delete { id } => {
            let db = open_database(&config)?;
            if db.delete_photo(id)? {
                println!("Deleted photo {id}");
            } else {
                println!("No photo with id {id}");
            }
            Ok(())
        }
        Command::Stats => run_stats(&config),
        Command::Export { limit } => {
            let log = AnalyticsLog::open(&analytics_path(&config)?)?;
            println!("{}", serde_json::to_string_pretty(&log.export_recent(limit)?)?);
            Ok(())
        }
    }
}

/// Load configuration from file or create default
fn load_or_create_config() -> AppConfig {
    if let Ok(config_dir) = storage::get_config_dir() {
        let config_path = config_dir.join("config.toml");
        if config_path.exists() {
            match config::load_config(&config_path) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", config_path);
                    return config;
                }
                Err(e) => tracing::warn!("Ignoring {:?}: {}", config_path, e),
            }
        } else if let Err(e) = config::save_config(&AppConfig::default(), &config_path) {
            tracing::warn!("Could not write default config: {}", e);
        }
    }
    info!("Using default configuration");
    AppConfig::default()
}

fn open_database(config: &AppConfig) -> Result<Database> {
    let path = storage::get_data_dir()?.join(&config.storage.database_file);
    Ok(Database::open(&path)?)
}

fn analytics_path(config: &AppConfig) -> Result<PathBuf> {
    Ok(storage::get_data_dir()?.join(&config.storage.analytics_file))
}

fn open_analytics(config: &AppConfig) -> Result<Option<AnalyticsLog>> {
    if !config.analytics.enabled {
        return Ok(None);
    }
    Ok(Some(AnalyticsLog::open(&analytics_path(config)?)?))
}

fn run_score(detections_path: &Path, image_path: Option<&Path>) -> Result<()> {
    let content = std::fs::read_to_string(detections_path)
        .with_context(|| format!("Failed to read {}", detections_path.display()))?;
    let detections: Vec<RawDetection> =
        serde_json::from_str(&content).context("Invalid detections JSON")?;

    let grid = match image_path {
        Some(path) => {
            let image = image::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?
                .to_rgba8();
            BrightnessGrid::analyze(&image)
        }
        None => BrightnessGrid::default(),
    };

    let outcome = score_detections(&detections, &grid);
    match &outcome.best {
        Some(best) => println!("Best: {best}"),
        None => println!("No text found"),
    }
    for (rank, candidate) in outcome.ranked.iter().enumerate() {
        println!(
            "{}. {} (score {:.3}, confidence {:.2})",
            rank + 1,
            candidate.text,
            candidate.score,
            candidate.confidence
        );
        println!("   {}", candidate.debug);
    }
    Ok(())
}

fn run_places(config: &AppConfig, only: Option<Category>) -> Result<()> {
    let db = open_database(config)?;
    let groups = db.photos_by_category()?;
    if groups.is_empty() {
        println!("No saved places");
    }
    for (category, photos) in groups {
        if only.is_some_and(|c| c.as_str() != category) {
            continue;
        }
        println!("{category} ({})", photos.len());
        print_photos(&photos);
    }
    Ok(())
}

fn print_photos(photos: &[SavedPhoto]) {
    for photo in photos {
        let record = &photo.record;
        let place = [record.address.as_deref(), record.city.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "  [{}] {} - {} ({})",
            photo.id,
            record.extracted_text.as_deref().unwrap_or("<no label>"),
            if place.is_empty() { "unknown location" } else { place.as_str() },
            record.timestamp.format("%Y-%m-%d %H:%M")
        );
    }
}

fn run_stats(config: &AppConfig) -> Result<()> {
    let log = AnalyticsLog::open(&analytics_path(config)?)?;
    let stats = log.accuracy_stats()?;

    println!("OCR accuracy");
    println!("  Attempts with feedback: {}", stats.total);
    println!("  Correct: {}", stats.correct);
    println!("  Accuracy: {:.1}%", stats.accuracy);
    println!("Method performance");
    for method in log.method_performance()? {
        println!(
            "  {}: {:.1}% ({} attempts)",
            method.method, method.success_rate, method.count
        );
    }
    Ok(())
}
