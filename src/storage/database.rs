//! SQLite database for saved places

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::places::{Category, PlaceResolution};

/// Category name used for records saved without one
const UNCATEGORIZED: &str = "Other";

/// One saved photo and the place it was resolved to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoRecord {
    pub timestamp: DateTime<Utc>,
    /// Encoded image as captured
    #[serde(skip)]
    pub image_data: Vec<u8>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub phone_number: Option<String>,
    pub extracted_text: Option<String>,
    pub category: Option<Category>,
}

impl PhotoRecord {
    pub fn from_resolution(
        timestamp: DateTime<Utc>,
        image_data: Vec<u8>,
        resolution: &PlaceResolution,
    ) -> Self {
        let location = resolution.final_location;
        Self {
            timestamp,
            image_data,
            latitude: location.coordinate.latitude,
            longitude: location.coordinate.longitude,
            altitude: location.altitude,
            city: resolution.city.clone(),
            state: resolution.state.clone(),
            country: resolution.country.clone(),
            address: resolution.address.clone(),
            phone_number: resolution.phone_number.clone(),
            extracted_text: resolution.label.clone(),
            category: Some(resolution.category),
        }
    }

    /// Case-insensitive substring match over the searchable text fields
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        [
            self.extracted_text.as_deref(),
            self.category.as_ref().map(Category::as_str),
            self.address.as_deref(),
            self.city.as_deref(),
            self.state.as_deref(),
            self.country.as_deref(),
        ]
        .into_iter()
        .flatten()
        .any(|field| field.to_lowercase().contains(&query))
    }
}

/// A record with its row id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedPhoto {
    pub id: i64,
    #[serde(flatten)]
    pub record: PhotoRecord,
}

/// Sink for resolved captures
pub trait PhotoStore: Send + Sync {
    /// Persist a new record and return its id
    fn save_photo(&self, record: &PhotoRecord) -> PipelineResult<i64>;

    /// All records, newest first
    fn list_photos(&self) -> PipelineResult<Vec<SavedPhoto>>;

    /// Set the label of a record. Returns the record as it was before, or
    /// `None` if no record has that id.
    fn relabel_photo(&self, id: i64, text: &str) -> PipelineResult<Option<SavedPhoto>>;

    /// Returns `false` if no record has that id
    fn delete_photo(&self, id: i64) -> PipelineResult<bool>;
}

/// Database connection wrapper
pub struct Database {
    conn: Mutex<Connection>,
}

const SELECT_PHOTO: &str = "SELECT id, timestamp, image_data, latitude, longitude, altitude, \
     city, state, country, address, phone_number, extracted_text, category FROM photos";

impl Database {
    /// Open or create database at path
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        debug!("Photo database opened at {}", path.display());
        Ok(db)
    }

    /// Initialize database schema
    pub fn init_schema(&self) -> PipelineResult<()> {
        self.conn.lock().execute_batch(
            "CREATE TABLE IF NOT EXISTS photos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                image_data BLOB NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                altitude REAL NOT NULL,
                city TEXT,
                state TEXT,
                country TEXT,
                address TEXT,
                phone_number TEXT,
                extracted_text TEXT,
                category TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_photos_timestamp ON photos(timestamp);",
        )?;
        Ok(())
    }

    fn find(&self, id: i64) -> PipelineResult<Option<SavedPhoto>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_PHOTO} WHERE id = ?1"))?;
        let row = stmt.query_row(params![id], read_row).optional()?;
        row.map(|r| r.into_saved()).transpose()
    }

    /// Saved photos grouped by category; records without one go under "Other"
    pub fn photos_by_category(&self) -> PipelineResult<BTreeMap<String, Vec<SavedPhoto>>> {
        let mut groups: BTreeMap<String, Vec<SavedPhoto>> = BTreeMap::new();
        for photo in self.list_photos()? {
            let key = photo
                .record
                .category
                .map(|c| c.to_string())
                .unwrap_or_else(|| UNCATEGORIZED.to_string());
            groups.entry(key).or_default().push(photo);
        }
        Ok(groups)
    }

    /// Photos whose label, category, address, city, state or country contain `query`
    pub fn search_photos(&self, query: &str) -> PipelineResult<Vec<SavedPhoto>> {
        Ok(self
            .list_photos()?
            .into_iter()
            .filter(|photo| photo.record.matches(query))
            .collect())
    }
}

impl PhotoStore for Database {
    fn save_photo(&self, record: &PhotoRecord) -> PipelineResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO photos (timestamp, image_data, latitude, longitude, altitude,
                city, state, country, address, phone_number, extracted_text, category)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.timestamp.to_rfc3339(),
                record.image_data,
                record.latitude,
                record.longitude,
                record.altitude,
                record.city,
                record.state,
                record.country,
                record.address,
                record.phone_number,
                record.extracted_text,
                record.category.map(|c| c.as_str()),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_photos(&self) -> PipelineResult<Vec<SavedPhoto>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("{SELECT_PHOTO} ORDER BY timestamp DESC, id DESC"))?;
        let rows = stmt.query_map([], read_row)?;
        let mut photos = Vec::new();
        for row in rows {
            photos.push(row?.into_saved()?);
        }
        Ok(photos)
    }

    fn relabel_photo(&self, id: i64, text: &str) -> PipelineResult<Option<SavedPhoto>> {
        let Some(previous) = self.find(id)? else {
            return Ok(None);
        };
        self.conn.lock().execute(
            "UPDATE photos SET extracted_text = ?1 WHERE id = ?2",
            params![text, id],
        )?;
        Ok(Some(previous))
    }

    fn delete_photo(&self, id: i64) -> PipelineResult<bool> {
        let deleted = self
            .conn
            .lock()
            .execute("DELETE FROM photos WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }
}

/// Column values before the timestamp and category are parsed
struct PhotoRow {
    id: i64,
    timestamp: String,
    category: Option<String>,
    record: PhotoRecord,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<PhotoRow> {
    Ok(PhotoRow {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        category: row.get(12)?,
        record: PhotoRecord {
            timestamp: DateTime::<Utc>::MIN_UTC,
            image_data: row.get(2)?,
            latitude: row.get(3)?,
            longitude: row.get(4)?,
            altitude: row.get(5)?,
            city: row.get(6)?,
            state: row.get(7)?,
            country: row.get(8)?,
            address: row.get(9)?,
            phone_number: row.get(10)?,
            extracted_text: row.get(11)?,
            category: None,
        },
    })
}

impl PhotoRow {
    fn into_saved(self) -> PipelineResult<SavedPhoto> {
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .map_err(|e| {
                PipelineError::PersistenceFailed(format!(
                    "photo {} has invalid timestamp '{}': {}",
                    self.id, self.timestamp, e
                ))
            })?
            .with_timezone(&Utc);
        let category = self.category.and_then(|c| c.parse().ok());
        Ok(SavedPhoto {
            id: self.id,
            record: PhotoRecord {
                timestamp,
                category,
                ..self.record
            },
        })
    }
}
