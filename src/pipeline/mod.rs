//! Capture Pipeline
//!
//! Drives one capture from pixels to a saved record: multi-pass recognition,
//! brightness analysis, scoring, optional analytics, place resolution and
//! persistence. A capture that has been superseded by a newer one is dropped
//! before anything is written.

use image::RgbaImage;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capture::{decode_pixels, CaptureGenerations, CaptureTicket, CapturedImage};
use crate::config::AppConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::places::{Location, PlaceResolution, PlaceResolver, PlaceSearch, ReverseGeocoder};
use crate::storage::{AnalyticsLog, OcrAttempt, PhotoRecord, PhotoStore, TimeOfDay};
use crate::vision::{
    score_detections, BrightnessGrid, MultiPassOrchestrator, MultiPassResult, ScoredCandidate,
    ScoringOutcome, TextRecognizer,
};

/// Result of a saved capture
#[derive(Debug, Clone)]
pub struct CaptureReport {
    /// Row id of the saved photo
    pub photo_id: i64,
    pub resolution: PlaceResolution,
    /// Ranked label candidates, best first
    pub candidates: Vec<ScoredCandidate>,
}

#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Saved(CaptureReport),
    /// A newer capture started before this one finished; nothing was saved
    Discarded,
}

/// External services the pipeline talks to
pub struct Collaborators {
    pub recognizer: Arc<dyn TextRecognizer>,
    pub search: Arc<dyn PlaceSearch>,
    pub geocoder: Arc<dyn ReverseGeocoder>,
    pub store: Arc<dyn PhotoStore>,
    /// Used only when analytics are enabled in the config
    pub analytics: Option<Arc<AnalyticsLog>>,
}

pub struct CapturePipeline {
    orchestrator: MultiPassOrchestrator,
    resolver: PlaceResolver,
    store: Arc<dyn PhotoStore>,
    analytics: Option<Arc<AnalyticsLog>>,
    generations: CaptureGenerations,
}

impl CapturePipeline {
    pub fn new(config: &AppConfig, collaborators: Collaborators) -> Self {
        let analytics = collaborators
            .analytics
            .filter(|_| config.analytics.enabled);
        info!(
            "Capture pipeline ready (analytics {})",
            if analytics.is_some() { "on" } else { "off" }
        );

        Self {
            orchestrator: MultiPassOrchestrator::new(collaborators.recognizer),
            resolver: PlaceResolver::new(
                collaborators.search,
                collaborators.geocoder,
                config.resolver.clone(),
            ),
            store: collaborators.store,
            analytics,
            generations: CaptureGenerations::new(),
        }
    }

    /// Start a capture. Any capture started earlier will be discarded.
    pub fn begin_capture(&self) -> CaptureTicket {
        let ticket = self.generations.begin();
        debug!("Capture {} started", ticket.generation());
        ticket
    }

    /// Decode `encoded` and process it. Undecodable bytes are saved with no label.
    pub async fn process_encoded(
        &self,
        ticket: CaptureTicket,
        encoded: Vec<u8>,
        device: Location,
    ) -> PipelineResult<CaptureOutcome> {
        let pixels = decode_pixels(&encoded).unwrap_or_else(|e| {
            warn!("Could not decode capture {}: {}", ticket.generation(), e);
            RgbaImage::new(0, 0)
        });
        let image = CapturedImage::from_parts(encoded, pixels);
        self.process(ticket, image, device).await
    }

    /// Run the full pipeline for one capture.
    ///
    /// Only a persistence failure is returned as an error.
    pub async fn process(
        &self,
        ticket: CaptureTicket,
        image: CapturedImage,
        device: Location,
    ) -> PipelineResult<CaptureOutcome> {
        let CapturedImage {
            encoded,
            pixels,
            timestamp,
        } = image;
        let pixels = Arc::new(pixels);
        let (passes, grid) = self.recognize(Arc::clone(&pixels)).await;
        let outcome = score_detections(&passes.detections, &grid);
        match &outcome.best {
            Some(best) => info!("Best label '{}' of {} candidates", best, outcome.ranked.len()),
            None => info!("No text found"),
        }

        self.log_attempt(&encoded, pixels, &grid, &passes, &outcome).await;

        if !self.generations.is_current(&ticket) {
            info!("Capture {} superseded before resolution", ticket.generation());
            return Ok(CaptureOutcome::Discarded);
        }

        let resolution = self.resolver.resolve(outcome.best.as_deref(), device).await;

        if !self.generations.is_current(&ticket) {
            info!("Capture {} superseded, dropping resolution", ticket.generation());
            return Ok(CaptureOutcome::Discarded);
        }

        let record = PhotoRecord::from_resolution(timestamp, encoded, &resolution);
        let photo_id = self.save(record).await?;
        info!(
            "Saved photo {} as '{}' ({})",
            photo_id,
            resolution.label.as_deref().unwrap_or("<no label>"),
            resolution.category
        );

        Ok(CaptureOutcome::Saved(CaptureReport {
            photo_id,
            resolution,
            candidates: outcome.ranked,
        }))
    }

    async fn recognize(&self, pixels: Arc<RgbaImage>) -> (MultiPassResult, BrightnessGrid) {
        if pixels.width() == 0 || pixels.height() == 0 {
            return (MultiPassResult::default(), BrightnessGrid::default());
        }

        let grid_pixels = Arc::clone(&pixels);
        let (passes, grid) = tokio::join!(
            self.orchestrator.run(pixels),
            tokio::task::spawn_blocking(move || BrightnessGrid::analyze(&grid_pixels))
        );
        let grid = grid.unwrap_or_else(|e| {
            warn!("Brightness analysis failed: {}", e);
            BrightnessGrid::default()
        });
        (passes, grid)
    }

    /// Record the attempt and a copy of the photo off the executor threads
    async fn log_attempt(
        &self,
        encoded: &[u8],
        pixels: Arc<RgbaImage>,
        grid: &BrightnessGrid,
        passes: &MultiPassResult,
        outcome: &ScoringOutcome,
    ) {
        let Some(log) = &self.analytics else {
            return;
        };
        let mut attempt =
            match OcrAttempt::build(encoded, grid, passes, outcome, TimeOfDay::now()) {
                Ok(attempt) => attempt,
                Err(e) => {
                    warn!("Failed to build OCR attempt: {}", e);
                    return;
                }
            };

        let log = Arc::clone(log);
        let written = tokio::task::spawn_blocking(move || {
            attempt.image_path = log.save_image(&pixels, &attempt.image_hash);
            log.log_attempt(&attempt)
        })
        .await;
        match written {
            Ok(Ok(id)) => debug!("OCR attempt logged as row {}", id),
            Ok(Err(e)) => warn!("Failed to log OCR attempt: {}", e),
            Err(e) => warn!("OCR attempt logging task failed: {}", e),
        }
    }

    async fn save(&self, record: PhotoRecord) -> PipelineResult<i64> {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || store.save_photo(&record))
            .await
            .map_err(|e| PipelineError::PersistenceFailed(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::places::{Category, Coordinate, PlaceResult, Placemark, PoiCategory, ResolverState};
    use crate::storage::{Database, SavedPhoto};
    use crate::vision::{NormalizedRect, RecognitionRequest, RecognizedText};
    use async_trait::async_trait;
    use image::Rgba;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;
    use tokio::sync::Notify;

    struct SignRecognizer {
        text: &'static str,
    }

    impl TextRecognizer for SignRecognizer {
        fn recognize(
            &self,
            _image: &RgbaImage,
            _request: &RecognitionRequest,
        ) -> PipelineResult<Vec<RecognizedText>> {
            Ok(vec![RecognizedText {
                text: self.text.to_string(),
                confidence: 0.9,
                bounding_box: NormalizedRect::new(0.25, 0.6, 0.5, 0.15),
            }])
        }
    }

    /// Finds a single place; the first call can be held until released
    struct GatedSearch {
        place: Option<PlaceResult>,
        hold_first: AtomicBool,
        entered: Notify,
        release: Notify,
    }

    impl GatedSearch {
        fn new(place: Option<PlaceResult>, hold_first: bool) -> Self {
            Self {
                place,
                hold_first: AtomicBool::new(hold_first),
                entered: Notify::new(),
                release: Notify::new(),
            }
        }
    }

    #[async_trait]
    impl PlaceSearch for GatedSearch {
        async fn search(
            &self,
            _query: &str,
            _center: Coordinate,
            _radius_m: f64,
        ) -> PipelineResult<Vec<PlaceResult>> {
            self.entered.notify_one();
            if self.hold_first.swap(false, Ordering::SeqCst) {
                self.release.notified().await;
            }
            Ok(self.place.iter().cloned().collect())
        }
    }

    struct CityGeocoder;

    #[async_trait]
    impl ReverseGeocoder for CityGeocoder {
        async fn reverse_geocode(&self, _: Coordinate) -> PipelineResult<Option<Placemark>> {
            Ok(Some(Placemark {
                city: Some("Springfield".to_string()),
                ..Default::default()
            }))
        }
    }

    struct BrokenStore;

    impl PhotoStore for BrokenStore {
        fn save_photo(&self, _: &PhotoRecord) -> PipelineResult<i64> {
            Err(PipelineError::PersistenceFailed("disk full".to_string()))
        }
        fn list_photos(&self) -> PipelineResult<Vec<SavedPhoto>> {
            Ok(Vec::new())
        }
        fn relabel_photo(&self, _: i64, _: &str) -> PipelineResult<Option<SavedPhoto>> {
            Ok(None)
        }
        fn delete_photo(&self, _: i64) -> PipelineResult<bool> {
            Ok(false)
        }
    }

    fn luigis() -> PlaceResult {
        PlaceResult {
            name: "Luigi's".to_string(),
            coordinate: Coordinate::new(40.7131, -74.0055),
            street_number: Some("12".to_string()),
            street_name: Some("Mulberry St".to_string()),
            category: Some(PoiCategory::Restaurant),
            ..Default::default()
        }
    }

    fn device() -> Location {
        Location::new(40.7128, -74.0060, 8.0)
    }

    fn photo() -> CapturedImage {
        CapturedImage::from_parts(
            vec![0xFF, 0xD8, 0xFF, 0xE0],
            RgbaImage::from_pixel(60, 60, Rgba([200, 180, 90, 255])),
        )
    }

    fn pipeline(
        text: &'static str,
        search: Arc<GatedSearch>,
        store: Arc<dyn PhotoStore>,
        analytics: Option<Arc<AnalyticsLog>>,
    ) -> CapturePipeline {
        CapturePipeline::new(
            &AppConfig::default(),
            Collaborators {
                recognizer: Arc::new(SignRecognizer { text }),
                search,
                geocoder: Arc::new(CityGeocoder),
                store,
                analytics,
            },
        )
    }

    #[tokio::test]
    async fn test_capture_saved_with_verified_place() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("places.sqlite")).unwrap());
        let analytics =
            Arc::new(AnalyticsLog::open(&dir.path().join("ocr_analysis.sqlite")).unwrap());
        let search = Arc::new(GatedSearch::new(Some(luigis()), false));
        let pipeline = pipeline("LUIGI'S", search, db.clone(), Some(analytics.clone()));

        let ticket = pipeline.begin_capture();
        let outcome = pipeline.process(ticket, photo(), device()).await.unwrap();

        let CaptureOutcome::Saved(report) = outcome else {
            panic!("capture should be saved");
        };
        assert_eq!(report.candidates[0].text, "LUIGI'S");
        assert!(report.resolution.states.contains(&ResolverState::StoreVerified));

        let saved = db.list_photos().unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].id, report.photo_id);
        let record = &saved[0].record;
        assert_eq!(record.extracted_text.as_deref(), Some("Luigi's"));
        assert_eq!(record.category, Some(Category::Food));
        assert_eq!(record.address.as_deref(), Some("12 Mulberry St"));
        assert_eq!(record.latitude, 40.7131);
        assert_eq!(record.image_data, vec![0xFF, 0xD8, 0xFF, 0xE0]);

        let export = analytics.export_recent(10).unwrap();
        assert_eq!(export.as_array().unwrap().len(), 1);
        assert_eq!(export[0]["selected_text"], "LUIGI'S");
        let image_path = export[0]["image_path"].as_str().unwrap();
        assert!(std::path::Path::new(image_path).exists());
        assert!(image_path.starts_with(analytics.images_dir().to_str().unwrap()));
    }

    #[tokio::test]
    async fn test_analytics_disabled_by_config() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("places.sqlite")).unwrap());
        let analytics =
            Arc::new(AnalyticsLog::open(&dir.path().join("ocr_analysis.sqlite")).unwrap());
        let mut config = AppConfig::default();
        config.analytics.enabled = false;

        let pipeline = CapturePipeline::new(
            &config,
            Collaborators {
                recognizer: Arc::new(SignRecognizer { text: "OPEN" }),
                search: Arc::new(GatedSearch::new(None, false)),
                geocoder: Arc::new(CityGeocoder),
                store: db,
                analytics: Some(analytics.clone()),
            },
        );
        let ticket = pipeline.begin_capture();
        pipeline.process(ticket, photo(), device()).await.unwrap();

        assert_eq!(analytics.export_recent(10).unwrap(), serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_unmatched_text_falls_back_to_geocode() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("places.sqlite")).unwrap());
        let search = Arc::new(GatedSearch::new(None, false));
        let pipeline = pipeline("Joe's Pizza Kitchen", search, db.clone(), None);

        let ticket = pipeline.begin_capture();
        pipeline.process(ticket, photo(), device()).await.unwrap();

        let record = &db.list_photos().unwrap()[0].record;
        assert_eq!(record.city.as_deref(), Some("Springfield"));
        assert_eq!(record.category, Some(Category::Food));
        assert_eq!(record.latitude, device().coordinate.latitude);
        assert_eq!(record.altitude, 8.0);
    }

    #[tokio::test]
    async fn test_undecodable_image_saved_without_label() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("places.sqlite")).unwrap());
        let search = Arc::new(GatedSearch::new(Some(luigis()), false));
        let pipeline = pipeline("LUIGI'S", search, db.clone(), None);

        let ticket = pipeline.begin_capture();
        pipeline
            .process_encoded(ticket, vec![1, 2, 3], device())
            .await
            .unwrap();

        let record = &db.list_photos().unwrap()[0].record;
        assert_eq!(record.extracted_text, None);
        assert_eq!(record.category, Some(Category::Other));
        assert_eq!(record.image_data, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_surfaced() {
        let search = Arc::new(GatedSearch::new(Some(luigis()), false));
        let pipeline = pipeline("LUIGI'S", search, Arc::new(BrokenStore), None);

        let ticket = pipeline.begin_capture();
        let result = pipeline.process(ticket, photo(), device()).await;
        assert!(matches!(result, Err(PipelineError::PersistenceFailed(_))));
    }

    #[tokio::test]
    async fn test_retake_discards_pending_capture() {
        let dir = tempdir().unwrap();
        let db = Arc::new(Database::open(&dir.path().join("places.sqlite")).unwrap());
        let search = Arc::new(GatedSearch::new(Some(luigis()), true));
        let pipeline = Arc::new(pipeline("LUIGI'S", search.clone(), db.clone(), None));

        let first_ticket = pipeline.begin_capture();
        let first = {
            let pipeline = Arc::clone(&pipeline);
            tokio::spawn(async move { pipeline.process(first_ticket, photo(), device()).await })
        };

        // First capture is now blocked inside the nearby search
        search.entered.notified().await;
        let second_ticket = pipeline.begin_capture();
        search.release.notify_one();

        let first = first.await.unwrap().unwrap();
        assert!(matches!(first, CaptureOutcome::Discarded));
        assert!(db.list_photos().unwrap().is_empty());

        let second = pipeline.process(second_ticket, photo(), device()).await.unwrap();
        assert!(matches!(second, CaptureOutcome::Saved(_)));
        assert_eq!(db.list_photos().unwrap().len(), 1);
    }
}
