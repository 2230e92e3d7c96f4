//! Place resolution
//!
//! Reconciles the best OCR label with the places around the device. A nearby
//! search that finds the label verifies it and supplies the place's own
//! location and details; otherwise the device location is reverse geocoded and
//! the label is categorized by keyword.
//!
//! ```text
//! Start -> TextFound -> StoreVerified ----------------> Resolved
//!                    \-> StoreUnverified -> Geocoded -> Resolved
//!       -> NoText --------------------------^
//! ```

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::ResolverConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::places::{
    categorize, nearest_place, Category, Coordinate, Location, PlaceResult, Placemark,
};

/// Nearby-place search service
#[async_trait]
pub trait PlaceSearch: Send + Sync {
    /// Natural-language query around `center`. No results is `Ok(vec![])`.
    async fn search(
        &self,
        query: &str,
        center: Coordinate,
        radius_m: f64,
    ) -> PipelineResult<Vec<PlaceResult>>;
}

/// Reverse geocoding service
#[async_trait]
pub trait ReverseGeocoder: Send + Sync {
    async fn reverse_geocode(&self, coordinate: Coordinate) -> PipelineResult<Option<Placemark>>;
}

/// Resolver states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolverState {
    Start,
    TextFound,
    NoText,
    StoreVerified,
    StoreUnverified,
    Geocoded,
    Resolved,
}

/// Inputs that move the resolver between states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverEvent {
    /// Scoring finished; `has_text` when the best label is non-empty
    Scored { has_text: bool },
    /// Nearby search returned `matches` results (failures count as zero)
    Searched { matches: usize },
    /// Reverse geocoding finished, with or without a placemark
    GeocodeFinished,
    /// Resolution record built
    Finished,
}

impl ResolverState {
    /// Next state for `event`, or `None` if the event is not valid here
    pub fn transition(self, event: ResolverEvent) -> Option<ResolverState> {
        use ResolverEvent::*;
        use ResolverState::*;
        match (self, event) {
            (Start, Scored { has_text: true }) => Some(TextFound),
            (Start, Scored { has_text: false }) => Some(NoText),
            (TextFound, Searched { matches }) if matches > 0 => Some(StoreVerified),
            (TextFound, Searched { .. }) => Some(StoreUnverified),
            (StoreUnverified | NoText, GeocodeFinished) => Some(Geocoded),
            (StoreVerified | Geocoded, Finished) => Some(Resolved),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResolverState::Resolved)
    }
}

/// Where the resolved identity and address came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResolutionSource {
    StoreMatch,
    ReverseGeocode,
    None,
}

/// Final location and identity attached to a capture
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceResolution {
    pub final_location: Location,
    /// Name returned by the nearby search on a match
    pub verified_name: Option<String>,
    /// Label stored with the photo: the verified name if any, else the OCR text
    pub label: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub address: Option<String>,
    pub phone_number: Option<String>,
    pub category: Category,
    pub source: ResolutionSource,
    /// States visited, starting at `Start` and ending at `Resolved`
    pub states: Vec<ResolverState>,
}

/// Drives the resolution state machine against the external services
pub struct PlaceResolver {
    search: Arc<dyn PlaceSearch>,
    geocoder: Arc<dyn ReverseGeocoder>,
    config: ResolverConfig,
}

/// Records visited states; rejects transitions the machine does not allow
struct StateTrail {
    states: Vec<ResolverState>,
}

impl StateTrail {
    fn new() -> Self {
        Self {
            states: vec![ResolverState::Start],
        }
    }

    fn current(&self) -> ResolverState {
        self.states.last().copied().unwrap_or(ResolverState::Start)
    }

    fn advance(&mut self, event: ResolverEvent) -> ResolverState {
        let from = self.current();
        match from.transition(event) {
            Some(next) => {
                debug!("Resolver {:?} -> {:?}", from, next);
                self.states.push(next);
                next
            }
            None => {
                warn!("Resolver ignored {:?} in state {:?}", event, from);
                from
            }
        }
    }
}

impl PlaceResolver {
    pub fn new(
        search: Arc<dyn PlaceSearch>,
        geocoder: Arc<dyn ReverseGeocoder>,
        config: ResolverConfig,
    ) -> Self {
        Self {
            search,
            geocoder,
            config,
        }
    }

    /// Resolve `best_text` against the places around `device`.
    ///
    /// Never fails: service errors and timeouts fall through to the next state.
    pub async fn resolve(&self, best_text: Option<&str>, device: Location) -> PlaceResolution {
        let mut trail = StateTrail::new();
        let text = best_text.map(str::trim).filter(|t| !t.is_empty());

        let state = trail.advance(ResolverEvent::Scored {
            has_text: text.is_some(),
        });

        if let (ResolverState::TextFound, Some(text)) = (state, text) {
            let results = self.search_nearby(text, device.coordinate).await;
            let state = trail.advance(ResolverEvent::Searched {
                matches: results.len(),
            });

            if state == ResolverState::StoreVerified {
                if let Some(index) = nearest_place(&results, &device.coordinate) {
                    let place = &results[index];
                    let distance = device.coordinate.distance_to(&place.coordinate);
                    info!("Verified '{}' {:.0}m away", place.name, distance);
                    return Self::verified(place, text, device, trail);
                }
            }
            info!("No nearby place matches '{}', using device location", text);
        }

        let placemark = self.reverse_geocode(device.coordinate).await;
        trail.advance(ResolverEvent::GeocodeFinished);
        Self::geocoded(placemark, text, device, trail)
    }

    fn verified(
        place: &PlaceResult,
        text: &str,
        device: Location,
        mut trail: StateTrail,
    ) -> PlaceResolution {
        let verified_name = Some(place.name.clone()).filter(|n| !n.trim().is_empty());
        let label = verified_name.clone().unwrap_or_else(|| text.to_string());
        let category = categorize(place.category, Some(&label));
        trail.advance(ResolverEvent::Finished);

        PlaceResolution {
            final_location: Location {
                coordinate: place.coordinate,
                altitude: device.altitude,
            },
            verified_name,
            label: Some(label),
            city: place.city.clone(),
            state: place.state.clone(),
            country: place.country.clone(),
            address: place.address(),
            phone_number: place.phone.clone(),
            category,
            source: ResolutionSource::StoreMatch,
            states: trail.states,
        }
    }

    fn geocoded(
        placemark: Option<Placemark>,
        text: Option<&str>,
        device: Location,
        mut trail: StateTrail,
    ) -> PlaceResolution {
        let category = match text {
            Some(text) => categorize(None, Some(text)),
            None => Category::Other,
        };
        let source = if placemark.is_some() {
            ResolutionSource::ReverseGeocode
        } else {
            ResolutionSource::None
        };
        let placemark = placemark.unwrap_or_default();
        trail.advance(ResolverEvent::Finished);

        PlaceResolution {
            final_location: device,
            verified_name: None,
            label: text.map(str::to_string),
            address: placemark.address(),
            city: placemark.city,
            state: placemark.state,
            country: placemark.country,
            phone_number: None,
            category,
            source,
            states: trail.states,
        }
    }

    async fn search_nearby(&self, text: &str, center: Coordinate) -> Vec<PlaceResult> {
        let call = self
            .search
            .search(text, center, self.config.search_radius_m);
        match with_timeout(self.config.search_timeout(), call, PipelineError::SearchFailed).await
        {
            Ok(results) => {
                debug!("Nearby search for '{}': {} results", text, results.len());
                results
            }
            Err(e) => {
                warn!("{}", e);
                Vec::new()
            }
        }
    }

    async fn reverse_geocode(&self, coordinate: Coordinate) -> Option<Placemark> {
        let call = self.geocoder.reverse_geocode(coordinate);
        match with_timeout(self.config.geocode_timeout(), call, PipelineError::GeocodeFailed).await
        {
            Ok(placemark) => placemark,
            Err(e) => {
                warn!("{}", e);
                None
            }
        }
    }
}

/// Await `call` for at most `limit`; expiry becomes the error built by `on_timeout`
async fn with_timeout<T>(
    limit: Duration,
    call: impl Future<Output = PipelineResult<T>>,
    on_timeout: fn(String) -> PipelineError,
) -> PipelineResult<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(on_timeout(format!("timed out after {}ms", limit.as_millis()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::places::PoiCategory;
    use parking_lot::Mutex;

    struct FakeSearch {
        results: PipelineResult<Vec<PlaceResult>>,
        queries: Mutex<Vec<(String, f64)>>,
        delay: Option<Duration>,
    }

    impl FakeSearch {
        fn returning(results: Vec<PlaceResult>) -> Self {
            Self {
                results: Ok(results),
                queries: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn failing() -> Self {
            Self {
                results: Err(PipelineError::SearchFailed("offline".to_string())),
                queries: Mutex::new(Vec::new()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl PlaceSearch for FakeSearch {
        async fn search(
            &self,
            query: &str,
            _center: Coordinate,
            radius_m: f64,
        ) -> PipelineResult<Vec<PlaceResult>> {
            self.queries.lock().push((query.to_string(), radius_m));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.results {
                Ok(results) => Ok(results.clone()),
                Err(e) => Err(PipelineError::SearchFailed(e.to_string())),
            }
        }
    }

    struct FakeGeocoder {
        placemark: PipelineResult<Option<Placemark>>,
        calls: Mutex<Vec<Coordinate>>,
        delay: Option<Duration>,
    }

    impl FakeGeocoder {
        fn new(placemark: Option<Placemark>) -> Self {
            Self {
                placemark: Ok(placemark),
                calls: Mutex::new(Vec::new()),
                delay: None,
            }
        }

        fn failing() -> Self {
            Self {
                placemark: Err(PipelineError::GeocodeFailed("no network".to_string())),
                calls: Mutex::new(Vec::new()),
                delay: None,
            }
        }
    }

    #[async_trait]
    impl ReverseGeocoder for FakeGeocoder {
        async fn reverse_geocode(
            &self,
            coordinate: Coordinate,
        ) -> PipelineResult<Option<Placemark>> {
            self.calls.lock().push(coordinate);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match &self.placemark {
                Ok(placemark) => Ok(placemark.clone()),
                Err(e) => Err(PipelineError::GeocodeFailed(e.to_string())),
            }
        }
    }

    fn device() -> Location {
        Location::new(40.7128, -74.0060, 12.0)
    }

    fn luigis() -> PlaceResult {
        PlaceResult {
            name: "Luigi's Trattoria".to_string(),
            coordinate: Coordinate::new(40.7131, -74.0055),
            city: Some("New York".to_string()),
            state: Some("NY".to_string()),
            country: Some("United States".to_string()),
            street_number: Some("12".to_string()),
            street_name: Some("Mulberry St".to_string()),
            phone: Some("+1 212 555 0100".to_string()),
            category: Some(PoiCategory::Restaurant),
        }
    }

    fn placemark() -> Placemark {
        Placemark {
            city: Some("New York".to_string()),
            state: Some("NY".to_string()),
            country: Some("United States".to_string()),
            street_number: None,
            street_name: Some("Broadway".to_string()),
        }
    }

    fn resolver(search: Arc<FakeSearch>, geocoder: Arc<FakeGeocoder>) -> PlaceResolver {
        PlaceResolver::new(search, geocoder, ResolverConfig::default())
    }

    #[test]
    fn test_transitions() {
        use ResolverEvent::*;
        use ResolverState::*;
        assert_eq!(Start.transition(Scored { has_text: true }), Some(TextFound));
        assert_eq!(Start.transition(Scored { has_text: false }), Some(NoText));
        assert_eq!(TextFound.transition(Searched { matches: 2 }), Some(StoreVerified));
        assert_eq!(TextFound.transition(Searched { matches: 0 }), Some(StoreUnverified));
        assert_eq!(StoreUnverified.transition(GeocodeFinished), Some(Geocoded));
        assert_eq!(NoText.transition(GeocodeFinished), Some(Geocoded));
        assert_eq!(StoreVerified.transition(Finished), Some(Resolved));
        assert_eq!(Geocoded.transition(Finished), Some(Resolved));

        assert_eq!(NoText.transition(Searched { matches: 1 }), None);
        assert_eq!(StoreVerified.transition(GeocodeFinished), None);
        assert!(Resolved.is_terminal());
        assert_eq!(Resolved.transition(Finished), None);
    }

    #[tokio::test]
    async fn test_verified_store_uses_place_location() {
        let search = Arc::new(FakeSearch::returning(vec![luigis()]));
        let geocoder = Arc::new(FakeGeocoder::new(Some(placemark())));
        let resolution = resolver(search.clone(), geocoder.clone())
            .resolve(Some("Luigi's"), device())
            .await;

        assert_eq!(
            resolution.states,
            vec![
                ResolverState::Start,
                ResolverState::TextFound,
                ResolverState::StoreVerified,
                ResolverState::Resolved
            ]
        );
        assert_eq!(resolution.source, ResolutionSource::StoreMatch);
        assert_eq!(resolution.final_location.coordinate, luigis().coordinate);
        assert_ne!(resolution.final_location.coordinate, device().coordinate);
        assert_eq!(resolution.verified_name.as_deref(), Some("Luigi's Trattoria"));
        assert_eq!(resolution.label.as_deref(), Some("Luigi's Trattoria"));
        assert_eq!(resolution.address.as_deref(), Some("12 Mulberry St"));
        assert_eq!(resolution.phone_number.as_deref(), Some("+1 212 555 0100"));
        assert_eq!(resolution.category, Category::Food);

        assert_eq!(search.queries.lock().as_slice(), &[("Luigi's".to_string(), 500.0)]);
        assert!(geocoder.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_nearest_result_wins() {
        let mut far = luigis();
        far.name = "Luigi's Uptown".to_string();
        far.coordinate = Coordinate::new(40.7160, -74.0060);
        let search = Arc::new(FakeSearch::returning(vec![far, luigis()]));
        let resolution = resolver(search, Arc::new(FakeGeocoder::new(None)))
            .resolve(Some("Luigi's"), device())
            .await;
        assert_eq!(resolution.verified_name.as_deref(), Some("Luigi's Trattoria"));
    }

    #[tokio::test]
    async fn test_empty_text_goes_straight_to_geocode() {
        let search = Arc::new(FakeSearch::returning(vec![luigis()]));
        let geocoder = Arc::new(FakeGeocoder::new(Some(placemark())));
        let resolution = resolver(search.clone(), geocoder.clone())
            .resolve(Some(""), device())
            .await;

        assert_eq!(
            resolution.states,
            vec![
                ResolverState::Start,
                ResolverState::NoText,
                ResolverState::Geocoded,
                ResolverState::Resolved
            ]
        );
        assert!(search.queries.lock().is_empty());
        assert_eq!(geocoder.calls.lock().as_slice(), &[device().coordinate]);
        assert_eq!(resolution.final_location, device());
        assert_eq!(resolution.category, Category::Other);
        assert_eq!(resolution.label, None);
        assert_eq!(resolution.address.as_deref(), Some("Broadway"));
        assert_eq!(resolution.source, ResolutionSource::ReverseGeocode);
    }

    #[tokio::test]
    async fn test_unverified_text_is_categorized_by_keyword() {
        let search = Arc::new(FakeSearch::returning(vec![]));
        let geocoder = Arc::new(FakeGeocoder::new(Some(placemark())));
        let resolution = resolver(search, geocoder.clone())
            .resolve(Some("Joe's Pizza Kitchen"), device())
            .await;

        assert!(resolution.states.contains(&ResolverState::StoreUnverified));
        assert_eq!(resolution.category, Category::Food);
        assert_eq!(resolution.label.as_deref(), Some("Joe's Pizza Kitchen"));
        assert_eq!(resolution.verified_name, None);
        assert_eq!(resolution.final_location, device());
        assert_eq!(geocoder.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_search_failure_falls_back() {
        let resolution = resolver(
            Arc::new(FakeSearch::failing()),
            Arc::new(FakeGeocoder::new(None)),
        )
        .resolve(Some("Blue Bottle Coffee"), device())
        .await;

        assert!(resolution.states.contains(&ResolverState::StoreUnverified));
        assert_eq!(resolution.category, Category::Cafe);
        assert_eq!(resolution.source, ResolutionSource::None);
        assert_eq!(resolution.city, None);
        assert_eq!(resolution.states.last(), Some(&ResolverState::Resolved));
    }

    #[tokio::test]
    async fn test_search_timeout_falls_back() {
        let mut slow = FakeSearch::returning(vec![luigis()]);
        slow.delay = Some(Duration::from_secs(60));
        let config = ResolverConfig {
            search_timeout_ms: 20,
            ..ResolverConfig::default()
        };
        let resolution = PlaceResolver::new(
            Arc::new(slow),
            Arc::new(FakeGeocoder::new(Some(placemark()))),
            config,
        )
        .resolve(Some("Luigi's"), device())
        .await;

        assert_eq!(resolution.source, ResolutionSource::ReverseGeocode);
        assert_eq!(resolution.final_location, device());
    }

    fn assert_unplaced(resolution: &PlaceResolution) {
        assert_eq!(
            &resolution.states[resolution.states.len() - 2..],
            &[ResolverState::Geocoded, ResolverState::Resolved]
        );
        assert_eq!(resolution.source, ResolutionSource::None);
        assert_eq!(resolution.city, None);
        assert_eq!(resolution.address, None);
        assert_eq!(resolution.final_location, device());
    }

    #[tokio::test]
    async fn test_geocode_failure_falls_back() {
        let geocoder = Arc::new(FakeGeocoder::failing());
        let resolution = resolver(Arc::new(FakeSearch::returning(vec![])), geocoder.clone())
            .resolve(Some("Corner Bakery"), device())
            .await;

        assert_unplaced(&resolution);
        assert!(resolution.states.contains(&ResolverState::StoreUnverified));
        assert_eq!(resolution.category, Category::Food);
        assert_eq!(resolution.label.as_deref(), Some("Corner Bakery"));
        assert_eq!(geocoder.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_geocode_timeout_falls_back() {
        let mut slow = FakeGeocoder::new(Some(placemark()));
        slow.delay = Some(Duration::from_secs(60));
        let config = ResolverConfig {
            geocode_timeout_ms: 20,
            ..ResolverConfig::default()
        };
        let resolution = PlaceResolver::new(
            Arc::new(FakeSearch::returning(vec![])),
            Arc::new(slow),
            config,
        )
        .resolve(Some("Blue Bottle Coffee"), device())
        .await;

        assert_unplaced(&resolution);
        assert_eq!(resolution.category, Category::Cafe);
    }
}
