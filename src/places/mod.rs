//! Place Layer
//!
//! Geographic types, the external place-search and geocoding boundaries, the
//! category classifier and the resolver that reconciles an OCR label with the
//! places around the device.

pub mod category;
pub mod resolver;

pub use category::{categorize, Category, PoiCategory};
pub use resolver::{
    PlaceResolution, PlaceResolver, PlaceSearch, ResolutionSource, ResolverState, ReverseGeocoder,
};

use serde::{Deserialize, Serialize};

/// Mean Earth radius used for great-circle distances, in meters
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// WGS84 latitude/longitude in degrees
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    /// Great-circle (haversine) distance in meters
    pub fn distance_to(&self, other: &Coordinate) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let d_lat = (other.latitude - self.latitude).to_radians();
        let d_lon = (other.longitude - self.longitude).to_radians();

        let a = (d_lat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (d_lon / 2.0).sin().powi(2);
        2.0 * EARTH_RADIUS_M * a.sqrt().asin()
    }
}

/// Coordinate plus altitude, as reported by the device or a matched place
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Location {
    pub coordinate: Coordinate,
    /// Meters above sea level
    pub altitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            coordinate: Coordinate::new(latitude, longitude),
            altitude,
        }
    }
}

/// One result from the nearby-place search
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlaceResult {
    pub name: String,
    pub coordinate: Coordinate,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub street_number: Option<String>,
    pub street_name: Option<String>,
    pub phone: Option<String>,
    pub category: Option<PoiCategory>,
}

impl PlaceResult {
    pub fn address(&self) -> Option<String> {
        compose_address(self.street_number.as_deref(), self.street_name.as_deref())
    }
}

/// Reverse-geocode result
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Placemark {
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub street_number: Option<String>,
    pub street_name: Option<String>,
}

impl Placemark {
    pub fn address(&self) -> Option<String> {
        compose_address(self.street_number.as_deref(), self.street_name.as_deref())
    }
}

/// Join house number and street name with a space.
///
/// Missing parts are skipped; `None` (not an empty string) when both are missing.
pub fn compose_address(street_number: Option<&str>, street_name: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [street_number, street_name].into_iter().flatten().collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

/// Index of the result closest to `origin`; ties keep the service's order
pub fn nearest_place(results: &[PlaceResult], origin: &Coordinate) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (i, place) in results.iter().enumerate() {
        let distance = origin.distance_to(&place.coordinate);
        match best {
            Some((_, best_distance)) if distance >= best_distance => {}
            _ => best = Some((i, distance)),
        }
    }
    best.map(|(i, _)| i)
}
