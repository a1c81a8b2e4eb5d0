//! Data model for location resolution: coordinates, the automatic fix, the
//! manual override, the derived selection, and the city reference data.
//!
//! The `Stored*` types are the JSON shapes written to the key-value store.
//! They are kept separate from the in-memory types so the persisted layout
//! (`{lat, lng, timestamp}`) does not leak into the rest of the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mean earth radius used by the haversine distance, in kilometres.
const EARTH_RADIUS_KM: f64 = 6371.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    /// Great-circle distance to `other` in kilometres.
    pub fn distance_km(&self, other: &Coordinates) -> f64 {
        let lat1 = self.lat.to_radians();
        let lat2 = other.lat.to_radians();
        let delta_lat = (other.lat - self.lat).to_radians();
        let delta_lng = (other.lng - self.lng).to_radians();

        let a = (delta_lat / 2.0).sin().powi(2)
            + lat1.cos() * lat2.cos() * (delta_lng / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_KM * c
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.4}, {:.4})", self.lat, self.lng)
    }
}

/// Which provider in the fallback chain produced a fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocationSource {
    Gps,
    Ip,
    Region,
}

impl fmt::Display for LocationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LocationSource::Gps => "gps",
            LocationSource::Ip => "ip",
            LocationSource::Region => "region",
        };
        f.write_str(name)
    }
}

/// A fix produced by the fallback resolver. Replaced wholesale on refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct AutomaticLocation {
    pub coordinates: Coordinates,
    pub captured_at_ms: i64,
    /// `None` for fixes persisted before the source was recorded.
    pub source: Option<LocationSource>,
}

impl AutomaticLocation {
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.captured_at_ms
    }
}

/// A user-chosen location that wins over the automatic fix until cleared.
#[derive(Debug, Clone, PartialEq)]
pub struct ManualOverride {
    pub coordinates: Coordinates,
    pub city_id: Option<String>,
    pub city_name: Option<String>,
}

impl ManualOverride {
    pub fn from_city(city: &City) -> Self {
        Self {
            coordinates: city.center(),
            city_id: Some(city.id.clone()),
            city_name: Some(city.name.clone()),
        }
    }

    /// Pins an arbitrary point, e.g. "use current location" in the picker.
    pub fn pinned(coordinates: Coordinates) -> Self {
        Self {
            coordinates,
            city_id: None,
            city_name: None,
        }
    }
}

/// `ManualOverride ?? AutomaticLocation`, derived on every read.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectedLocation {
    Manual(ManualOverride),
    Automatic(AutomaticLocation),
}

impl SelectedLocation {
    pub fn derive(
        manual: Option<&ManualOverride>,
        automatic: Option<&AutomaticLocation>,
    ) -> Option<Self> {
        match (manual, automatic) {
            (Some(m), _) => Some(SelectedLocation::Manual(m.clone())),
            (None, Some(a)) => Some(SelectedLocation::Automatic(a.clone())),
            (None, None) => None,
        }
    }

    pub fn coordinates(&self) -> Coordinates {
        match self {
            SelectedLocation::Manual(m) => m.coordinates,
            SelectedLocation::Automatic(a) => a.coordinates,
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, SelectedLocation::Manual(_))
    }
}

/// Center point and radius handed to search and ranking.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchArea {
    pub center: Coordinates,
    pub radius_km: f64,
}

impl SearchArea {
    pub fn contains(&self, point: &Coordinates) -> bool {
        self.center.distance_km(point) <= self.radius_km
    }
}

/// An "active city" as served by the marketplace API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct City {
    pub id: String,
    pub name: String,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_province: Option<String>,
    pub center_lat: f64,
    pub center_lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
}

impl City {
    pub fn center(&self) -> Coordinates {
        Coordinates::new(self.center_lat, self.center_lng)
    }

    /// "Name, State, Country" with the state omitted when unknown.
    pub fn display_name(&self) -> String {
        match &self.state_province {
            Some(state) => format!("{}, {}, {}", self.name, state, self.country),
            None => format!("{}, {}", self.name, self.country),
        }
    }
}

/// The active-city list and when it was fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct CityRegistryCache {
    pub cities: Vec<City>,
    pub fetched_at_ms: i64,
}

impl CityRegistryCache {
    pub fn is_fresh(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms - self.fetched_at_ms < ttl_ms
    }
}

/// Returns the city whose center is closest to `point`.
pub fn nearest_city<'a>(cities: &'a [City], point: &Coordinates) -> Option<&'a City> {
    cities.iter().min_by(|a, b| {
        let da = a.center().distance_km(point);
        let db = b.center().distance_km(point);
        da.total_cmp(&db)
    })
}

/// Persisted shape of `last_location`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredLastLocation {
    pub lat: f64,
    pub lng: f64,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<LocationSource>,
}

impl From<&AutomaticLocation> for StoredLastLocation {
    fn from(loc: &AutomaticLocation) -> Self {
        Self {
            lat: loc.coordinates.lat,
            lng: loc.coordinates.lng,
            timestamp: loc.captured_at_ms,
            source: loc.source,
        }
    }
}

impl From<StoredLastLocation> for AutomaticLocation {
    fn from(stored: StoredLastLocation) -> Self {
        Self {
            coordinates: Coordinates::new(stored.lat, stored.lng),
            captured_at_ms: stored.timestamp,
            source: stored.source,
        }
    }
}

/// Persisted shape of `manual_location`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredManualLocation {
    pub lat: f64,
    pub lng: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city_name: Option<String>,
}

impl From<&ManualOverride> for StoredManualLocation {
    fn from(manual: &ManualOverride) -> Self {
        Self {
            lat: manual.coordinates.lat,
            lng: manual.coordinates.lng,
            city_id: manual.city_id.clone(),
            city_name: manual.city_name.clone(),
        }
    }
}

impl From<StoredManualLocation> for ManualOverride {
    fn from(stored: StoredManualLocation) -> Self {
        Self {
            coordinates: Coordinates::new(stored.lat, stored.lng),
            city_id: stored.city_id,
            city_name: stored.city_name,
        }
    }
}
