//! Test doubles shared by the unit tests.

use crate::api::CityDirectory;
use crate::error::{ApiError, ProviderError};
use crate::models::{City, Coordinates, LocationSource};
use crate::providers::{Accuracy, GpsDevice, LocationProvider, PermissionStatus, ResolveMode};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Provider with a settable outcome that counts its calls.
pub(crate) struct StubProvider {
    source: LocationSource,
    outcome: Mutex<Option<Coordinates>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StubProvider {
    pub(crate) fn ok(source: LocationSource, coords: Coordinates) -> Self {
        Self {
            source,
            outcome: Mutex::new(Some(coords)),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub(crate) fn failing(source: LocationSource) -> Self {
        Self {
            source,
            outcome: Mutex::new(None),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn set_outcome(&self, outcome: Option<Coordinates>) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LocationProvider for StubProvider {
    fn source(&self) -> LocationSource {
        self.source
    }

    async fn locate(&self, _mode: ResolveMode) -> Result<Coordinates, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let outcome = *self.outcome.lock().unwrap();
        outcome.ok_or_else(|| ProviderError::Unavailable("stub failure".to_string()))
    }
}

/// GPS device with a fixed permission state and optional fix.
pub(crate) struct StubGps {
    status: Mutex<PermissionStatus>,
    position: Option<Coordinates>,
    grant_on_request: bool,
    permission_requests: AtomicUsize,
    position_requests: AtomicUsize,
}

impl StubGps {
    pub(crate) fn new(status: PermissionStatus, position: Option<Coordinates>) -> Self {
        Self {
            status: Mutex::new(status),
            position,
            grant_on_request: false,
            permission_requests: AtomicUsize::new(0),
            position_requests: AtomicUsize::new(0),
        }
    }

    pub(crate) fn grant_on_request(mut self) -> Self {
        self.grant_on_request = true;
        self
    }

    pub(crate) fn permission_requests(&self) -> usize {
        self.permission_requests.load(Ordering::SeqCst)
    }

    pub(crate) fn position_requests(&self) -> usize {
        self.position_requests.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GpsDevice for StubGps {
    async fn permission_status(&self) -> PermissionStatus {
        *self.status.lock().unwrap()
    }

    async fn request_permission(&self) -> PermissionStatus {
        self.permission_requests.fetch_add(1, Ordering::SeqCst);
        let mut status = self.status.lock().unwrap();
        if *status == PermissionStatus::Undetermined {
            *status = if self.grant_on_request {
                PermissionStatus::Granted
            } else {
                PermissionStatus::Denied
            };
        }
        *status
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<Coordinates, ProviderError> {
        self.position_requests.fetch_add(1, Ordering::SeqCst);
        self.position
            .ok_or_else(|| ProviderError::Unavailable("no fix".to_string()))
    }
}

/// In-memory city directory that counts listing calls.
pub(crate) struct StubDirectory {
    cities: Mutex<Vec<City>>,
    listings: AtomicUsize,
    nearest_calls: AtomicUsize,
    delay: Option<Duration>,
}

impl StubDirectory {
    pub(crate) fn new(cities: Vec<City>) -> Self {
        Self {
            cities: Mutex::new(cities),
            listings: AtomicUsize::new(0),
            nearest_calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }

    pub(crate) fn nearest_calls(&self) -> usize {
        self.nearest_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CityDirectory for StubDirectory {
    async fn active_cities(&self) -> Result<Vec<City>, ApiError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.cities.lock().unwrap().clone())
    }

    async fn nearest_city(&self, point: Coordinates) -> Result<Option<City>, ApiError> {
        self.nearest_calls.fetch_add(1, Ordering::SeqCst);
        let cities = self.cities.lock().unwrap();
        Ok(crate::models::nearest_city(&cities, &point).cloned())
    }
}

pub(crate) fn city(id: &str, name: &str, lat: f64, lng: f64) -> City {
    City {
        id: id.to_string(),
        name: name.to_string(),
        country: "TR".to_string(),
        state_province: None,
        center_lat: lat,
        center_lng: lng,
        timezone: Some("Europe/Istanbul".to_string()),
        population: None,
    }
}
