//! Doubles built only on the crate's public traits.
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swapmeet_location::api::CityDirectory;
use swapmeet_location::cities::CityRegistry;
use swapmeet_location::error::{ApiError, ProviderError};
use swapmeet_location::kv::KeyValueStore;
use swapmeet_location::models::{nearest_city, City, Coordinates, LocationSource};
use swapmeet_location::providers::{
    Accuracy, GpsDevice, LocationProvider, PermissionStatus, ResolveMode,
};
use swapmeet_location::resolver::FallbackResolver;
use swapmeet_location::service::LocationService;
use swapmeet_location::store::LocationStore;

pub struct Scripted {
    source: LocationSource,
    fix: Mutex<Option<Coordinates>>,
    calls: AtomicUsize,
}

impl Scripted {
    pub fn new(source: LocationSource, fix: Option<Coordinates>) -> Arc<Self> {
        Arc::new(Self {
            source,
            fix: Mutex::new(fix),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_fix(&self, fix: Option<Coordinates>) {
        *self.fix.lock().unwrap() = fix;
    }
}

#[async_trait]
impl LocationProvider for Scripted {
    fn source(&self) -> LocationSource {
        self.source
    }

    async fn locate(&self, _mode: ResolveMode) -> Result<Coordinates, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fix = *self.fix.lock().unwrap();
        fix.ok_or_else(|| ProviderError::Unavailable("offline".to_string()))
    }
}

pub struct FixedGps {
    pub status: PermissionStatus,
    pub fix: Option<Coordinates>,
    pub prompts: AtomicUsize,
    pub reads: AtomicUsize,
}

impl FixedGps {
    pub fn new(status: PermissionStatus, fix: Option<Coordinates>) -> Arc<Self> {
        Arc::new(Self {
            status,
            fix,
            prompts: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl GpsDevice for FixedGps {
    async fn permission_status(&self) -> PermissionStatus {
        self.status
    }

    async fn request_permission(&self) -> PermissionStatus {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.status
    }

    async fn current_position(&self, _accuracy: Accuracy) -> Result<Coordinates, ProviderError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.fix
            .ok_or_else(|| ProviderError::Unavailable("no fix".to_string()))
    }
}

pub struct Directory {
    cities: Vec<City>,
    pub listings: AtomicUsize,
    pub nearest: AtomicUsize,
}

impl Directory {
    pub fn new(cities: Vec<City>) -> Arc<Self> {
        Arc::new(Self {
            cities,
            listings: AtomicUsize::new(0),
            nearest: AtomicUsize::new(0),
        })
    }

    pub fn requests(&self) -> usize {
        self.listings.load(Ordering::SeqCst) + self.nearest.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CityDirectory for Directory {
    async fn active_cities(&self) -> Result<Vec<City>, ApiError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        Ok(self.cities.clone())
    }

    async fn nearest_city(&self, point: Coordinates) -> Result<Option<City>, ApiError> {
        self.nearest.fetch_add(1, Ordering::SeqCst);
        Ok(nearest_city(&self.cities, &point).cloned())
    }
}

pub fn city(id: &str, name: &str, lat: f64, lng: f64) -> City {
    City {
        id: id.to_string(),
        name: name.to_string(),
        country: "TR".to_string(),
        state_province: None,
        center_lat: lat,
        center_lng: lng,
        timezone: None,
        population: None,
    }
}

pub fn turkey() -> Vec<City> {
    vec![
        city("ist", "Istanbul", 41.01, 28.98),
        city("ank", "Ankara", 39.93, 32.86),
        city("izm", "Izmir", 38.42, 27.14),
    ]
}

pub const REFRESH_PERIOD: Duration = Duration::from_secs(300);

/// A service over `providers`, with no GPS device wired to the scheduler.
pub fn service(
    providers: Vec<Arc<dyn LocationProvider>>,
    kv: Arc<dyn KeyValueStore>,
    directory: Arc<Directory>,
    gps: Option<Arc<dyn GpsDevice>>,
) -> LocationService {
    let cities = Arc::new(CityRegistry::new(
        directory,
        Arc::clone(&kv),
        Duration::from_secs(24 * 60 * 60),
    ));
    let store = Arc::new(LocationStore::new(
        FallbackResolver::new(providers),
        kv,
        cities,
        Duration::from_secs(300),
    ));
    LocationService::new(store, gps, REFRESH_PERIOD, 50.0)
}
