//! Injection root for the location subsystem.
//!
//! [`LocationService`] owns the store and the refresh scheduler and is the
//! only thing the front-end talks to.

use crate::api::MarketplaceApi;
use crate::cities::CityRegistry;
use crate::config::Config;
use crate::error::{LocationError, PersistenceError};
use crate::kv::KeyValueStore;
use crate::models::{City, Coordinates, ManualOverride, SearchArea, SelectedLocation};
use crate::providers::{
    GpsDevice, GpsProvider, GpsdDevice, IpGeolocation, LocationProvider, PermissionPrompt,
    RegionFallback,
};
use crate::resolver::FallbackResolver;
use crate::scheduler::{AppState, RefreshScheduler};
use crate::store::{LocationSnapshot, LocationStore, RefreshOutcome};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

pub struct LocationService {
    store: Arc<LocationStore>,
    scheduler: RefreshScheduler,
    search_radius_km: f64,
}

impl LocationService {
    pub fn new(
        store: Arc<LocationStore>,
        gps: Option<Arc<dyn GpsDevice>>,
        refresh_interval: Duration,
        search_radius_km: f64,
    ) -> Self {
        let scheduler = RefreshScheduler::new(Arc::clone(&store), gps, refresh_interval);
        Self {
            store,
            scheduler,
            search_radius_km,
        }
    }

    /// Wires the production providers: gpsd (if enabled), IP lookup and
    /// the locale-based region fallback, in that order.
    ///
    /// Must be called inside a tokio runtime.
    pub fn from_config(
        config: &Config,
        kv: Arc<dyn KeyValueStore>,
        prompt: Arc<dyn PermissionPrompt>,
    ) -> Result<Self, LocationError> {
        let timeout = config.request_timeout();
        let mut providers: Vec<Arc<dyn LocationProvider>> = Vec::new();

        let gps: Option<Arc<dyn GpsDevice>> = if config.gps.enabled {
            let device: Arc<dyn GpsDevice> = Arc::new(GpsdDevice::new(
                config.gps.gpsd_address.clone(),
                Arc::clone(&kv),
                prompt,
            ));
            providers.push(Arc::new(GpsProvider::new(
                Arc::clone(&device),
                config.gps.accuracy,
            )));
            Some(device)
        } else {
            info!("GPS disabled in config; resolving from IP and region only");
            None
        };

        providers.push(Arc::new(IpGeolocation::new(
            config.providers.ip_endpoint.clone(),
            timeout,
        )?));
        providers.push(Arc::new(RegionFallback::new(
            config.providers.country_endpoint.clone(),
            config.location.locale.clone(),
            timeout,
        )?));

        let directory = Arc::new(MarketplaceApi::new(config.api.base_url.clone(), timeout)?);
        let cities = Arc::new(CityRegistry::new(
            directory,
            Arc::clone(&kv),
            config.cities_ttl(),
        ));
        let store = Arc::new(LocationStore::new(
            FallbackResolver::new(providers),
            kv,
            cities,
            config.last_location_ttl(),
        ));

        Ok(Self::new(
            store,
            gps,
            config.refresh_interval(),
            config.location.search_radius_km,
        ))
    }

    /// Restores persisted state, detects a location if needed and starts
    /// the background refresh timer.
    pub async fn initialize(&self) {
        self.store.initialize().await;
        self.scheduler.restart();
        info!("Location service initialized");
    }

    /// Stops the timer and waits for queued writes.
    pub async fn dispose(&self) -> Result<(), PersistenceError> {
        self.scheduler.stop();
        self.store.flush().await?;
        info!("Location service disposed");
        Ok(())
    }

    pub fn selected(&self) -> Option<SelectedLocation> {
        self.store.selected()
    }

    pub fn snapshot(&self) -> LocationSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<LocationSnapshot> {
        self.store.subscribe()
    }

    pub async fn cities(&self) -> Result<Vec<City>, LocationError> {
        self.store.cities().get_cities().await
    }

    /// The city list already in memory; never blocks.
    pub fn cached_cities(&self) -> Vec<City> {
        self.store.cities().cached()
    }

    pub fn find_nearest(&self, lat: f64, lng: f64) -> Option<City> {
        self.store.cities().find_nearest(lat, lng)
    }

    /// Nearest city to the selected location, asking the marketplace when
    /// the cached list is empty.
    pub async fn selected_city(&self) -> Option<City> {
        let point = self.selected()?.coordinates();
        self.store.cities().label_for(point).await
    }

    pub fn set_manual_override(&self, manual: ManualOverride) {
        self.store.set_manual_override(Some(manual));
    }

    /// Pins the selection to `city`.
    pub fn pin_city(&self, city: &City) {
        self.set_manual_override(ManualOverride::from_city(city));
    }

    /// Pins the selection to the current automatic fix, if there is one.
    pub fn pin_current(&self) -> bool {
        match self.store.automatic() {
            Some(auto) => {
                self.set_manual_override(ManualOverride::pinned(auto.coordinates));
                true
            }
            None => false,
        }
    }

    pub fn clear_manual_override(&self) {
        self.store.clear_manual_override();
    }

    /// User-initiated refresh; may prompt for GPS permission.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.store.refresh().await
    }

    pub async fn ensure_detected(&self) -> bool {
        self.store.ensure_detected().await
    }

    pub fn loading(&self) -> bool {
        self.store.is_loading()
    }

    pub fn error(&self) -> Option<String> {
        self.store.error()
    }

    pub fn cities_loading(&self) -> bool {
        self.store.cities_loading()
    }

    pub fn search_radius_km(&self) -> f64 {
        self.search_radius_km
    }

    /// Circle used to scope listing searches, centred on the selection.
    pub fn search_area(&self) -> Option<SearchArea> {
        let center: Coordinates = self.selected()?.coordinates();
        Some(SearchArea {
            center,
            radius_km: self.search_radius_km,
        })
    }

    pub fn app_state_changed(&self, state: AppState) {
        self.scheduler.set_app_state(state);
    }

    pub fn store(&self) -> &Arc<LocationStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &RefreshScheduler {
        &self.scheduler
    }
}
