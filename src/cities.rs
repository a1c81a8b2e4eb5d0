//! Cache of the marketplace's active cities.
//!
//! Lookup order is memory, then the persisted copy, then the network. A
//! persisted copy older than the TTL is still served, and a single
//! background refresh replaces it; callers never wait on that refresh.

use crate::api::CityDirectory;
use crate::error::LocationError;
use crate::kv::{keys, load_json, save_json, KeyValueStore};
use crate::models::{nearest_city, City, CityRegistryCache, Coordinates};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct CityRegistry {
    directory: Arc<dyn CityDirectory>,
    store: Arc<dyn KeyValueStore>,
    ttl_ms: i64,
    cache: RwLock<Option<CityRegistryCache>>,
    fetch_lock: tokio::sync::Mutex<()>,
    background_refresh: AtomicBool,
    loading: AtomicBool,
}

impl CityRegistry {
    pub fn new(
        directory: Arc<dyn CityDirectory>,
        store: Arc<dyn KeyValueStore>,
        ttl: Duration,
    ) -> Self {
        Self {
            directory,
            store,
            ttl_ms: i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX),
            cache: RwLock::new(None),
            fetch_lock: tokio::sync::Mutex::new(()),
            background_refresh: AtomicBool::new(false),
            loading: AtomicBool::new(false),
        }
    }

    /// True while a network fetch of the city list is running.
    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// The in-memory list, possibly empty. Never touches storage or network.
    pub fn cached(&self) -> Vec<City> {
        self.snapshot().map(|c| c.cities).unwrap_or_default()
    }

    fn snapshot(&self) -> Option<CityRegistryCache> {
        self.cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn install(&self, cache: CityRegistryCache) {
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(cache);
    }

    /// Returns the active cities, serving stale data while it refreshes.
    pub async fn get_cities(self: &Arc<Self>) -> Result<Vec<City>, LocationError> {
        let now = chrono::Utc::now().timestamp_millis();

        if let Some(cache) = self.snapshot().filter(|c| !c.cities.is_empty()) {
            if !cache.is_fresh(now, self.ttl_ms) {
                self.spawn_refresh();
            }
            return Ok(cache.cities);
        }

        if let Some(cache) = self.load_persisted().await {
            let fresh = cache.is_fresh(now, self.ttl_ms);
            let cities = cache.cities.clone();
            debug!("Loaded {} cities from storage (fresh: {})", cities.len(), fresh);
            self.install(cache);
            if !fresh {
                self.spawn_refresh();
            }
            return Ok(cities);
        }

        self.refresh().await
    }

    /// Fetches the list from the network, replacing memory and storage.
    ///
    /// Concurrent callers share one request: a caller that waited for the
    /// fetch lock returns the list fetched while it waited.
    pub async fn refresh(&self) -> Result<Vec<City>, LocationError> {
        let requested_at = chrono::Utc::now().timestamp_millis();
        let _fetch = self.fetch_lock.lock().await;
        if let Some(cache) = self.snapshot().filter(|c| c.fetched_at_ms >= requested_at) {
            return Ok(cache.cities);
        }

        self.loading.store(true, Ordering::SeqCst);
        let result = self.directory.active_cities().await;
        self.loading.store(false, Ordering::SeqCst);

        let cities = result?;
        let cache = CityRegistryCache {
            cities: cities.clone(),
            fetched_at_ms: chrono::Utc::now().timestamp_millis(),
        };
        info!("Fetched {} active cities", cities.len());
        self.persist(&cache).await;
        self.install(cache);
        Ok(cities)
    }

    /// Starts a background refresh unless one is already running.
    fn spawn_refresh(self: &Arc<Self>) -> bool {
        if self
            .background_refresh
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("City refresh already in flight");
            return false;
        }

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = registry.refresh().await {
                warn!("Background city refresh failed; keeping stale list: {}", e);
            }
            registry.background_refresh.store(false, Ordering::SeqCst);
        });
        true
    }

    async fn load_persisted(&self) -> Option<CityRegistryCache> {
        let cities = match load_json::<Vec<City>>(self.store.as_ref(), keys::CITIES_CACHE).await {
            Ok(Some(cities)) if !cities.is_empty() => cities,
            Ok(_) => return None,
            Err(e) => {
                warn!("Ignoring unreadable city cache: {}", e);
                return None;
            }
        };
        let fetched_at_ms =
            match load_json::<i64>(self.store.as_ref(), keys::CITIES_CACHE_TIMESTAMP).await {
                Ok(Some(ts)) => ts,
                Ok(None) => 0,
                Err(e) => {
                    warn!("Ignoring unreadable city cache timestamp: {}", e);
                    0
                }
            };
        Some(CityRegistryCache {
            cities,
            fetched_at_ms,
        })
    }

    async fn persist(&self, cache: &CityRegistryCache) {
        let store = self.store.as_ref();
        if let Err(e) = save_json(store, keys::CITIES_CACHE, &cache.cities).await {
            warn!("Persistence failure saving city cache: {}", e);
            return;
        }
        if let Err(e) = save_json(store, keys::CITIES_CACHE_TIMESTAMP, &cache.fetched_at_ms).await {
            warn!("Persistence failure saving city cache timestamp: {}", e);
        }
    }

    /// Nearest cached city to the point. Pure; no network.
    pub fn find_nearest(&self, lat: f64, lng: f64) -> Option<City> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        let cities = cache.as_ref().map(|c| c.cities.as_slice()).unwrap_or_default();
        nearest_city(cities, &Coordinates::new(lat, lng)).cloned()
    }

    /// Nearest city for labelling, asking the marketplace only when nothing
    /// is cached locally.
    pub async fn label_for(&self, point: Coordinates) -> Option<City> {
        if let Some(city) = self.find_nearest(point.lat, point.lng) {
            return Some(city);
        }
        match self.directory.nearest_city(point).await {
            Ok(city) => city,
            Err(e) => {
                warn!("Nearest-city lookup failed for {}: {}", point, e);
                None
            }
        }
    }
}
