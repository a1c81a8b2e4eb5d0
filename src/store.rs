//! The location store: automatic fix, manual override, and the derived
//! selection.
//!
//! All state lives in one [`watch`] channel so readers always see a
//! consistent snapshot and the UI can await changes. Mutations are
//! synchronous `send_modify` calls; persistence goes through the ordered
//! [`WriteBehind`] queue and may land later.

use crate::cities::CityRegistry;
use crate::kv::{keys, load_json, KeyValueStore, WriteBehind};
use crate::error::PersistenceError;
use crate::models::{
    AutomaticLocation, ManualOverride, SelectedLocation, StoredLastLocation, StoredManualLocation,
};
use crate::providers::ResolveMode;
use crate::resolver::{FallbackResolver, Resolution};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything the UI binds to, as of one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocationSnapshot {
    pub automatic: Option<AutomaticLocation>,
    pub manual: Option<ManualOverride>,
    pub loading: bool,
    pub error: Option<String>,
}

impl LocationSnapshot {
    pub fn selected(&self) -> Option<SelectedLocation> {
        SelectedLocation::derive(self.manual.as_ref(), self.automatic.as_ref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Resolving,
}

/// `Idle -> Resolving -> Idle` guard allowing one refresh at a time.
#[derive(Clone)]
pub struct RefreshGate {
    state: Arc<watch::Sender<RefreshState>>,
}

impl Default for RefreshGate {
    fn default() -> Self {
        let (state, _) = watch::channel(RefreshState::Idle);
        Self {
            state: Arc::new(state),
        }
    }
}

impl RefreshGate {
    pub fn state(&self) -> RefreshState {
        *self.state.borrow()
    }

    /// Moves to `Resolving`, or returns `None` if a refresh already holds it.
    pub fn try_begin(&self) -> Option<RefreshGuard> {
        let claimed = self.state.send_if_modified(|state| match *state {
            RefreshState::Resolving => false,
            RefreshState::Idle => {
                *state = RefreshState::Resolving;
                true
            }
        });
        claimed.then(|| RefreshGuard {
            state: Arc::clone(&self.state),
        })
    }

    /// Waits until no refresh holds the gate.
    pub async fn idle(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so this only returns once idle.
        let _ = rx.wait_for(|state| *state == RefreshState::Idle).await;
    }
}

/// Returns the gate to `Idle` when dropped.
pub struct RefreshGuard {
    state: Arc<watch::Sender<RefreshState>>,
}

impl Drop for RefreshGuard {
    fn drop(&mut self) {
        self.state.send_replace(RefreshState::Idle);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefreshOutcome {
    Refreshed(Resolution),
    /// Every provider failed; the previous fix is kept.
    Failed,
    /// Another refresh was already running.
    Skipped,
}

pub struct LocationStore {
    resolver: FallbackResolver,
    store: Arc<dyn KeyValueStore>,
    writer: WriteBehind,
    cities: Arc<CityRegistry>,
    state: watch::Sender<LocationSnapshot>,
    gate: RefreshGate,
    last_location_ttl_ms: i64,
}

impl LocationStore {
    /// Must be called inside a tokio runtime; it starts the write-behind task.
    pub fn new(
        resolver: FallbackResolver,
        store: Arc<dyn KeyValueStore>,
        cities: Arc<CityRegistry>,
        last_location_ttl: Duration,
    ) -> Self {
        let (state, _) = watch::channel(LocationSnapshot::default());
        Self {
            resolver,
            writer: WriteBehind::spawn(Arc::clone(&store)),
            store,
            cities,
            state,
            gate: RefreshGate::default(),
            last_location_ttl_ms: i64::try_from(last_location_ttl.as_millis()).unwrap_or(i64::MAX),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LocationSnapshot> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> LocationSnapshot {
        self.state.borrow().clone()
    }

    /// `ManualOverride ?? AutomaticLocation`, derived on every call.
    pub fn selected(&self) -> Option<SelectedLocation> {
        self.state.borrow().selected()
    }

    pub fn automatic(&self) -> Option<AutomaticLocation> {
        self.state.borrow().automatic.clone()
    }

    pub fn manual(&self) -> Option<ManualOverride> {
        self.state.borrow().manual.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.state.borrow().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state.borrow().error.clone()
    }

    pub fn cities_loading(&self) -> bool {
        self.cities.is_loading()
    }

    pub fn cities(&self) -> &Arc<CityRegistry> {
        &self.cities
    }

    pub fn refresh_state(&self) -> RefreshState {
        self.gate.state()
    }

    /// Loads persisted state, detects a location if none is cached, and
    /// warms the city registry.
    pub async fn initialize(&self) {
        // Queued writes must land first or the reads below would undo them.
        if let Err(e) = self.writer.flush().await {
            warn!("Persistence failure flushing before initialize: {}", e);
        }
        let manual = self.load_manual().await;
        let automatic = self.load_automatic().await;
        let needs_detection = automatic.is_none();

        self.state.send_modify(|s| {
            s.manual = manual;
            s.automatic = automatic;
            s.error = None;
        });

        if needs_detection {
            info!("No cached location; running passive detection");
            self.refresh_automatic(ResolveMode::Passive).await;
        }

        if let Err(e) = self.cities.get_cities().await {
            warn!("City registry unavailable: {}", e);
        }
    }

    async fn load_manual(&self) -> Option<ManualOverride> {
        match load_json::<StoredManualLocation>(self.store.as_ref(), keys::MANUAL_LOCATION).await {
            Ok(stored) => stored.map(ManualOverride::from),
            Err(e) => {
                warn!("Ignoring unreadable manual location: {}", e);
                None
            }
        }
    }

    async fn load_automatic(&self) -> Option<AutomaticLocation> {
        let stored =
            match load_json::<StoredLastLocation>(self.store.as_ref(), keys::LAST_LOCATION).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!("Ignoring unreadable last location: {}", e);
                    None
                }
            };
        let automatic = AutomaticLocation::from(stored?);

        let age_ms = automatic.age_ms(chrono::Utc::now().timestamp_millis());
        if age_ms > self.last_location_ttl_ms {
            info!(
                "Cached location {} is {}s old; using it until the next refresh",
                automatic.coordinates,
                age_ms / 1000
            );
        } else {
            debug!("Cached location {} is fresh", automatic.coordinates);
        }
        Some(automatic)
    }

    /// Claims the refresh gate. The scheduler uses this to drop triggers
    /// synchronously while a refresh is in flight.
    pub fn begin_refresh(&self) -> Option<RefreshGuard> {
        self.gate.try_begin()
    }

    pub async fn refresh_automatic(&self, mode: ResolveMode) -> RefreshOutcome {
        match self.begin_refresh() {
            Some(guard) => self.run_refresh(guard, mode).await,
            None => {
                debug!("Location refresh already in flight; skipping");
                RefreshOutcome::Skipped
            }
        }
    }

    /// Runs one resolution while holding `guard`.
    pub async fn run_refresh(&self, guard: RefreshGuard, mode: ResolveMode) -> RefreshOutcome {
        self.state.send_modify(|s| s.loading = true);

        let outcome = match self.resolver.resolve(mode).await {
            Ok(resolution) => {
                let automatic = AutomaticLocation {
                    coordinates: resolution.coordinates,
                    captured_at_ms: chrono::Utc::now().timestamp_millis(),
                    source: Some(resolution.source),
                };
                self.writer
                    .put_json(keys::LAST_LOCATION, &StoredLastLocation::from(&automatic));
                self.state.send_modify(|s| {
                    s.automatic = Some(automatic);
                    s.error = None;
                    s.loading = false;
                });
                RefreshOutcome::Refreshed(resolution)
            }
            Err(e) => {
                self.state.send_modify(|s| {
                    s.error = Some(e.to_string());
                    s.loading = false;
                });
                RefreshOutcome::Failed
            }
        };

        drop(guard);
        outcome
    }

    /// User-initiated refresh; may prompt for GPS permission.
    pub async fn refresh(&self) -> RefreshOutcome {
        self.refresh_automatic(ResolveMode::Interactive).await
    }

    /// Detects a location only if none is known. Returns whether one is
    /// known afterwards. A call overlapping a running refresh waits for it.
    pub async fn ensure_detected(&self) -> bool {
        if self.state.borrow().automatic.is_some() {
            return true;
        }
        match self.refresh_automatic(ResolveMode::Passive).await {
            RefreshOutcome::Refreshed(_) => true,
            RefreshOutcome::Failed => false,
            RefreshOutcome::Skipped => {
                self.gate.idle().await;
                self.state.borrow().automatic.is_some()
            }
        }
    }

    /// Visible to [`selected`](Self::selected) immediately; persisted later.
    pub fn set_manual_override(&self, manual: Option<ManualOverride>) {
        match &manual {
            Some(m) => {
                info!("Manual location set to {}", m.coordinates);
                self.writer
                    .put_json(keys::MANUAL_LOCATION, &StoredManualLocation::from(m));
            }
            None => {
                info!("Manual location cleared");
                self.writer.delete(keys::MANUAL_LOCATION);
            }
        }
        self.state.send_modify(|s| s.manual = manual);
    }

    pub fn clear_manual_override(&self) {
        self.set_manual_override(None);
    }

    /// Waits for every queued write to reach storage.
    pub async fn flush(&self) -> Result<(), PersistenceError> {
        self.writer.flush().await
    }
}
