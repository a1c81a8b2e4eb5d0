//! Background refresh of the automatic location.
//!
//! Two triggers feed the same passive refresh: a fixed interval and the
//! application coming back to the foreground. Triggers claim the store's
//! refresh gate synchronously, so a trigger that arrives while a refresh is
//! running is dropped rather than queued.

use crate::providers::{GpsDevice, PermissionStatus, ResolveMode};
use crate::store::LocationStore;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    Active,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Interval,
    Foreground,
}

/// Lifecycle as seen by the timer task. `foregrounded` counts
/// background-to-active transitions so none is lost to coalescing.
#[derive(Debug, Clone, Copy)]
struct Lifecycle {
    state: AppState,
    foregrounded: u64,
}

#[derive(Clone)]
struct Dispatcher {
    store: Arc<LocationStore>,
    gps: Option<Arc<dyn GpsDevice>>,
}

impl Dispatcher {
    fn fire(&self, trigger: Trigger) -> bool {
        let Some(guard) = self.store.begin_refresh() else {
            debug!("Dropping {:?} trigger; refresh already in flight", trigger);
            return false;
        };
        info!("{:?} trigger: refreshing automatic location", trigger);
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            store.run_refresh(guard, ResolveMode::Passive).await;
        });
        true
    }

    async fn on_foreground(&self) -> bool {
        let granted = match &self.gps {
            Some(gps) => gps.permission_status().await == PermissionStatus::Granted,
            None => false,
        };
        if !granted {
            debug!("Foreground transition ignored; GPS permission not granted");
            return false;
        }
        self.fire(Trigger::Foreground)
    }
}

pub struct RefreshScheduler {
    dispatcher: Dispatcher,
    period: Duration,
    lifecycle: watch::Sender<Lifecycle>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl RefreshScheduler {
    pub fn new(
        store: Arc<LocationStore>,
        gps: Option<Arc<dyn GpsDevice>>,
        period: Duration,
    ) -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle {
            state: AppState::Active,
            foregrounded: 0,
        });
        Self {
            dispatcher: Dispatcher { store, gps },
            period,
            lifecycle,
            timer: Mutex::new(None),
        }
    }

    pub fn app_state(&self) -> AppState {
        self.lifecycle.borrow().state
    }

    /// Records a lifecycle change reported by the platform.
    pub fn set_app_state(&self, state: AppState) {
        self.lifecycle.send_if_modified(|lc| {
            if lc.state == state {
                return false;
            }
            if lc.state == AppState::Background && state == AppState::Active {
                lc.foregrounded += 1;
            }
            lc.state = state;
            true
        });
    }

    /// Stops the running timer, if any, and starts a new one.
    pub fn restart(&self) {
        let mut timer = self.timer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = timer.take() {
            previous.abort();
            debug!("Refresh timer cancelled for restart");
        }

        let dispatcher = self.dispatcher.clone();
        let mut lifecycle = self.lifecycle.subscribe();
        let period = self.period;

        *timer = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut seen = lifecycle.borrow_and_update().foregrounded;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        dispatcher.fire(Trigger::Interval);
                    }
                    changed = lifecycle.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let current = lifecycle.borrow_and_update().foregrounded;
                        if current != seen {
                            seen = current;
                            dispatcher.on_foreground().await;
                        }
                    }
                }
            }
        }));
        info!("Refresh timer started ({}s period)", period.as_secs());
    }

    pub fn stop(&self) {
        if let Some(timer) = self
            .timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            timer.abort();
            info!("Refresh timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Fires `trigger` now. Returns `false` when it was dropped because a
    /// refresh is already in flight.
    pub fn fire(&self, trigger: Trigger) -> bool {
        self.dispatcher.fire(trigger)
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cities::CityRegistry;
    use crate::kv::MemoryKvStore;
    use crate::models::{Coordinates, LocationSource};
    use crate::providers::LocationProvider;
    use crate::resolver::FallbackResolver;
    use crate::testing::{StubDirectory, StubGps, StubProvider};

    fn store_with(ip: &Arc<StubProvider>) -> Arc<LocationStore> {
        let kv = Arc::new(MemoryKvStore::new());
        let cities = Arc::new(CityRegistry::new(
            Arc::new(StubDirectory::new(vec![])),
            kv.clone(),
            Duration::from_secs(86_400),
        ));
        Arc::new(LocationStore::new(
            FallbackResolver::new(vec![Arc::clone(ip) as Arc<dyn LocationProvider>]),
            kv,
            cities,
            Duration::from_secs(300),
        ))
    }

    fn granted_gps() -> Option<Arc<dyn GpsDevice>> {
        Some(Arc::new(StubGps::new(PermissionStatus::Granted, None)))
    }

    const PERIOD: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn triggers_in_the_same_tick_resolve_once() {
        let ip = Arc::new(StubProvider::ok(LocationSource::Ip, Coordinates::new(41.0, 29.0)));
        let scheduler = RefreshScheduler::new(store_with(&ip), granted_gps(), PERIOD);

        assert!(scheduler.fire(Trigger::Interval));
        assert!(!scheduler.fire(Trigger::Foreground));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(ip.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn interval_fires_every_period() {
        let ip = Arc::new(StubProvider::ok(LocationSource::Ip, Coordinates::new(41.0, 29.0)));
        let scheduler = RefreshScheduler::new(store_with(&ip), None, PERIOD);
        scheduler.restart();

        tokio::time::sleep(PERIOD - Duration::from_secs(1)).await;
        assert_eq!(ip.calls(), 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ip.calls(), 1);
        tokio::time::sleep(PERIOD).await;
        assert_eq!(ip.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_during_refresh_is_dropped() {
        let ip = Arc::new(
            StubProvider::ok(LocationSource::Ip, Coordinates::new(41.0, 29.0))
                .with_delay(Duration::from_secs(5)),
        );
        let scheduler = RefreshScheduler::new(store_with(&ip), granted_gps(), PERIOD);
        scheduler.restart();
        scheduler.set_app_state(AppState::Background);

        // Foreground one second before the tick; the tick lands mid-refresh.
        tokio::time::sleep(PERIOD - Duration::from_secs(1)).await;
        scheduler.set_app_state(AppState::Active);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ip.calls(), 1);

        tokio::time::sleep(PERIOD).await;
        assert_eq!(ip.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn foreground_requires_granted_permission() {
        let ip = Arc::new(StubProvider::ok(LocationSource::Ip, Coordinates::new(41.0, 29.0)));
        let gps: Arc<StubGps> = Arc::new(StubGps::new(PermissionStatus::Undetermined, None));
        let scheduler = RefreshScheduler::new(
            store_with(&ip),
            Some(gps.clone() as Arc<dyn GpsDevice>),
            PERIOD,
        );
        scheduler.restart();

        scheduler.set_app_state(AppState::Background);
        tokio::time::sleep(Duration::from_secs(1)).await;
        scheduler.set_app_state(AppState::Active);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(ip.calls(), 0);
        assert_eq!(gps.permission_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn active_to_active_is_not_a_transition() {
        let ip = Arc::new(StubProvider::ok(LocationSource::Ip, Coordinates::new(41.0, 29.0)));
        let scheduler = RefreshScheduler::new(store_with(&ip), granted_gps(), PERIOD);
        scheduler.restart();

        scheduler.set_app_state(AppState::Active);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ip.calls(), 0);

        scheduler.set_app_state(AppState::Background);
        scheduler.set_app_state(AppState::Active);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ip.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_never_stacks_timers() {
        let ip = Arc::new(StubProvider::ok(LocationSource::Ip, Coordinates::new(41.0, 29.0)));
        let scheduler = RefreshScheduler::new(store_with(&ip), None, PERIOD);

        scheduler.restart();
        scheduler.restart();
        assert!(scheduler.is_running());
        scheduler.stop();
        assert!(!scheduler.is_running());

        tokio::time::sleep(PERIOD * 2 + Duration::from_secs(1)).await;
        assert_eq!(ip.calls(), 0);
    }
}
