use crate::models::{City, Coordinates, SelectedLocation};
use crate::store::{LocationSnapshot, RefreshOutcome};
use crossterm::event::{KeyCode, KeyEvent};
use tokio::sync::oneshot;

#[derive(Debug, PartialEq, Clone, Copy, Default)]
pub enum ViewMode {
    #[default]
    Dashboard,
    Picker,
}

/// What the main loop should do with the location service after a key press.
#[derive(Debug, PartialEq, Clone)]
pub enum Action {
    None,
    Quit,
    Refresh,
    PinCity(City),
    PinCurrent,
    ClearOverride,
}

#[derive(Default)]
pub struct App {
    pub view_mode: ViewMode,
    pub snapshot: LocationSnapshot,
    /// Active cities, nearest to the selection first.
    pub cities: Vec<City>,
    pub city_label: Option<City>,
    pub cities_loading: bool,
    pub search_radius_km: f64,
    pub picker_index: usize,
    pub tick_count: usize,
    pub should_quit: bool,
    pub status_message: Option<String>,
    pending_permission: Option<oneshot::Sender<bool>>,
}

impl App {
    pub fn new(search_radius_km: f64) -> Self {
        Self {
            search_radius_km,
            ..Self::default()
        }
    }

    pub fn on_tick(&mut self) {
        self.tick_count += 1;
    }

    pub fn selected(&self) -> Option<SelectedLocation> {
        self.snapshot.selected()
    }

    pub fn set_snapshot(&mut self, snapshot: LocationSnapshot) {
        let moved = snapshot.selected().map(|s| s.coordinates())
            != self.snapshot.selected().map(|s| s.coordinates());
        self.snapshot = snapshot;
        if moved {
            self.sort_cities();
        }
    }

    pub fn set_cities(&mut self, cities: Vec<City>) {
        self.cities = cities;
        self.sort_cities();
        if self.picker_index >= self.cities.len() {
            self.picker_index = 0;
        }
    }

    fn sort_cities(&mut self) {
        let Some(origin) = self.selected().map(|s| s.coordinates()) else {
            return;
        };
        self.cities.sort_by(|a, b| {
            a.center()
                .distance_km(&origin)
                .total_cmp(&b.center().distance_km(&origin))
        });
    }

    /// Distance from the selected location to `city`, in km.
    pub fn distance_to(&self, city: &City) -> Option<f64> {
        let origin: Coordinates = self.selected()?.coordinates();
        Some(origin.distance_km(&city.center()))
    }

    pub fn awaiting_permission(&self) -> bool {
        self.pending_permission.is_some()
    }

    /// Shows the permission modal. A request already showing is refused.
    pub fn request_permission(&mut self, answer: oneshot::Sender<bool>) {
        if let Some(previous) = self.pending_permission.replace(answer) {
            let _ = previous.send(false);
        }
    }

    fn answer_permission(&mut self, granted: bool) {
        if let Some(answer) = self.pending_permission.take() {
            let _ = answer.send(granted);
        }
    }

    pub fn on_refresh_finished(&mut self, outcome: RefreshOutcome) {
        self.status_message = Some(match outcome {
            RefreshOutcome::Refreshed(r) => format!("Located via {} at {}", r.source, r.coordinates),
            RefreshOutcome::Failed => "Could not determine location; keeping the last one".into(),
            RefreshOutcome::Skipped => "A refresh is already running".into(),
        });
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Action {
        // The permission modal swallows every other key until answered
        if self.awaiting_permission() {
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => self.answer_permission(true),
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                    self.answer_permission(false)
                }
                _ => {}
            }
            return Action::None;
        }

        match self.view_mode {
            ViewMode::Dashboard => self.handle_dashboard_key(key),
            ViewMode::Picker => self.handle_picker_key(key),
        }
    }

    fn handle_dashboard_key(&mut self, key: KeyEvent) -> Action {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Action::Quit
            }
            KeyCode::Char('r') => {
                self.status_message = Some("Refreshing location...".into());
                Action::Refresh
            }
            KeyCode::Char('p') => {
                self.view_mode = ViewMode::Picker;
                self.picker_index = 0;
                Action::None
            }
            KeyCode::Char('c') => {
                if self.snapshot.manual.is_none() {
                    return Action::None;
                }
                self.status_message = Some("Manual location cleared".into());
                Action::ClearOverride
            }
            _ => Action::None,
        }
    }

    fn handle_picker_key(&mut self, key: KeyEvent) -> Action {
        match key.code {
            KeyCode::Char('q') => {
                self.should_quit = true;
                Action::Quit
            }
            KeyCode::Esc | KeyCode::Char('p') => {
                self.view_mode = ViewMode::Dashboard;
                Action::None
            }
            KeyCode::Down | KeyCode::Char('j') => {
                if !self.cities.is_empty() {
                    self.picker_index = (self.picker_index + 1) % self.cities.len();
                }
                Action::None
            }
            KeyCode::Up | KeyCode::Char('k') => {
                if !self.cities.is_empty() {
                    self.picker_index = self
                        .picker_index
                        .checked_sub(1)
                        .unwrap_or(self.cities.len() - 1);
                }
                Action::None
            }
            KeyCode::Enter => match self.cities.get(self.picker_index).cloned() {
                Some(city) => {
                    self.view_mode = ViewMode::Dashboard;
                    self.status_message = Some(format!("Pinned to {}", city.name));
                    Action::PinCity(city)
                }
                None => Action::None,
            },
            KeyCode::Char('u') => {
                if self.snapshot.automatic.is_none() {
                    self.status_message = Some("No detected location to pin yet".into());
                    return Action::None;
                }
                self.view_mode = ViewMode::Dashboard;
                self.status_message = Some("Pinned to current location".into());
                Action::PinCurrent
            }
            _ => Action::None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AutomaticLocation, LocationSource, ManualOverride};

    fn city(id: &str, lat: f64, lng: f64) -> City {
        City {
            id: id.to_string(),
            name: id.to_uppercase(),
            country: "TR".to_string(),
            state_province: None,
            center_lat: lat,
            center_lng: lng,
            timezone: None,
            population: None,
        }
    }

    fn located_at(lat: f64, lng: f64) -> LocationSnapshot {
        LocationSnapshot {
            automatic: Some(AutomaticLocation {
                coordinates: Coordinates::new(lat, lng),
                captured_at_ms: 0,
                source: Some(LocationSource::Ip),
            }),
            ..LocationSnapshot::default()
        }
    }

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::from(code)
    }

    #[test]
    fn cities_are_ordered_by_distance_from_the_selection() {
        let mut app = App::new(50.0);
        app.set_cities(vec![city("ank", 39.93, 32.86), city("ist", 41.0, 29.0)]);
        app.set_snapshot(located_at(41.1, 29.1));
        assert_eq!(app.cities[0].id, "ist");

        app.set_snapshot(located_at(39.9, 32.8));
        assert_eq!(app.cities[0].id, "ank");
    }

    #[test]
    fn picker_enter_pins_the_highlighted_city() {
        let mut app = App::new(50.0);
        app.set_snapshot(located_at(41.0, 29.0));
        app.set_cities(vec![city("ist", 41.0, 29.0), city("ank", 39.93, 32.86)]);

        assert_eq!(app.handle_key(key(KeyCode::Char('p'))), Action::None);
        assert_eq!(app.view_mode, ViewMode::Picker);
        app.handle_key(key(KeyCode::Down));
        match app.handle_key(key(KeyCode::Enter)) {
            Action::PinCity(c) => assert_eq!(c.id, "ank"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(app.view_mode, ViewMode::Dashboard);
    }

    #[test]
    fn picker_wraps_and_ignores_enter_when_empty() {
        let mut app = App::new(50.0);
        app.handle_key(key(KeyCode::Char('p')));
        assert_eq!(app.handle_key(key(KeyCode::Enter)), Action::None);

        app.set_cities(vec![city("a", 0.0, 0.0), city("b", 1.0, 1.0)]);
        app.handle_key(key(KeyCode::Up));
        assert_eq!(app.picker_index, 1);
    }

    #[test]
    fn pin_current_needs_an_automatic_fix() {
        let mut app = App::new(50.0);
        app.handle_key(key(KeyCode::Char('p')));
        assert_eq!(app.handle_key(key(KeyCode::Char('u'))), Action::None);

        app.set_snapshot(located_at(41.0, 29.0));
        assert_eq!(app.handle_key(key(KeyCode::Char('u'))), Action::PinCurrent);
    }

    #[test]
    fn clear_only_when_an_override_exists() {
        let mut app = App::new(50.0);
        assert_eq!(app.handle_key(key(KeyCode::Char('c'))), Action::None);

        app.set_snapshot(LocationSnapshot {
            manual: Some(ManualOverride::pinned(Coordinates::new(1.0, 1.0))),
            ..LocationSnapshot::default()
        });
        assert_eq!(app.handle_key(key(KeyCode::Char('c'))), Action::ClearOverride);
    }

    #[test]
    fn permission_modal_captures_keys_until_answered() {
        let mut app = App::new(50.0);
        let (tx, mut rx) = oneshot::channel();
        app.request_permission(tx);

        assert_eq!(app.handle_key(key(KeyCode::Char('q'))), Action::None);
        assert!(!app.should_quit);
        assert!(rx.try_recv().is_err());

        app.handle_key(key(KeyCode::Char('y')));
        assert!(!app.awaiting_permission());
        assert_eq!(rx.try_recv(), Ok(true));
    }

    #[test]
    fn a_second_permission_request_refuses_the_first() {
        let mut app = App::new(50.0);
        let (first, mut first_rx) = oneshot::channel();
        let (second, mut second_rx) = oneshot::channel();
        app.request_permission(first);
        app.request_permission(second);

        assert_eq!(first_rx.try_recv(), Ok(false));
        app.handle_key(key(KeyCode::Char('n')));
        assert_eq!(second_rx.try_recv(), Ok(false));
    }
}
