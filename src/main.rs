use color_eyre::Result;
use ratatui::{backend::CrosstermBackend, Terminal};
use std::io;
use std::sync::Arc;
use swapmeet_location::{
    app::{Action, App},
    config::{Config, DEFAULT_CONFIG_PATH},
    events::{Event, EventHandler, TuiPermissionPrompt},
    kv::SqliteKvStore,
    logging,
    scheduler::AppState,
    service::LocationService,
    ui,
};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Instrumentation and safety
    let _log_guard = logging::initialize_logging();
    install_panic_hook();
    color_eyre::install()?;

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = Config::load_from(&config_path);
    info!("Using config {}", config_path);

    let kv = Arc::new(SqliteKvStore::open(&config.storage.database_path)?);
    let mut events = EventHandler::new(config.ui.tick_rate_ms);
    let prompt = Arc::new(TuiPermissionPrompt::new(events.tx.clone()));
    let service = Arc::new(LocationService::from_config(&config, kv, prompt)?);

    // Ready terminal and state
    let mut terminal = setup_terminal()?;
    let mut app = App::new(service.search_radius_km());

    spawn_snapshot_forwarder(&service, events.tx.clone());
    {
        let service = Arc::clone(&service);
        let tx = events.tx.clone();
        tokio::spawn(async move {
            service.initialize().await;
            send_cities(&service, &tx).await;
        });
    }

    // Main loop
    while !app.should_quit {
        terminal.draw(|f| ui::render(f, &app))?;

        let Some(event) = events.next().await else {
            break;
        };
        match event {
            Event::Tick => {
                app.cities_loading = service.cities_loading();
                app.on_tick();
            }
            Event::Input(key) => {
                let action = app.handle_key(key);
                dispatch(action, &service, &events.tx);
            }
            Event::FocusGained => service.app_state_changed(AppState::Active),
            Event::FocusLost => service.app_state_changed(AppState::Background),
            Event::LocationChanged => {
                app.set_snapshot(service.snapshot());
                let service = Arc::clone(&service);
                let tx = events.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(Event::CityLabel(service.selected_city().await));
                });
            }
            Event::CitiesLoaded(cities) => app.set_cities(cities),
            Event::CityLabel(city) => app.city_label = city,
            Event::RefreshFinished(outcome) => app.on_refresh_finished(outcome),
            Event::PermissionRequest(answer) => app.request_permission(answer),
        }
    }

    restore_terminal(terminal)?;
    if let Err(e) = service.dispose().await {
        error!("Failed to flush location state on exit: {}", e);
    }
    info!("Shut down cleanly");
    Ok(())
}

/// Runs the service call behind a key press off the UI loop.
fn dispatch(action: Action, service: &Arc<LocationService>, tx: &UnboundedSender<Event>) {
    match action {
        Action::None | Action::Quit => {}
        Action::Refresh => {
            let service = Arc::clone(service);
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = service.refresh().await;
                let _ = tx.send(Event::RefreshFinished(outcome));
                send_cities(&service, &tx).await;
            });
        }
        Action::PinCity(city) => service.pin_city(&city),
        Action::PinCurrent => {
            service.pin_current();
        }
        Action::ClearOverride => service.clear_manual_override(),
    }
}

async fn send_cities(service: &LocationService, tx: &UnboundedSender<Event>) {
    match service.cities().await {
        Ok(cities) => {
            let _ = tx.send(Event::CitiesLoaded(cities));
        }
        Err(e) => error!("Could not load cities: {}", e),
    }
}

/// Turns store changes into redraw events.
fn spawn_snapshot_forwarder(service: &LocationService, tx: UnboundedSender<Event>) {
    let mut rx = service.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            if tx.send(Event::LocationChanged).is_err() {
                break;
            }
        }
    });
}

fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    crossterm::execute!(
        stdout,
        crossterm::terminal::EnterAlternateScreen,
        crossterm::event::EnableFocusChange,
        crossterm::cursor::Hide
    )?;
    Ok(Terminal::new(CrosstermBackend::new(stdout))?)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::event::DisableFocusChange,
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::cursor::Show
    )?;
    Ok(())
}

fn install_panic_hook() {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        // Force terminal cleanup!
        crossterm::terminal::disable_raw_mode().ok();
        crossterm::execute!(
            std::io::stdout(),
            crossterm::event::DisableFocusChange,
            crossterm::terminal::LeaveAlternateScreen,
            crossterm::cursor::Show
        )
        .ok();
        original_hook(panic_info);
    }));
}
