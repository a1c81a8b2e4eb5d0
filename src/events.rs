//! Event types and the input driver for the location dashboard.
//!
//! [`EventHandler`] multiplexes terminal input, focus changes, ticks and
//! messages from the location service into one stream consumed by the main
//! loop in `main.rs`. Other tasks post into it through
//! [`EventHandler::tx`].

use crate::models::City;
use crate::providers::PermissionPrompt;
use crate::store::RefreshOutcome;
use async_trait::async_trait;
use crossterm::event::{self, Event as CrosstermEvent, KeyEvent, KeyEventKind};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, warn};

/// Events processed by the application event loop.
pub enum Event {
    /// Periodic tick used for redraws and the fix-age counter.
    Tick,
    /// User key press from the terminal.
    Input(KeyEvent),
    /// The terminal window gained focus.
    FocusGained,
    /// The terminal window lost focus.
    FocusLost,
    /// The location snapshot changed.
    LocationChanged,
    /// A city list became available (or was refreshed).
    CitiesLoaded(Vec<City>),
    /// Nearest city to the current selection, if any is known.
    CityLabel(Option<City>),
    /// A user-initiated refresh finished.
    RefreshFinished(RefreshOutcome),
    /// GPS wants permission; answer through the sender.
    PermissionRequest(oneshot::Sender<bool>),
}

pub struct EventHandler {
    /// Sender for posting events from background tasks.
    pub tx: mpsc::UnboundedSender<Event>,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
    /// Creates a new event handler and starts the input/tick thread.
    ///
    /// crossterm's `poll` blocks, so the loop runs on the blocking pool. It
    /// exits when the receiver is gone or the terminal stops answering.
    pub fn new(tick_rate_ms: u64) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let event_tx = tx.clone();

        tokio::task::spawn_blocking(move || {
            let tick_rate = Duration::from_millis(tick_rate_ms);
            let mut last_tick = Instant::now();
            loop {
                let timeout = tick_rate
                    .checked_sub(last_tick.elapsed())
                    .unwrap_or(Duration::from_secs(0));

                let ready = match event::poll(timeout) {
                    Ok(ready) => ready,
                    Err(e) => {
                        error!("Terminal poll failed: {}", e);
                        break;
                    }
                };
                if ready {
                    let forwarded = match event::read() {
                        Ok(CrosstermEvent::Key(key)) if key.kind == KeyEventKind::Press => {
                            Some(Event::Input(key))
                        }
                        Ok(CrosstermEvent::FocusGained) => Some(Event::FocusGained),
                        Ok(CrosstermEvent::FocusLost) => Some(Event::FocusLost),
                        Ok(_) => None,
                        Err(e) => {
                            error!("Terminal read failed: {}", e);
                            break;
                        }
                    };
                    if let Some(ev) = forwarded {
                        if event_tx.send(ev).is_err() {
                            break;
                        }
                    }
                }
                if last_tick.elapsed() >= tick_rate {
                    if event_tx.send(Event::Tick).is_err() {
                        break;
                    }
                    last_tick = Instant::now();
                }
            }
        });

        Self { tx, rx }
    }

    /// Receives the next event. `None` once every sender is gone.
    pub async fn next(&mut self) -> Option<Event> {
        self.rx.recv().await
    }
}

/// Asks for GPS permission through the dashboard's modal.
pub struct TuiPermissionPrompt {
    tx: mpsc::UnboundedSender<Event>,
}

impl TuiPermissionPrompt {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl PermissionPrompt for TuiPermissionPrompt {
    /// A closed UI counts as a refusal.
    async fn ask(&self) -> bool {
        let (answer_tx, answer_rx) = oneshot::channel();
        if self.tx.send(Event::PermissionRequest(answer_tx)).is_err() {
            warn!("Permission prompt unavailable; treating as denied");
            return false;
        }
        answer_rx.await.unwrap_or(false)
    }
}
