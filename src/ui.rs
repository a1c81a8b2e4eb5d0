//! TUI rendering for the location dashboard.
//!
//! The dashboard shows the selected location on the left and the active
//! cities on the right; the picker reuses the city list with a highlight,
//! and the permission modal is drawn over whatever is underneath.

use crate::app::{App, ViewMode};
use crate::models::{LocationSource, SelectedLocation};
use ratatui::{prelude::*, widgets::*};

/// Renders one frame.
pub fn render(f: &mut Frame, app: &App) {
    let area = f.size();
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1), Constraint::Length(1)])
        .split(area);

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(45), Constraint::Percentage(55)])
        .split(rows[0]);

    render_location_panel(f, app, chunks[0]);
    render_city_list(f, app, chunks[1]);
    render_status_line(f, app, rows[1]);
    render_help(f, app, rows[2]);

    if app.awaiting_permission() {
        render_permission_modal(f, area);
    }
}

fn label(text: &str) -> Span<'_> {
    Span::styled(text, Style::default().add_modifier(Modifier::BOLD))
}

fn render_location_panel(f: &mut Frame, app: &App, area: Rect) {
    let snapshot = &app.snapshot;
    let mut lines = Vec::new();

    match app.selected() {
        Some(selected) => {
            let (mode, mode_color) = if selected.is_manual() {
                ("MANUAL", Color::Magenta)
            } else {
                ("AUTOMATIC", Color::Green)
            };
            lines.push(Line::from(vec![
                label("  SELECTED: "),
                Span::styled(
                    selected.coordinates().to_string(),
                    Style::default().fg(Color::Yellow),
                ),
                Span::raw("  │  "),
                Span::styled(mode, Style::default().fg(mode_color)),
            ]));

            let place = match &selected {
                SelectedLocation::Manual(m) => m.city_name.clone(),
                SelectedLocation::Automatic(_) => None,
            }
            .or_else(|| app.city_label.as_ref().map(|c| c.display_name()));
            lines.push(Line::from(vec![
                label("  NEAREST:  "),
                Span::styled(
                    place.unwrap_or_else(|| "Unknown".to_string()),
                    Style::default().fg(Color::Cyan),
                ),
            ]));
        }
        None => lines.push(Line::from(Span::styled(
            "  No location yet",
            Style::default().fg(Color::DarkGray),
        ))),
    }

    lines.push(Line::from(""));

    if let Some(auto) = &snapshot.automatic {
        let age_secs = auto.age_ms(chrono::Utc::now().timestamp_millis()).max(0) / 1000;
        let source = auto.source.map(|s| s.to_string()).unwrap_or_else(|| "?".into());
        lines.push(Line::from(vec![
            label("  FIX:      "),
            Span::raw(auto.coordinates.to_string()),
            Span::raw("  │  "),
            Span::styled(source.to_uppercase(), Style::default().fg(source_color(auto.source))),
        ]));
        lines.push(Line::from(vec![
            label("  AGE:      "),
            Span::styled(format_age(age_secs), Style::default().fg(age_color(age_secs))),
        ]));
    }

    lines.push(Line::from(vec![
        label("  RADIUS:   "),
        Span::raw(format!("{:.0}km", app.search_radius_km)),
    ]));
    lines.push(Line::from(""));

    let spinner = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let spin = spinner[app.tick_count % spinner.len()];
    lines.push(Line::from(vec![
        label("  LOCATING: "),
        if snapshot.loading {
            Span::styled(spin, Style::default().fg(Color::Cyan))
        } else {
            Span::styled("idle", Style::default().fg(Color::DarkGray))
        },
        Span::raw("  │  "),
        label("CITIES: "),
        if app.cities_loading {
            Span::styled(spin, Style::default().fg(Color::Cyan))
        } else {
            Span::styled(app.cities.len().to_string(), Style::default().fg(Color::DarkGray))
        },
    ]));
    if let Some(err) = &snapshot.error {
        lines.push(Line::from(vec![
            label("  ERROR:    "),
            Span::styled(err.as_str(), Style::default().fg(Color::Red)),
        ]));
    }

    let p = Paragraph::new(lines).wrap(Wrap { trim: false }).block(
        Block::default()
            .title(" Location ")
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded),
    );
    f.render_widget(p, area);
}

fn render_city_list(f: &mut Frame, app: &App, area: Rect) {
    let picking = app.view_mode == ViewMode::Picker;
    let items: Vec<ListItem> = app
        .cities
        .iter()
        .enumerate()
        .map(|(i, city)| {
            let style = if picking && i == app.picker_index {
                Style::default()
                    .fg(Color::Cyan)
                    .bg(Color::Rgb(30, 30, 60))
                    .add_modifier(Modifier::BOLD)
            } else {
                Style::default()
            };
            let distance = app
                .distance_to(city)
                .map(|d| format!("{:>7.1}km", d))
                .unwrap_or_else(|| "       --".to_string());
            let in_range = app
                .distance_to(city)
                .is_some_and(|d| d <= app.search_radius_km);

            ListItem::new(Line::from(vec![
                Span::styled(format!(" {:<24}", city.display_name()), style),
                Span::styled(
                    format!(" │ {}", distance),
                    Style::default().fg(if in_range { Color::Green } else { Color::DarkGray }),
                ),
            ]))
        })
        .collect();

    let title = if picking { " Pick a City " } else { " Active Cities " };
    let list = List::new(items).block(
        Block::default()
            .title(title)
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(if picking {
                Style::default().fg(Color::Cyan)
            } else {
                Style::default()
            }),
    );
    f.render_widget(list, area);
}

fn render_status_line(f: &mut Frame, app: &App, area: Rect) {
    let msg = app.status_message.as_deref().unwrap_or("");
    let p = Paragraph::new(format!(" {}", msg)).style(Style::default().fg(Color::Yellow));
    f.render_widget(p, area);
}

fn render_help(f: &mut Frame, app: &App, area: Rect) {
    let text = match app.view_mode {
        ViewMode::Dashboard => " r refresh   p pick city   c clear override   q quit",
        ViewMode::Picker => " ↑/↓ select   Enter pin city   u use current location   Esc back   q quit",
    };
    let p = Paragraph::new(text).style(Style::default().fg(Color::DarkGray));
    f.render_widget(p, area);
}

fn render_permission_modal(f: &mut Frame, area: Rect) {
    let modal = centered_rect(50, 7, area);
    let text = vec![
        Line::from(""),
        Line::from("Allow this app to use your GPS location?"),
        Line::from(""),
        Line::from(vec![
            Span::styled("y", Style::default().fg(Color::Green).add_modifier(Modifier::BOLD)),
            Span::raw(" allow    "),
            Span::styled("n", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::raw(" deny"),
        ]),
    ];
    let p = Paragraph::new(text).alignment(Alignment::Center).block(
        Block::default()
            .title(" Location Permission ")
            .borders(Borders::ALL)
            .border_type(BorderType::Rounded)
            .border_style(Style::default().fg(Color::Yellow)),
    );
    f.render_widget(Clear, modal);
    f.render_widget(p, modal);
}

/// A `width_pct`% wide, `height` rows tall rectangle centred in `area`.
fn centered_rect(width_pct: u16, height: u16, area: Rect) -> Rect {
    let width = area.width * width_pct / 100;
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn format_age(secs: i64) -> String {
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m {}s", s / 60, s % 60),
        s => format!("{}h {}m", s / 3600, (s % 3600) / 60),
    }
}

fn age_color(secs: i64) -> Color {
    if secs < 300 {
        Color::Green
    } else {
        Color::Red
    }
}

fn source_color(source: Option<LocationSource>) -> Color {
    match source {
        Some(LocationSource::Gps) => Color::Green,
        Some(LocationSource::Ip) => Color::Yellow,
        Some(LocationSource::Region) => Color::Magenta,
        None => Color::DarkGray,
    }
}
