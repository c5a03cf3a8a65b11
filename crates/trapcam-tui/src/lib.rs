// Copyright 2026 Phillip Cloud
// Licensed under the Apache License, Version 2.0

use anyhow::{Context, Result, anyhow};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use crossterm::{execute, terminal};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction as Axis, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Text};
use ratatui::widgets::{Block, Borders, Clear, Paragraph};
use std::io;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;
use tracing::warn;
use trapcam_app::{
    Cursor, Direction, FetchCompletion, Page, PageRequest, PlaybackCommand, PlaybackEvent,
    PlaybackSession, PlaybackView, THRESHOLD_STEP,
};

const STATUS_CLEAR_DELAY: Duration = Duration::from_secs(4);
const DENSITY_BAR_WIDTH: usize = 12;
const ACTIVE_MARK: &str = "▶";
const DENSITY_MARK: &str = "█";

/// Runs page requests for the viewer. The default `spawn_fetch` runs the
/// request inline and ignores `delay`; real runtimes move it to a worker.
pub trait PlaybackRuntime {
    fn fetch_page(&mut self, request: &PageRequest) -> Result<Page>;

    fn spawn_fetch(
        &mut self,
        request: PageRequest,
        _delay: Duration,
        tx: Sender<InternalEvent>,
    ) -> Result<()> {
        let completion = match self.fetch_page(&request) {
            Ok(page) => FetchCompletion::succeeded(&request, page),
            Err(error) => FetchCompletion::failed(&request, format!("{error:#}")),
        };
        tx.send(InternalEvent::FetchCompleted(completion))
            .map_err(|_| anyhow!("fetch event channel closed"))?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InternalEvent {
    ClearStatus { token: u64 },
    FetchCompleted(FetchCompletion),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct ViewData {
    status_line: Option<String>,
    status_token: u64,
    help_visible: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PickerRow {
    text: String,
    active: bool,
}

pub fn run_app<R: PlaybackRuntime>(session: &mut PlaybackSession, runtime: &mut R) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, terminal::EnterAlternateScreen).context("enter alternate screen")?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;

    let mut view_data = ViewData::default();
    let (internal_tx, internal_rx) = mpsc::channel();

    let events = session.start();
    handle_playback_events(runtime, &mut view_data, &internal_tx, events);

    let mut result = Ok(());
    loop {
        process_internal_events(session, runtime, &mut view_data, &internal_tx, &internal_rx);

        if let Err(error) = terminal.draw(|frame| render(frame, session, &view_data)) {
            result = Err(error).context("draw frame");
            break;
        }

        let has_event = event::poll(Duration::from_millis(120)).context("poll event")?;
        if has_event {
            match event::read().context("read event")? {
                Event::Key(key) => {
                    if handle_key_event(session, runtime, &mut view_data, &internal_tx, key) {
                        break;
                    }
                }
                Event::Resize(_, _) => {}
                _ => {}
            }
        }
    }

    disable_raw_mode().context("disable raw mode")?;
    execute!(io::stdout(), terminal::LeaveAlternateScreen).context("leave alternate screen")?;
    result
}

fn process_internal_events<R: PlaybackRuntime>(
    session: &mut PlaybackSession,
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    rx: &Receiver<InternalEvent>,
) {
    while let Ok(event) = rx.try_recv() {
        match event {
            InternalEvent::ClearStatus { token } if token == view_data.status_token => {
                view_data.status_line = None;
            }
            InternalEvent::ClearStatus { .. } => {}
            InternalEvent::FetchCompleted(completion) => {
                let events = session.complete_fetch(completion);
                handle_playback_events(runtime, view_data, tx, events);
            }
        }
    }
}

/// Starts the fetches the session asked for and turns surfaced conditions
/// into status messages.
fn handle_playback_events<R: PlaybackRuntime>(
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    events: Vec<PlaybackEvent>,
) {
    for event in events {
        match event {
            PlaybackEvent::FetchIssued(request) => {
                spawn_fetch(runtime, view_data, tx, request, Duration::ZERO);
            }
            PlaybackEvent::FetchRetryScheduled {
                request,
                delay,
                cause,
            } => {
                let direction = request.direction;
                spawn_fetch(runtime, view_data, tx, request, delay);
                emit_status(
                    view_data,
                    tx,
                    format!("loading {direction} failed ({cause}); retrying"),
                );
            }
            PlaybackEvent::Condition(error) => {
                let message = if error.is_retryable() {
                    format!("{error}; press r to retry")
                } else {
                    error.to_string()
                };
                emit_status(view_data, tx, message);
            }
            PlaybackEvent::IntentsDropped { direction, count } => {
                emit_status(
                    view_data,
                    tx,
                    format!("dropped {count} queued step(s) waiting on {direction}"),
                );
            }
            PlaybackEvent::ThresholdChanged(threshold) => {
                emit_status(view_data, tx, format!("score threshold {threshold:.2}"));
            }
            PlaybackEvent::WindowExtended { .. }
            | PlaybackEvent::StaleResultDiscarded { .. }
            | PlaybackEvent::ActiveChanged { .. }
            | PlaybackEvent::CursorPending { .. }
            | PlaybackEvent::IntentDeferred(_) => {}
        }
    }
}

fn spawn_fetch<R: PlaybackRuntime>(
    runtime: &mut R,
    view_data: &mut ViewData,
    tx: &Sender<InternalEvent>,
    request: PageRequest,
    delay: Duration,
) {
    let direction = request.direction;
    if let Err(error) = runtime.spawn_fetch(request.clone(), delay, tx.clone()) {
        warn!(%direction, %error, "could not start fetch");
        // The lane stays in flight until some completion for it arrives.
        let completion = FetchCompletion::failed(&request, format!("{error:#}"));
        if tx.send(InternalEvent::FetchCompleted(completion)).is_err() {
            emit_status(view_data, tx, format!("could not load {direction}: {error}"));
        }
    }
}

fn schedule_status_clear(internal_tx: &Sender<InternalEvent>, token: u64) {
    let sender = internal_tx.clone();
    thread::spawn(move || {
        thread::sleep(STATUS_CLEAR_DELAY);
        let _ = sender.send(InternalEvent::ClearStatus { token });
    });
}

fn emit_status(
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    message: impl Into<String>,
) {
    view_data.status_line = Some(message.into());
    view_data.status_token = view_data.status_token.saturating_add(1);
    schedule_status_clear(internal_tx, view_data.status_token);
}

fn handle_key_event<R: PlaybackRuntime>(
    session: &mut PlaybackSession,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
    key: KeyEvent,
) -> bool {
    if key.code == KeyCode::Char('q') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return true;
    }

    if view_data.help_visible {
        if matches!(key.code, KeyCode::Esc | KeyCode::Char('?')) {
            view_data.help_visible = false;
        }
        return false;
    }

    let command = match key.code {
        KeyCode::Char('q') => return true,
        KeyCode::Char('?') => {
            view_data.help_visible = true;
            return false;
        }
        KeyCode::Up | KeyCode::Left | KeyCode::Char('k') => PlaybackCommand::StepPrevious,
        KeyCode::Down | KeyCode::Right | KeyCode::Char('j') => PlaybackCommand::StepNext,
        KeyCode::Char('g') | KeyCode::Home => {
            let Some(first) = session.window().first() else {
                return false;
            };
            PlaybackCommand::SelectItem(first.id)
        }
        KeyCode::Char('G') | KeyCode::End => {
            let Some(last) = session.window().last() else {
                return false;
            };
            PlaybackCommand::SelectItem(last.id)
        }
        KeyCode::Char('[') => PlaybackCommand::ExtendWindow(Direction::Before),
        KeyCode::Char(']') => PlaybackCommand::ExtendWindow(Direction::After),
        KeyCode::Char('+') | KeyCode::Char('=') => PlaybackCommand::AdjustThreshold(THRESHOLD_STEP),
        KeyCode::Char('-') => PlaybackCommand::AdjustThreshold(-THRESHOLD_STEP),
        KeyCode::Char('r') => {
            reload_failed_edges(session, runtime, view_data, internal_tx);
            return false;
        }
        _ => return false,
    };

    let events = session.dispatch(command);
    handle_playback_events(runtime, view_data, internal_tx, events);
    false
}

fn reload_failed_edges<R: PlaybackRuntime>(
    session: &mut PlaybackSession,
    runtime: &mut R,
    view_data: &mut ViewData,
    internal_tx: &Sender<InternalEvent>,
) {
    let failed = Direction::ALL
        .into_iter()
        .filter(|direction| session.view().failure(*direction).is_some())
        .collect::<Vec<_>>();
    if failed.is_empty() {
        emit_status(view_data, internal_tx, "nothing to reload");
        return;
    }
    for direction in failed {
        let events = session.dispatch(PlaybackCommand::ReloadEdge(direction));
        handle_playback_events(runtime, view_data, internal_tx, events);
    }
    emit_status(view_data, internal_tx, "reloading");
}

fn render(frame: &mut ratatui::Frame<'_>, session: &PlaybackSession, view_data: &ViewData) {
    let view = session.view();
    let layout = Layout::default()
        .direction(Axis::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(1),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let header = Paragraph::new(header_text(&view))
        .block(Block::default().title("trapcam").borders(Borders::ALL));
    frame.render_widget(header, layout[0]);

    let body = Layout::default()
        .direction(Axis::Horizontal)
        .constraints([Constraint::Length(36), Constraint::Min(1)])
        .split(layout[1]);

    let picker_height = usize::from(body[0].height.saturating_sub(2));
    let rows = picker_rows(&view, picker_height)
        .into_iter()
        .map(|row| {
            if row.active {
                Line::styled(
                    row.text,
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                )
            } else {
                Line::from(row.text)
            }
        })
        .collect::<Vec<_>>();
    let picker = Paragraph::new(Text::from(rows))
        .block(Block::default().title("captures").borders(Borders::ALL));
    frame.render_widget(picker, body[0]);

    let panel = Paragraph::new(frame_text(&view))
        .block(Block::default().title("frame").borders(Borders::ALL));
    frame.render_widget(panel, body[1]);

    let status = Paragraph::new(status_text(view_data))
        .style(Style::default().fg(Color::Yellow))
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(status, layout[2]);

    if view_data.help_visible {
        let area = centered_rect(60, 50, frame.area());
        frame.render_widget(Clear, area);
        let help = Paragraph::new(help_overlay_text())
            .block(Block::default().title("help").borders(Borders::ALL));
        frame.render_widget(help, area);
    }
}

fn position_label(view: &PlaybackView<'_>) -> String {
    match view.position() {
        Some((current, total)) => format!("{current} / {total}"),
        None => "- / -".to_owned(),
    }
}

fn header_text(view: &PlaybackView<'_>) -> String {
    let mut parts = vec![
        format!("capture {}", position_label(view)),
        format!("threshold {}", view.filter.label()),
    ];
    let loading = Direction::ALL
        .into_iter()
        .filter(|direction| view.loading(*direction))
        .map(Direction::as_str)
        .collect::<Vec<_>>();
    if !loading.is_empty() {
        parts.push(format!("loading {}", loading.join("+")));
    }
    if view.queued_intents > 0 {
        parts.push(format!("{} queued", view.queued_intents));
    }
    parts.join(" | ")
}

fn edge_row(view: &PlaybackView<'_>, direction: Direction) -> Option<PickerRow> {
    let (earlier_or_later, arrow) = match direction {
        Direction::Before => ("earlier", "↑"),
        Direction::After => ("later", "↓"),
    };
    let text = if view.loading(direction) {
        format!("  … loading {earlier_or_later}")
    } else if let Some(cause) = view.failure(direction) {
        format!("  ! {earlier_or_later} failed: {cause}")
    } else if view.window.has_more(direction) && !view.window.is_empty() {
        format!("  {arrow} more {earlier_or_later}")
    } else {
        return None;
    };
    Some(PickerRow {
        text,
        active: false,
    })
}

fn density_bar(count: u32, max: u32) -> String {
    if count == 0 {
        return String::new();
    }
    let width = (count as usize * DENSITY_BAR_WIDTH).div_ceil(max.max(1) as usize);
    DENSITY_MARK.repeat(width.clamp(1, DENSITY_BAR_WIDTH))
}

/// The visible slice of the window, scrolled so the active capture stays in
/// view, framed by edge markers.
fn picker_rows(view: &PlaybackView<'_>, height: usize) -> Vec<PickerRow> {
    let window = view.window;
    if window.is_empty() {
        let text = if view.loading(Direction::After) || view.loading(Direction::Before) {
            "  … loading captures"
        } else if let Some(cause) = view.failure(Direction::After) {
            return vec![PickerRow {
                text: format!("  ! loading failed: {cause}"),
                active: false,
            }];
        } else {
            "  no captures"
        };
        return vec![PickerRow {
            text: text.to_owned(),
            active: false,
        }];
    }

    let top = edge_row(view, Direction::Before);
    let bottom = edge_row(view, Direction::After);
    let reserved = usize::from(top.is_some()) + usize::from(bottom.is_some());
    let rows = height.saturating_sub(reserved).max(1);
    let active = view.cursor.current_index();
    let anchor = active.unwrap_or(0);
    let start = anchor
        .saturating_sub(rows / 2)
        .min(window.len().saturating_sub(rows));
    let max = window.max_detections();

    let mut out = Vec::with_capacity(rows + reserved);
    out.extend(top);
    for (index, capture) in window.iter().enumerate().skip(start).take(rows) {
        let is_active = active == Some(index);
        let mark = if is_active { ACTIVE_MARK } else { " " };
        out.push(PickerRow {
            text: format!(
                "{mark} {} {:>3} {}",
                capture.time_label(),
                capture.detections_count,
                density_bar(capture.detections_count, max)
            ),
            active: is_active,
        });
    }
    out.extend(bottom);
    out
}

fn frame_text(view: &PlaybackView<'_>) -> String {
    let Some(capture) = view.active_capture() else {
        return match view.cursor {
            Cursor::Pending { target } => format!("waiting for capture {target}…"),
            _ if view.window.is_empty() && (view.loading_after || view.loading_before) => {
                "loading captures…".to_owned()
            }
            _ if view.window.is_empty() => "no captures in this session".to_owned(),
            _ => "no capture selected".to_owned(),
        };
    };

    let shown = view.filter.visible(capture).collect::<Vec<_>>();
    let mut lines = vec![
        format!("capture {}  (#{})", position_label(view), capture.id),
        capture.date_time_label(),
        capture.url.clone(),
        format!(
            "{}x{} | {} detections, {} at score >= {}",
            capture.width,
            capture.height,
            capture.detections_count,
            shown.len(),
            view.filter.label()
        ),
        String::new(),
    ];
    for detection in shown {
        let bbox = detection
            .bbox
            .map(|bbox| {
                format!(
                    "  at {:.0},{:.0} {:.0}x{:.0}",
                    bbox.x1,
                    bbox.y1,
                    bbox.width(),
                    bbox.height()
                )
            })
            .unwrap_or_default();
        lines.push(format!(
            "- {}  score {:.2}{bbox}",
            detection.label, detection.score
        ));
    }
    lines.join("\n")
}

fn status_text(view_data: &ViewData) -> String {
    if view_data.help_visible {
        return String::new();
    }
    let default = "k/j step | g/G ends | [/] load | +/- threshold | r reload | ? help | q quit";
    match &view_data.status_line {
        Some(status) => format!("{status} | {default}"),
        None => default.to_owned(),
    }
}

fn help_overlay_text() -> &'static str {
    "step: up/k/left previous | down/j/right next\n\
jump: g/home first loaded | G/end last loaded\n\
load: [ earlier | ] later | r retry a failed edge\n\
detections: + raise threshold | - lower threshold\n\
global: ? help | q or ctrl+q quit"
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Axis::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);

    Layout::default()
        .direction(Axis::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}
