mod help;
mod state;

use crate::catalog::Catalog;
use crate::cli::{self, Cli};
use crate::model::{Severity, SupervisorEvent};
use crate::orchestrator::{self, UiCommand};
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Terminal,
};
use state::UiState;
use std::{io, time::Duration, time::Instant};
use time::{macros::format_description, OffsetDateTime, UtcOffset};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

const GRID_COLUMNS: usize = 4;
const TILE_HEIGHT: u16 = 5;

pub async fn run(args: Cli, catalog: Catalog) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<SupervisorEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    // Resolve the local offset before the UI thread starts; it may be
    // unavailable once more threads exist.
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);

    let (supervisor, feedback_rx) = cli::build_supervisor(&args, event_tx.clone());

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let mut ui_state = UiState::from_catalog(&catalog);
    ui_state.dev = args.dev;
    let ui_handle =
        std::thread::spawn(move || run_threaded(ui_state, offset, event_rx, cmd_tx));

    let res =
        orchestrator::run_controller(&catalog, supervisor, feedback_rx, cmd_rx, event_tx).await;

    let join_res = tokio::task::spawn_blocking(move || ui_handle.join()).await;
    if let Ok(joined) = join_res {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(anyhow::anyhow!("TUI thread panicked")),
        }
    }

    res
}

/// Run the TUI loop on a dedicated thread.
fn run_threaded(
    mut state: UiState,
    offset: UtcOffset,
    mut event_rx: UnboundedReceiver<SupervisorEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    let fullscreen = !state.dev;
    if fullscreen {
        execute!(stdout, EnterAlternateScreen).ok();
    }

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep the UI responsive.
        let mut controller_gone = false;
        loop {
            match event_rx.try_recv() {
                Ok(ev) => {
                    tracing::debug!(?ev, "ui event");
                    state.apply_event(ev, Instant::now());
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    controller_gone = true;
                    break;
                }
            }
        }
        if controller_gone {
            tracing::warn!("controller stopped, closing launcher");
            break Ok(());
        }

        if last_tick.elapsed() >= tick_rate {
            state.expire_notification(Instant::now());
            let clock = clock_text(offset);
            terminal.draw(|f| draw(f.area(), f, &state, &clock)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                match (k.modifiers, k.code) {
                    // Also covers Ctrl-Q.
                    (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => {
                        let _ = cmd_tx.send(UiCommand::Quit);
                        break Ok(());
                    }
                    (_, KeyCode::Char('?')) => {
                        state.show_help = !state.show_help;
                    }
                    (_, KeyCode::Esc) if state.show_help => {
                        state.show_help = false;
                    }
                    (_, KeyCode::Esc) | (_, KeyCode::Char('b')) => {
                        let _ = cmd_tx.send(UiCommand::ReturnToLauncher);
                    }
                    (_, KeyCode::Char('x')) => {
                        let _ = cmd_tx.send(UiCommand::Terminate);
                    }
                    (_, KeyCode::Enter) => {
                        if let Some(tile) = state.selected_tile() {
                            let _ = cmd_tx.send(UiCommand::Launch(tile.id.clone()));
                        }
                    }
                    (_, KeyCode::Char(c @ '1'..='9')) => {
                        let n = c as usize - '0' as usize;
                        match state.tile_at_number(n) {
                            Some(id) => {
                                let _ = cmd_tx.send(UiCommand::Launch(id.to_string()));
                            }
                            None => {
                                state.notify(
                                    format!("No tile {n}"),
                                    Severity::Info,
                                    Instant::now(),
                                );
                            }
                        }
                    }
                    (_, KeyCode::Left) | (_, KeyCode::Char('h')) => {
                        state.move_selection(-1, 0, GRID_COLUMNS);
                    }
                    (_, KeyCode::Right) | (_, KeyCode::Char('l')) => {
                        state.move_selection(1, 0, GRID_COLUMNS);
                    }
                    (_, KeyCode::Up) | (_, KeyCode::Char('k')) => {
                        state.move_selection(0, -1, GRID_COLUMNS);
                    }
                    (_, KeyCode::Down) | (_, KeyCode::Char('j')) => {
                        state.move_selection(0, 1, GRID_COLUMNS);
                    }
                    _ => {}
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    if fullscreen {
        execute!(stdout, LeaveAlternateScreen).ok();
    }
    terminal.show_cursor().ok();
    res
}

fn clock_text(offset: UtcOffset) -> String {
    let now = OffsetDateTime::now_utc().to_offset(offset);
    now.format(format_description!(
        "[weekday repr:short] [day] [month repr:short]  [hour]:[minute]"
    ))
    .unwrap_or_default()
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState, clock: &str) {
    let now_playing_height = if state.now_playing.is_some() { 4 } else { 0 };
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            [
                Constraint::Length(3),
                Constraint::Min(0),
                Constraint::Length(now_playing_height),
                Constraint::Length(3),
            ]
            .as_ref(),
        )
        .split(area);

    let title = if state.dev {
        "streaming-launcher (dev)"
    } else {
        "streaming-launcher"
    };
    let header = Paragraph::new(Line::from(Span::styled(
        clock.to_string(),
        Style::default().fg(Color::Cyan),
    )))
    .alignment(Alignment::Right)
    .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(header, chunks[0]);

    if state.show_help {
        help::draw_help(chunks[1], f);
    } else {
        draw_grid(chunks[1], f, state);
    }

    if state.now_playing.is_some() {
        draw_now_playing(chunks[2], f, state);
    }
    draw_status(chunks[3], f, state);
}

fn draw_grid(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    if state.tiles.is_empty() {
        let p = Paragraph::new("No tiles configured. See --catalog.")
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL));
        f.render_widget(p, area);
        return;
    }

    let rows = state.tiles.len().div_ceil(GRID_COLUMNS);
    let row_areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(
            (0..rows)
                .map(|_| Constraint::Length(TILE_HEIGHT))
                .chain(std::iter::once(Constraint::Min(0)))
                .collect::<Vec<_>>(),
        )
        .split(area);

    for (row, chunk) in state.tiles.chunks(GRID_COLUMNS).enumerate() {
        let cells = Layout::default()
            .direction(Direction::Horizontal)
            .constraints(
                (0..GRID_COLUMNS)
                    .map(|_| Constraint::Ratio(1, GRID_COLUMNS as u32))
                    .collect::<Vec<_>>(),
            )
            .split(row_areas[row]);

        for (col, tile) in chunk.iter().enumerate() {
            let index = row * GRID_COLUMNS + col;
            let selected = index == state.selected;
            let border = if selected {
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::DarkGray)
            };
            let status = if tile.loading {
                Span::styled("Loading…", Style::default().fg(Color::Yellow))
            } else {
                Span::raw("")
            };
            let body = Paragraph::new(vec![
                Line::from(Span::styled(
                    tile.icon.clone(),
                    Style::default().fg(Color::Magenta).add_modifier(Modifier::BOLD),
                )),
                Line::from(tile.name.clone()),
                Line::from(status),
            ])
            .alignment(Alignment::Center)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(border)
                    .title(format!("{}", index + 1)),
            );
            f.render_widget(body, cells[col]);
        }
    }
}

fn draw_now_playing(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let Some(np) = state.now_playing.as_ref() else {
        return;
    };
    let status = match (np.running, np.watched) {
        (_, false) => Span::styled("not watched", Style::default().fg(Color::DarkGray)),
        (true, true) => Span::styled("running", Style::default().fg(Color::Green)),
        (false, true) => Span::styled("starting", Style::default().fg(Color::Yellow)),
    };
    let elapsed = humantime::format_duration(Duration::from_secs(np.since.elapsed().as_secs()));
    let pid = np
        .pid
        .map(|p| format!("pid {p}"))
        .unwrap_or_else(|| "pid ?".into());
    let p = Paragraph::new(vec![
        Line::from(vec![
            Span::styled(
                np.display_name.clone(),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw("  "),
            status,
            Span::raw(format!("  {elapsed}  {pid}  session {}", np.session)),
        ]),
        Line::from(vec![
            Span::styled("Esc", Style::default().fg(Color::Magenta)),
            Span::raw(" back to launcher   "),
            Span::styled("x", Style::default().fg(Color::Magenta)),
            Span::raw(" close app"),
        ]),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!("Now playing: {}", np.target_id)),
    );
    f.render_widget(p, area);
}

fn draw_status(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let line = match &state.notification {
        Some(n) => {
            let color = match n.severity {
                Severity::Info => Color::Cyan,
                Severity::Error => Color::Red,
            };
            Line::from(Span::styled(n.message.clone(), Style::default().fg(color)))
        }
        None if !state.info.is_empty() => Line::from(state.info.clone()),
        None => Line::from(vec![
            Span::raw("Press "),
            Span::styled("?", Style::default().fg(Color::Magenta)),
            Span::raw(" for help"),
        ]),
    };
    let p = Paragraph::new(line)
        .wrap(Wrap { trim: true })
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(p, area);
}
