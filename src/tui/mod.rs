mod export;
mod help;
mod state;

use crate::cli::{self, Cli};
use crate::model::{ExportConfig, ExportEvent, ExportOutcome, ExportRequest, ExportSessionState, ExportStrategy};
use crate::orchestrator::{self, UiCommand};
use crate::session::ExportSession;
use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Gauge, Paragraph, Tabs, Wrap},
    Terminal,
};
use std::{io, time::Duration, time::Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::watch;

use export::{copy_saved_path, delete_selected, handle_finished, refresh_history};
use help::draw_help;
use state::{notice_style, UiState};

pub async fn run(args: Cli, cfg: ExportConfig) -> Result<()> {
    let (event_tx, event_rx) = mpsc::unbounded_channel::<ExportEvent>();
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<UiCommand>();

    let session = ExportSession::new(cli::build_service(&cfg)?, cfg.clone(), event_tx);
    let state_rx = session.subscribe();
    let request = cli::build_request(&args);
    let initial = args.export_on_launch.then(|| request.clone());

    // TUI runs in a dedicated thread to keep all blocking I/O out of the Tokio runtime.
    let ui_handle =
        std::thread::spawn(move || run_threaded(cfg, request, state_rx, event_rx, cmd_tx));

    let res = orchestrator::run_controller(session, initial, cmd_rx).await;

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
pub fn run_threaded(
    cfg: ExportConfig,
    request: ExportRequest,
    state_rx: watch::Receiver<ExportSessionState>,
    mut event_rx: UnboundedReceiver<ExportEvent>,
    cmd_tx: UnboundedSender<UiCommand>,
) -> Result<()> {
    enable_raw_mode().context("enable raw mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).ok();

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("create terminal")?;
    terminal.clear().ok();

    let initial_load = terminal
        .size()
        .map(|size| ((size.height as usize).saturating_sub(2) * 3).max(20))
        .unwrap_or(66);

    // UiState is owned by the UI thread only; no cross-thread mutation.
    let mut state = UiState {
        filters: request.filters,
        total_records: request.total_records,
        sync_threshold: cfg.sync_threshold,
        auto_save: cfg.auto_save,
        initial_history_load_size: initial_load,
        ..Default::default()
    };
    state.history = crate::storage::load_recent(initial_load).unwrap_or_default();

    let tick_rate = Duration::from_millis(100);
    let mut last_tick = Instant::now();

    let res = loop {
        // Drain events without blocking to keep UI responsive.
        while let Ok(ev) = event_rx.try_recv() {
            state.apply_event(&ev);
            if let ExportEvent::Finished { record } = &ev {
                handle_finished(&mut state, record);
            }
        }
        // The watch channel is the source of truth for exporting/progress.
        state.session = state_rx.borrow().clone();

        if last_tick.elapsed() >= tick_rate {
            terminal.draw(|f| draw(f.area(), f, &state)).ok();
            last_tick = Instant::now();
        }

        // Poll input with a short timeout to avoid blocking the render loop.
        if event::poll(Duration::from_millis(10)).unwrap_or(false) {
            if let Ok(Event::Key(k)) = event::read() {
                if k.kind != KeyEventKind::Press {
                    continue;
                }
                let history_rows = terminal
                    .size()
                    .map(|s| (s.height as usize).saturating_sub(6))
                    .unwrap_or(20);
                if !handle_key(&mut state, &cmd_tx, k.modifiers, k.code, history_rows) {
                    let _ = cmd_tx.send(UiCommand::Quit);
                    break Ok(());
                }
            }
        }
    };

    disable_raw_mode().ok();
    let mut stdout = io::stdout();
    execute!(stdout, LeaveAlternateScreen).ok();
    res
}

/// Returns `false` when the user asked to quit.
fn handle_key(
    state: &mut UiState,
    cmd_tx: &UnboundedSender<UiCommand>,
    modifiers: KeyModifiers,
    code: KeyCode,
    history_rows: usize,
) -> bool {
    match (modifiers, code) {
        (_, KeyCode::Char('q')) | (KeyModifiers::CONTROL, KeyCode::Char('c')) => return false,
        (_, KeyCode::Char('e')) => {
            // Overlap is rejected by the session, which posts a notice.
            let _ = cmd_tx.send(UiCommand::Start(state.request()));
            if !state.session.exporting {
                state.info = "Export requested…".into();
            }
        }
        (_, KeyCode::Char('x')) => {
            if state.session.exporting {
                let _ = cmd_tx.send(UiCommand::Cancel);
                state.info = "Cancelling…".into();
            } else {
                state.info = "No export is running".into();
            }
        }
        (_, KeyCode::Char('y')) => copy_saved_path(state),
        (_, KeyCode::Char('a')) => {
            state.auto_save = !state.auto_save;
            state.info = if state.auto_save {
                "Auto-save enabled".into()
            } else {
                "Auto-save disabled".into()
            };
        }
        (_, KeyCode::Tab) => {
            state.tab = (state.tab + 1) % 3;
            if state.tab == 1 {
                state.history_selected = 0;
                state.history_scroll_offset = 0;
            }
        }
        (_, KeyCode::Char('?')) => state.tab = 2,
        (_, KeyCode::Up) | (_, KeyCode::Char('k')) if state.tab == 1 => state.select_prev(),
        (_, KeyCode::Down) | (_, KeyCode::Char('j')) if state.tab == 1 => {
            state.select_next(history_rows)
        }
        (_, KeyCode::Char('r')) if state.tab == 1 => refresh_history(state),
        (_, KeyCode::Char('d')) if state.tab == 1 => delete_selected(state),
        _ => {}
    }
    true
}

fn draw(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(3), Constraint::Min(0)].as_ref())
        .split(area);

    let tabs = Tabs::new(vec![
        Line::from("Export"),
        Line::from("History"),
        Line::from("Help"),
    ])
    .select(state.tab)
    .block(Block::default().borders(Borders::ALL).title("bulk-export"))
    .highlight_style(Style::default().fg(Color::Yellow));
    f.render_widget(tabs, chunks[0]);

    match state.tab {
        0 => draw_export(chunks[1], f, state),
        1 => draw_history(chunks[1], f, state),
        _ => draw_help(chunks[1], f),
    }
}

fn strategy_name(strategy: ExportStrategy) -> &'static str {
    match strategy {
        ExportStrategy::Direct => "direct",
        ExportStrategy::Job => "background job",
    }
}

fn kv(key: &'static str, value: String) -> Line<'static> {
    Line::from(vec![
        Span::styled(format!("{key:<10}"), Style::default().fg(Color::Gray)),
        Span::raw(value),
    ])
}

fn draw_export(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(8),
            Constraint::Length(3),
            Constraint::Min(3),
        ])
        .split(area);

    let status = if state.session.exporting {
        Span::styled("Exporting", Style::default().fg(Color::Yellow))
    } else {
        Span::styled("Idle", Style::default().fg(Color::Green))
    };
    let strategy = state.strategy.unwrap_or_else(|| state.planned_strategy());
    let lines = vec![
        Line::from(vec![
            Span::styled(format!("{:<10}", "State"), Style::default().fg(Color::Gray)),
            status,
        ]),
        kv(
            "Owner",
            state.filters.owner_id.clone().unwrap_or_else(|| "-".into()),
        ),
        kv(
            "Search",
            state.filters.search.clone().unwrap_or_else(|| "-".into()),
        ),
        kv(
            "Records",
            format!("{} ({})", state.total_records, strategy_name(strategy)),
        ),
        kv(
            "Job",
            state
                .job_id
                .as_ref()
                .map(|j| j.to_string())
                .unwrap_or_else(|| "-".into()),
        ),
        kv(
            "Auto-save",
            if state.auto_save { "on" } else { "off" }.to_string(),
        ),
    ];
    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Export"))
        .wrap(Wrap { trim: true });
    f.render_widget(p, chunks[0]);

    let (ratio, label) = match state.progress() {
        Some(p) => (
            f64::from(p.progress) / 100.0,
            format!("{}% {}", p.progress, p.message),
        ),
        None if state.session.exporting => (0.0, "Working…".to_string()),
        None => (0.0, String::new()),
    };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Progress"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(label);
    f.render_widget(gauge, chunks[1]);

    let visible = (chunks[2].height as usize).saturating_sub(3);
    let mut lines: Vec<Line> = Vec::new();
    if !state.info.is_empty() {
        lines.push(Line::from(vec![
            Span::styled("Info: ", Style::default().fg(Color::Gray)),
            Span::raw(state.info.clone()),
        ]));
    }
    let skip = state.notices.len().saturating_sub(visible);
    lines.extend(
        state
            .notices
            .iter()
            .skip(skip)
            .map(|(level, msg)| Line::styled(msg.clone(), notice_style(*level))),
    );
    let p = Paragraph::new(lines)
        .block(Block::default().borders(Borders::ALL).title("Notices"))
        .wrap(Wrap { trim: true });
    f.render_widget(p, chunks[2]);
}

fn outcome_style(outcome: &ExportOutcome) -> Style {
    match outcome {
        ExportOutcome::Completed { .. } => Style::default().fg(Color::Green),
        ExportOutcome::Cancelled | ExportOutcome::Rejected => Style::default().fg(Color::Gray),
        _ => Style::default().fg(Color::Red),
    }
}

fn draw_history(area: Rect, f: &mut ratatui::Frame, state: &UiState) {
    let max_items = (area.height as usize).saturating_sub(4);
    let total_count = state.history.len();
    let current_pos = if total_count > 0 {
        state.history_selected + 1
    } else {
        0
    };

    let mut lines: Vec<Line> = vec![Line::from(vec![
        Span::raw(format!("History ({current_pos}/{total_count}) - ")),
        Span::styled("↑/↓/j/k", Style::default().fg(Color::Magenta)),
        Span::raw(": navigate, "),
        Span::styled("r", Style::default().fg(Color::Magenta)),
        Span::raw(": refresh, "),
        Span::styled("d", Style::default().fg(Color::Magenta)),
        Span::raw(": delete"),
    ])];
    if !state.info.is_empty() {
        lines.push(Line::from(format!("Info: {}", state.info)));
    } else {
        lines.push(Line::from(""));
    }

    if state.history.is_empty() {
        lines.push(Line::from("No exports recorded yet."));
    }
    for (idx, r) in state
        .history
        .iter()
        .enumerate()
        .skip(state.history_scroll_offset)
        .take(max_items)
    {
        let detail = match &r.outcome {
            ExportOutcome::Completed { path } => path.display().to_string(),
            ExportOutcome::SyncFailed { message }
            | ExportOutcome::SubmissionFailed { message }
            | ExportOutcome::JobFailed { message }
            | ExportOutcome::DownloadFailed { message } => message.clone(),
            ExportOutcome::PollExhausted { failures } => format!("{failures} failed queries"),
            ExportOutcome::Cancelled | ExportOutcome::Rejected => String::new(),
        };
        let row = Line::from(vec![
            Span::raw(format!(
                "{:<22} {:>8}  {:<14} ",
                r.timestamp_utc,
                r.total_records,
                strategy_name(r.strategy)
            )),
            Span::styled(format!("{:<20} ", r.outcome.label()), outcome_style(&r.outcome)),
            Span::raw(detail),
        ]);
        if idx == state.history_selected {
            lines.push(row.style(Style::default().add_modifier(Modifier::REVERSED)));
        } else {
            lines.push(row);
        }
    }

    let p = Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("History"));
    f.render_widget(p, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_send_commands() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut state = UiState {
            total_records: 300,
            ..Default::default()
        };

        assert!(handle_key(&mut state, &tx, KeyModifiers::NONE, KeyCode::Char('e'), 10));
        match rx.try_recv() {
            Ok(UiCommand::Start(req)) => assert_eq!(req.total_records, 300),
            other => panic!("expected start, got {other:?}"),
        }

        // Nothing running: cancel is not forwarded.
        assert!(handle_key(&mut state, &tx, KeyModifiers::NONE, KeyCode::Char('x'), 10));
        assert!(rx.try_recv().is_err());

        state.session.exporting = true;
        assert!(handle_key(&mut state, &tx, KeyModifiers::NONE, KeyCode::Char('x'), 10));
        assert!(matches!(rx.try_recv(), Ok(UiCommand::Cancel)));

        assert!(!handle_key(&mut state, &tx, KeyModifiers::CONTROL, KeyCode::Char('c'), 10));
        assert!(!handle_key(&mut state, &tx, KeyModifiers::NONE, KeyCode::Char('q'), 10));
    }

    #[test]
    fn test_tab_and_toggle_keys() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut state = UiState::default();
        handle_key(&mut state, &tx, KeyModifiers::NONE, KeyCode::Tab, 10);
        assert_eq!(state.tab, 1);
        handle_key(&mut state, &tx, KeyModifiers::NONE, KeyCode::Char('?'), 10);
        assert_eq!(state.tab, 2);
        handle_key(&mut state, &tx, KeyModifiers::NONE, KeyCode::Char('a'), 10);
        assert!(!state.auto_save);
        assert_eq!(state.info, "Auto-save disabled");
    }
}
