//! wedash: a terminal dashboard over the service directories under a root.
//!
//! Discovers unit directories, probes their processes on a cadence, tails
//! the focused unit's logs, and dispatches restarts, all over one event bus
//! folded into shared state by a single reducer task.

mod adapters;
mod dispatcher;
mod prober;
mod scanner;
mod tailer;
mod ui;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::{Duration, SystemTime};

use clap::{Parser, Subcommand, ValueEnum};
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal,
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Row, Table, TableState},
};
use tokio::sync::{RwLock, broadcast, mpsc};

use wedash_core::backend::{LogBackend, ProcessManager};
use wedash_core::command::{Command, CommandKind, RejectReason, SubmitOutcome};
use wedash_core::reducer::{EventEnvelope, reduce};
use wedash_core::settings::Settings;
use wedash_core::state::DashState;
use wedash_core::unit::Unit;
use wedash_core::view::{FilterTab, ViewState};

use adapters::filelog::FileLogBackend;
use adapters::journal::JournalBackend;
use adapters::proc::LocalProcessManager;
use dispatcher::CommandDispatcher;
use prober::{ProbeRequest, StatusProber};
use scanner::{DiscoveryScanner, ScanRequest};
use tailer::LogTailer;
use ui::theme::Theme;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Columns {
    Minimal,
    Full,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogSource {
    /// Read logs from the user journal via journalctl.
    Journal,
    /// Read logs from run.log inside each unit directory.
    File,
}

#[derive(Parser, Debug)]
#[command(name = "wedash", version, about = "Terminal dashboard for local service directories")]
struct Cli {
    /// Root directory to scan for service directories.
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Column set for the unit table.
    #[arg(long, value_enum, default_value_t = Columns::Minimal)]
    columns: Columns,

    /// Number of lines for show-last (overrides the settings file).
    #[arg(long)]
    last: Option<usize>,

    /// Maximum scan depth (overrides the settings file).
    #[arg(long)]
    max_depth: Option<usize>,

    /// Where to read logs from.
    #[arg(long, value_enum, default_value_t = LogSource::Journal)]
    logs: LogSource,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Scan once, print the discovered units, and exit.
    Scan {
        /// Emit JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

fn format_timestamp(time: SystemTime) -> String {
    match time.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(duration) => {
            let secs = duration.as_secs();
            let hours = (secs / 3600) % 24;
            let minutes = (secs / 60) % 60;
            let seconds = secs % 60;
            format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
        }
        Err(_) => "??:??:??".to_string(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let (settings_path, mut settings) = match Settings::discover(&cli.root) {
        Ok(found) => found,
        Err(e) => {
            eprintln!("wedash: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(last) = cli.last {
        settings.last_n = last;
    }
    if let Some(depth) = cli.max_depth {
        settings.max_depth = depth;
    }

    if let Some(CliCommand::Scan { json }) = &cli.command {
        run_scan(&cli.root, settings.max_depth, *json);
        return;
    }

    if let Some(path) = &settings_path {
        eprintln!("wedash: using settings from {}", path.display());
    }

    if let Err(e) = run_dashboard(cli, settings).await {
        eprintln!("wedash: {}", e);
        std::process::exit(1);
    }
}

fn run_scan(root: &std::path::Path, max_depth: usize, json: bool) {
    let found = match scanner::scan(root, max_depth) {
        Ok(found) => found,
        Err(e) => {
            eprintln!("wedash: {}", e);
            std::process::exit(1);
        }
    };

    if json {
        let items: Vec<serde_json::Value> = found
            .iter()
            .map(|m| {
                serde_json::json!({
                    "identity": m.identity,
                    "project": m.project,
                    "name": m.name,
                    "path": m.root_path.display().to_string(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::Value::Array(items))
                .unwrap_or_else(|_| "[]".to_string())
        );
    } else {
        for m in &found {
            println!("{}\t{}\t{}", m.identity, m.name, m.root_path.display());
        }
        eprintln!("{} unit(s) found", found.len());
    }
}

async fn run_dashboard(cli: Cli, settings: Settings) -> io::Result<()> {
    let root = cli.root.canonicalize().map_err(|e| {
        io::Error::new(
            e.kind(),
            format!("discovery root {}: {}", cli.root.display(), e),
        )
    })?;

    let (event_tx, _) = broadcast::channel::<EventEnvelope>(1024);
    let (scan_tx, scan_rx) = mpsc::channel::<ScanRequest>(8);
    let (probe_tx, probe_rx) = mpsc::channel::<ProbeRequest>(64);
    let next_id = Arc::new(AtomicU64::new(1));
    let state = Arc::new(RwLock::new(DashState::new(
        settings.evict_after_misses,
        settings.log_buffer_cap,
    )));

    // Reducer: the only writer of shared state.
    let reducer_state = state.clone();
    let mut reducer_rx = event_tx.subscribe();
    let reducer = tokio::spawn(async move {
        loop {
            match reducer_rx.recv().await {
                Ok(envelope) => {
                    let mut guard = reducer_state.write().await;
                    reduce(&mut guard, &envelope);
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let scanner_task = tokio::spawn(
        DiscoveryScanner::new(root.clone(), settings.max_depth, settings.scan_interval()).run(
            scan_rx,
            event_tx.clone(),
            probe_tx.clone(),
            next_id.clone(),
        ),
    );

    let pm: Arc<dyn ProcessManager> = Arc::new(LocalProcessManager::new());
    let prober_task = tokio::spawn(
        StatusProber::new(pm.clone(), settings.probe_concurrency).run(
            probe_rx,
            event_tx.clone(),
            next_id.clone(),
        ),
    );

    let backend: Arc<dyn LogBackend> = match cli.logs {
        LogSource::Journal => Arc::new(JournalBackend::new(
            settings.last_n,
            settings.journal_window(),
            settings.log_buffer_cap,
        )),
        LogSource::File => Arc::new(FileLogBackend::new(settings.last_n, settings.log_buffer_cap)),
    };
    let dispatcher = CommandDispatcher::new(
        pm,
        LogTailer::new(backend),
        scan_tx,
        probe_tx,
        event_tx.clone(),
        next_id,
        settings.restart_settle(),
        settings.restart_timeout(),
    );

    let mut terminal = setup_terminal()?;
    let result = tui_loop(&mut terminal, state, dispatcher, cli.columns).await;
    restore_terminal(terminal)?;

    reducer.abort();
    scanner_task.abort();
    prober_task.abort();
    result
}

fn setup_terminal() -> io::Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    Terminal::new(backend)
}

fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> io::Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

struct App {
    tab: FilterTab,
    search: String,
    search_mode: bool,
    /// Selection survives list reordering because it is tracked by identity.
    selected: Option<String>,
    columns: Columns,
    theme: Theme,
    status_line: Option<String>,
    quit: bool,
}

impl App {
    fn new(columns: Columns) -> Self {
        Self {
            tab: FilterTab::All,
            search: String::new(),
            search_mode: false,
            selected: None,
            columns,
            theme: Theme::default(),
            status_line: None,
            quit: false,
        }
    }
}

async fn tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    state: Arc<RwLock<DashState>>,
    mut dispatcher: CommandDispatcher,
    columns: Columns,
) -> io::Result<()> {
    let mut app = App::new(columns);

    loop {
        {
            let guard = state.read().await;
            let view = ViewState::project(&guard.store, guard.session.as_ref(), app.tab, &app.search);

            // Clamp selection to the visible set.
            match &app.selected {
                Some(id) if view.position_of(id).is_some() => {}
                _ => {
                    app.selected = view.units.first().map(|u| u.identity().to_string());
                }
            }

            terminal.draw(|frame| draw(frame, &app, &view, guard.notice.as_deref()))?;
        }

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                handle_key(key, &mut app, &state, &mut dispatcher).await;
            }
        }

        if app.quit {
            dispatcher.shutdown();
            return Ok(());
        }
    }
}

async fn handle_key(
    key: KeyEvent,
    app: &mut App,
    state: &Arc<RwLock<DashState>>,
    dispatcher: &mut CommandDispatcher,
) {
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        match key.code {
            KeyCode::Char('c') => {
                app.quit = true;
            }
            KeyCode::Char('r') => {
                submit(app, state, dispatcher, Command::refresh()).await;
            }
            _ => {}
        }
        return;
    }

    if app.search_mode {
        match key.code {
            KeyCode::Esc => {
                app.search.clear();
                app.search_mode = false;
            }
            KeyCode::Enter => app.search_mode = false,
            KeyCode::Backspace => {
                app.search.pop();
            }
            KeyCode::Char(c) => app.search.push(c),
            _ => {}
        }
        return;
    }

    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => app.quit = true,
        KeyCode::Char('/') => app.search_mode = true,
        KeyCode::Tab => {
            app.tab = app.tab.cycle();
        }
        KeyCode::Up | KeyCode::Char('k') => move_selection(app, state, dispatcher, -1).await,
        KeyCode::Down | KeyCode::Char('j') => move_selection(app, state, dispatcher, 1).await,
        KeyCode::Enter | KeyCode::Char('f') => {
            submit_targeted(app, state, dispatcher, CommandKind::Follow).await;
        }
        KeyCode::Char('r') => {
            submit_targeted(app, state, dispatcher, CommandKind::Restart).await;
        }
        KeyCode::Char('u') => {
            submit_targeted(app, state, dispatcher, CommandKind::ShowJournal).await;
        }
        KeyCode::Char('l') => {
            submit_targeted(app, state, dispatcher, CommandKind::ShowLast).await;
        }
        KeyCode::Char('x') => {
            dispatcher.close_session();
            app.status_line = None;
        }
        _ => {}
    }
}

/// Move the highlight and auto-follow the newly focused unit.
async fn move_selection(
    app: &mut App,
    state: &Arc<RwLock<DashState>>,
    dispatcher: &mut CommandDispatcher,
    delta: isize,
) {
    let next = {
        let guard = state.read().await;
        let view = ViewState::project(&guard.store, None, app.tab, &app.search);
        if view.units.is_empty() {
            return;
        }
        let len = view.units.len() as isize;
        let current = app
            .selected
            .as_deref()
            .and_then(|id| view.position_of(id))
            .unwrap_or(0) as isize;
        let next = (current + delta).rem_euclid(len) as usize;
        view.units[next].identity().to_string()
    };

    let changed = app.selected.as_deref() != Some(next.as_str());
    app.selected = Some(next);
    if changed {
        submit_targeted(app, state, dispatcher, CommandKind::Follow).await;
    }
}

async fn submit_targeted(
    app: &mut App,
    state: &Arc<RwLock<DashState>>,
    dispatcher: &mut CommandDispatcher,
    kind: CommandKind,
) {
    let Some(id) = app.selected.clone() else {
        app.status_line = Some("no unit selected".to_string());
        return;
    };
    submit(app, state, dispatcher, Command::targeting(kind, id)).await;
}

async fn submit(
    app: &mut App,
    state: &Arc<RwLock<DashState>>,
    dispatcher: &mut CommandDispatcher,
    cmd: Command,
) {
    let label = cmd.kind.label();
    let target = cmd.target.clone();
    let outcome = {
        let guard = state.read().await;
        dispatcher.submit(cmd, &guard.store).await
    };
    app.status_line = match outcome {
        SubmitOutcome::Accepted => match target {
            Some(id) => Some(format!("{} {}", label, id)),
            None => Some(label.to_string()),
        },
        SubmitOutcome::Rejected(RejectReason::Busy) => {
            Some(format!("{} rejected: unit is busy", label))
        }
        SubmitOutcome::Rejected(RejectReason::InvalidTarget) => {
            Some(format!("{} rejected: unknown unit", label))
        }
    };
}

fn draw(frame: &mut ratatui::Frame, app: &App, view: &ViewState, notice: Option<&str>) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(frame.area());

    draw_header(frame, app, chunks[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(chunks[1]);

    draw_units(frame, app, view, body[0]);
    draw_logs(frame, app, view, body[1]);
    draw_footer(frame, app, notice, chunks[2]);
}

fn draw_header(frame: &mut ratatui::Frame, app: &App, area: Rect) {
    let theme = &app.theme;
    let mut spans: Vec<Span> = Vec::new();
    for tab in [FilterTab::All, FilterTab::Active, FilterTab::Failed] {
        spans.push(Span::styled(
            format!(" {} ", tab.label()),
            theme.tab(tab == app.tab),
        ));
        spans.push(Span::raw(" "));
    }
    if app.search_mode || !app.search.is_empty() {
        let cursor = if app.search_mode { "_" } else { "" };
        spans.push(Span::styled(
            format!("  /{}{}", app.search, cursor),
            theme.accent(),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

fn draw_units(frame: &mut ratatui::Frame, app: &App, view: &ViewState, area: Rect) {
    let theme = &app.theme;

    let (header, widths): (Vec<&str>, Vec<Constraint>) = match app.columns {
        Columns::Minimal => (
            vec!["", "Service", "PID"],
            vec![
                Constraint::Length(2),
                Constraint::Min(20),
                Constraint::Length(8),
            ],
        ),
        Columns::Full => (
            vec!["", "Service", "PID", "Unit", "Project", "Updated"],
            vec![
                Constraint::Length(2),
                Constraint::Min(16),
                Constraint::Length(8),
                Constraint::Min(16),
                Constraint::Length(12),
                Constraint::Length(9),
            ],
        ),
    };

    let rows: Vec<Row> = view.units.iter().map(|unit| unit_row(app, unit)).collect();

    let mut table_state = TableState::default();
    table_state.select(app.selected.as_deref().and_then(|id| view.position_of(id)));

    let title = format!(" Units ({}) ", view.units.len());
    let table = Table::new(rows, widths)
        .header(Row::new(header).style(theme.dim()))
        .row_highlight_style(theme.selected())
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(theme.border())
                .title(title),
        );

    frame.render_stateful_widget(table, area, &mut table_state);
}

fn unit_row<'a>(app: &App, unit: &'a Unit) -> Row<'a> {
    let theme = &app.theme;
    let icon = if unit.busy {
        "…"
    } else {
        theme.status_icon(unit.status)
    };
    let pid = unit.pid.map(|p| p.to_string()).unwrap_or_default();

    let mut cells = vec![
        ratatui::widgets::Cell::from(icon).style(theme.status_style(unit.status)),
        ratatui::widgets::Cell::from(unit.meta.name.clone()).style(theme.text()),
        ratatui::widgets::Cell::from(pid).style(theme.dim()),
    ];
    if app.columns == Columns::Full {
        let updated = unit
            .last_probe_time
            .map(format_timestamp)
            .unwrap_or_default();
        cells.push(ratatui::widgets::Cell::from(unit.meta.identity.clone()).style(theme.dim()));
        cells.push(ratatui::widgets::Cell::from(unit.meta.project.clone()).style(theme.dim()));
        cells.push(ratatui::widgets::Cell::from(updated).style(theme.dim()));
    }
    Row::new(cells)
}

fn draw_logs(frame: &mut ratatui::Frame, app: &App, view: &ViewState, area: Rect) {
    let theme = &app.theme;

    let (title, lines) = match view.session {
        Some(session) => {
            let dropped = session.buffer.dropped();
            let suffix = if dropped > 0 {
                format!(" (+{} dropped)", dropped)
            } else {
                String::new()
            };
            let title = format!(
                " {} [{}]{} ",
                session.unit_identity,
                session.mode.label(),
                suffix
            );
            let visible = area.height.saturating_sub(2) as usize;
            let lines: Vec<Line> = session
                .buffer
                .last_n(visible)
                .map(|l| {
                    Line::from(vec![
                        Span::styled(format!("{} ", format_timestamp(l.at)), theme.dim()),
                        Span::styled(l.text.clone(), theme.text()),
                    ])
                })
                .collect();
            (title, lines)
        }
        None => (
            " Logs ".to_string(),
            vec![Line::from(Span::styled(
                "select a unit to follow its logs",
                theme.dim(),
            ))],
        ),
    };

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(theme.border())
            .title(title),
    );
    frame.render_widget(paragraph, area);
}

fn draw_footer(frame: &mut ratatui::Frame, app: &App, notice: Option<&str>, area: Rect) {
    let theme = &app.theme;
    let mut spans = vec![Span::styled(
        " ↑/↓ select  f follow  r restart  l last  u journal  x close  / search  Tab filter  ^r rescan  q quit ",
        theme.key_hint(),
    )];
    if let Some(status) = &app.status_line {
        spans.push(Span::styled(format!(" | {}", status), theme.accent()));
    }
    if let Some(notice) = notice {
        spans.push(Span::styled(
            format!(" | {}", notice),
            theme.status_style(wedash_core::unit::UnitStatus::Failed),
        ));
    }
    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}
