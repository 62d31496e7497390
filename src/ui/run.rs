use crate::config::{AppConfig, MIN_RELOAD_SECONDS};
use crate::error::AppError;
use crate::ingest::{CsvFileSource, RecordSource};
use crate::models::{Granularity, TimeRange, UsageRecord, Zone};
use crate::stats::{
    bucket_detail, filter_in_window, process_stats, resolve_window, unique_categories,
    window_total,
};
use crate::ui::app::{AppState, ConfirmAction, DashboardView, Screen};
use crate::ui::chart::{category_color, long_label, StackedBarChart};
use chrono::Local;
use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table};
use ratatui::Terminal;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

const COLOR_ACCENT: Color = Color::Cyan;
const COLOR_INFO: Color = Color::Green;
const COLOR_MUTED: Color = Color::DarkGray;
const COLOR_HEADER: Color = Color::White;

struct LoadJob {
    started_at: Instant,
    handle: JoinHandle<Result<Vec<UsageRecord>, AppError>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    None,
    Reload,
}

pub async fn run_tui(cfg: AppConfig, file: PathBuf) -> Result<(), AppError> {
    let source: Arc<dyn RecordSource> = Arc::new(CsvFileSource::new(file, cfg.timezone));
    info!(
        source = %source.describe(),
        zone = cfg.timezone.as_label(),
        "starting dashboard"
    );

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let loop_result = run_loop(&mut terminal, &cfg, source).await;

    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    loop_result
}

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    cfg: &AppConfig,
    source: Arc<dyn RecordSource>,
) -> Result<(), AppError> {
    let zone = cfg.timezone;
    let source_label = source.describe();
    let mut state = AppState {
        range: cfg.default_window,
        ..AppState::default()
    };
    let mut records: Vec<UsageRecord> = Vec::new();
    let mut load_job: Option<LoadJob> = None;
    let mut last_tick = Instant::now();
    let tick_rate = StdDuration::from_secs(cfg.reload_seconds.max(MIN_RELOAD_SECONDS));

    start_load(&mut state, &mut load_job, &source);

    while state.running {
        if load_job
            .as_ref()
            .is_some_and(|job| job.handle.is_finished())
        {
            if let Some(job) = load_job.take() {
                process_load_job(&mut state, &mut records, job, zone).await;
            }
        }

        terminal.draw(|f| render(f, &source_label, &state))?;

        let timeout = tick_rate
            .checked_sub(last_tick.elapsed())
            .unwrap_or_else(|| StdDuration::from_millis(0))
            .min(StdDuration::from_millis(250));

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if handle_key(key.code, key.modifiers, &mut state, &records, zone)
                    == KeyAction::Reload
                {
                    start_load(&mut state, &mut load_job, &source);
                    last_tick = Instant::now();
                }
            }
        }

        if state.screen == Screen::Dashboard && last_tick.elapsed() >= tick_rate {
            start_load(&mut state, &mut load_job, &source);
            last_tick = Instant::now();
        }
    }

    if let Some(job) = load_job.take() {
        job.handle.abort();
    }

    Ok(())
}

/// Spawns a fresh load; an in-flight one is aborted so its result is never
/// applied.
fn start_load(state: &mut AppState, job: &mut Option<LoadJob>, source: &Arc<dyn RecordSource>) {
    if let Some(stale) = job.take() {
        debug!("superseding in-flight load");
        stale.handle.abort();
    }
    let source = Arc::clone(source);
    *job = Some(LoadJob {
        started_at: Instant::now(),
        handle: tokio::spawn(async move { source.load().await }),
    });
    state.status = "loading...".into();
}

async fn process_load_job(
    state: &mut AppState,
    records: &mut Vec<UsageRecord>,
    job: LoadJob,
    zone: Zone,
) {
    let elapsed = job.started_at.elapsed();
    match job.handle.await {
        Ok(Ok(rows)) => {
            *records = rows;
            refresh_view(state, records, zone);
            state.view.last_load = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
            state.status = format!("ok ({} ms)", elapsed.as_millis());
        }
        Ok(Err(err)) => {
            error!(error = %err, "load failed");
            state.status = "load failed".into();
            show_error(state, format!("Load failed: {err}"));
        }
        Err(join_err) if join_err.is_cancelled() => {}
        Err(join_err) => {
            error!(error = %join_err, "load task panicked");
            state.status = "load failed".into();
            show_error(state, format!("Load task failed: {join_err}"));
        }
    }
}

fn build_view(records: &[UsageRecord], range: TimeRange, zone: Zone) -> DashboardView {
    let now = zone.now();
    let summaries = process_stats(records, range, now, zone);
    let categories = unique_categories(&summaries);
    let category_totals = categories
        .iter()
        .map(|c| {
            let total: f64 = summaries
                .iter()
                .map(|s| s.cost_by_category.get(c).copied().unwrap_or(0.0))
                .sum();
            (c.clone(), total)
        })
        .collect();
    let window = resolve_window(range, now);

    DashboardView {
        window_cost: window_total(&summaries),
        records_in_window: filter_in_window(records, &window, now, zone).len(),
        total_records: records.len(),
        summaries,
        categories,
        category_totals,
        last_load: String::new(),
    }
}

fn refresh_view(state: &mut AppState, records: &[UsageRecord], zone: Zone) {
    let mut view = build_view(records, state.range, zone);
    view.last_load = std::mem::take(&mut state.view.last_load);
    state.apply_view(view);
    if state.screen == Screen::Detail {
        open_detail(state, records, zone);
    }
}

fn open_detail(state: &mut AppState, records: &[UsageRecord], zone: Zone) {
    let Some(bucket) = state.selected_bucket().map(|s| s.bucket.clone()) else {
        return;
    };
    match bucket_detail(records, &bucket, state.range.granularity(), zone.now(), zone) {
        Ok(detail) => {
            state.detail = Some(detail);
            state.screen = Screen::Detail;
        }
        Err(err) => show_error(state, err.to_string()),
    }
}

fn set_range(state: &mut AppState, range: TimeRange, records: &[UsageRecord], zone: Zone) {
    if state.range == range {
        return;
    }
    state.range = range;
    state.status = format!("window {}", range.as_label());
    refresh_view(state, records, zone);
}

fn handle_key(
    code: KeyCode,
    modifiers: KeyModifiers,
    state: &mut AppState,
    records: &[UsageRecord],
    zone: Zone,
) -> KeyAction {
    if modifiers.contains(KeyModifiers::CONTROL) && code == KeyCode::Char('c') {
        confirm_quit(state);
        return KeyAction::None;
    }

    if code == KeyCode::Char('z') {
        state.compact_mode = !state.compact_mode;
        state.status = if state.compact_mode {
            "compact mode enabled".into()
        } else {
            "compact mode disabled".into()
        };
        return KeyAction::None;
    }

    match state.screen.clone() {
        Screen::Dashboard => match code {
            KeyCode::Char('q') => confirm_quit(state),
            KeyCode::Char('r') => return KeyAction::Reload,
            KeyCode::Char('1') => set_range(state, TimeRange::OneDay, records, zone),
            KeyCode::Char('7') => set_range(state, TimeRange::SevenDays, records, zone),
            KeyCode::Char('3') => set_range(state, TimeRange::ThirtyDays, records, zone),
            KeyCode::Left | KeyCode::Char('h') => state.select_prev(),
            KeyCode::Right | KeyCode::Char('l') => state.select_next(),
            KeyCode::Home => state.select_first(),
            KeyCode::End => state.select_last(),
            KeyCode::Enter => open_detail(state, records, zone),
            _ => {}
        },
        Screen::Detail => match code {
            KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q') => {
                state.screen = Screen::Dashboard;
                state.detail = None;
            }
            KeyCode::Left | KeyCode::Char('h') => {
                state.select_prev();
                open_detail(state, records, zone);
            }
            KeyCode::Right | KeyCode::Char('l') => {
                state.select_next();
                open_detail(state, records, zone);
            }
            _ => {}
        },
        Screen::Confirm(ConfirmAction::Quit) => match code {
            KeyCode::Left | KeyCode::Right | KeyCode::Tab => {
                state.confirm_selected = 1 - state.confirm_selected.min(1);
            }
            KeyCode::Enter => {
                if state.confirm_selected == 1 {
                    state.running = false;
                } else {
                    state.screen = state.previous_screen.clone();
                }
            }
            KeyCode::Esc => state.screen = state.previous_screen.clone(),
            _ => {}
        },
        Screen::ErrorDialog => {
            if matches!(code, KeyCode::Enter | KeyCode::Esc) {
                state.screen = Screen::Dashboard;
            }
        }
    }

    KeyAction::None
}

fn confirm_quit(state: &mut AppState) {
    if matches!(state.screen, Screen::Confirm(_)) {
        return;
    }
    state.previous_screen = state.screen.clone();
    state.screen = Screen::Confirm(ConfirmAction::Quit);
    state.confirm_selected = 0;
}

fn show_error(state: &mut AppState, message: String) {
    state.error_message = message;
    state.screen = Screen::ErrorDialog;
}

fn render(f: &mut ratatui::Frame, source_label: &str, state: &AppState) {
    let size = f.area();
    let compact = state.compact_mode || size.width < 100;

    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
        ])
        .split(size);

    let header = Paragraph::new(format!(
        " usage-chart  ·  {}  ·  {}  ·  {}  ·  loaded {} ",
        source_label,
        state.range.description(),
        state.status,
        state.view.last_load
    ))
    .block(Block::default().borders(Borders::ALL).title(" Session "))
    .style(Style::default().fg(COLOR_HEADER));
    f.render_widget(header, root[0]);

    render_kpis(f, root[1], state);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints(if compact {
            [Constraint::Percentage(100), Constraint::Percentage(0)]
        } else {
            [Constraint::Percentage(76), Constraint::Percentage(24)]
        })
        .split(root[2]);

    let granularity = state.range.granularity();
    let chart_block = Block::default().borders(Borders::ALL).title(format!(
        " Cost by {} ({}) ",
        match granularity {
            Granularity::Hour => "Hour",
            Granularity::Day => "Day",
        },
        state.range.as_label()
    ));
    let chart_area = chart_block.inner(body[0]);
    f.render_widget(chart_block, body[0]);
    if state.view.summaries.is_empty() {
        f.render_widget(
            Paragraph::new("No data for this range.")
                .alignment(Alignment::Center)
                .style(Style::default().fg(COLOR_MUTED)),
            chart_area,
        );
    } else {
        f.render_widget(
            StackedBarChart::new(&state.view.summaries, &state.view.categories, granularity)
                .selected(state.selected),
            chart_area,
        );
    }

    if !compact {
        render_legend(f, body[1], state);
    }

    let footer = Paragraph::new(footer_text(state))
        .block(Block::default().borders(Borders::ALL))
        .style(Style::default().fg(COLOR_MUTED));
    f.render_widget(footer, root[3]);

    match &state.screen {
        Screen::Dashboard => {}
        Screen::Detail => render_detail(f, state),
        Screen::Confirm(action) => render_confirm(f, state, action),
        Screen::ErrorDialog => render_error(f, state),
    }
}

fn render_kpis(f: &mut ratatui::Frame, area: Rect, state: &AppState) {
    let kpis = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(30),
            Constraint::Percentage(30),
            Constraint::Percentage(40),
        ])
        .split(area);

    let cost = Paragraph::new(format!("${:.2}", state.view.window_cost))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(format!(" Summary ({}) ", state.range.as_label())),
        )
        .style(
            Style::default()
                .fg(COLOR_ACCENT)
                .add_modifier(Modifier::BOLD),
        );
    let requests = Paragraph::new(format!(
        "{} of {}",
        state.view.records_in_window, state.view.total_records
    ))
    .block(Block::default().borders(Borders::ALL).title(" Requests "))
    .style(Style::default().fg(COLOR_INFO).add_modifier(Modifier::BOLD));
    let selected = Paragraph::new(match state.selected_bucket() {
        Some(s) => format!(
            "{}  ·  ${:.4}",
            long_label(&s.bucket, state.range.granularity()),
            s.total_cost
        ),
        None => "-".into(),
    })
    .block(Block::default().borders(Borders::ALL).title(" Selected "))
    .style(Style::default().fg(COLOR_HEADER));

    f.render_widget(cost, kpis[0]);
    f.render_widget(requests, kpis[1]);
    f.render_widget(selected, kpis[2]);
}

fn render_legend(f: &mut ratatui::Frame, area: Rect, state: &AppState) {
    let mut lines: Vec<Line> = state
        .view
        .category_totals
        .iter()
        .enumerate()
        .map(|(idx, (category, total))| {
            Line::from(vec![
                Span::styled("■ ", Style::default().fg(category_color(idx))),
                Span::raw(category.clone()),
                Span::styled(format!("  ${total:.4}"), Style::default().fg(COLOR_MUTED)),
            ])
        })
        .collect();
    if lines.is_empty() {
        lines.push(Line::from(Span::styled(
            "no models in window",
            Style::default().fg(COLOR_MUTED),
        )));
    }

    let legend =
        Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title(" Models "));
    f.render_widget(legend, area);
}

fn footer_text(state: &AppState) -> &'static str {
    match state.screen {
        Screen::Dashboard => {
            "1/7/3 window | Left/Right select | Enter details | r reload | z compact | q quit"
        }
        Screen::Detail => "Left/Right previous/next bucket | Enter/Esc close",
        Screen::Confirm(_) => "Left/Right choose | Enter confirm | Esc cancel",
        Screen::ErrorDialog => "Enter/Esc close",
    }
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn render_detail(f: &mut ratatui::Frame, state: &AppState) {
    let Some(detail) = &state.detail else {
        return;
    };
    let area = centered_rect(64, 60, f.area());
    f.render_widget(Clear, area);

    let block = Block::default().borders(Borders::ALL).title(format!(
        " {} ",
        long_label(&detail.bucket, state.range.granularity())
    ));
    let inner = block.inner(area);
    f.render_widget(block, area);

    let parts = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(4), Constraint::Min(3)])
        .split(inner);

    let summary = Paragraph::new(vec![
        Line::from(format!("Total Requests: {}", detail.total_requests)),
        Line::from(format!("Total Cost: ${:.4}", detail.total_cost)),
        Line::from(format!("Average Cost: ${:.4}", detail.average_cost)),
    ])
    .style(Style::default().fg(COLOR_ACCENT));
    f.render_widget(summary, parts[0]);

    let rows = detail
        .categories
        .iter()
        .map(|c| {
            Row::new(vec![
                Cell::from(c.category.clone()),
                Cell::from(c.count.to_string()),
                Cell::from(format!("${:.4}", c.cost)),
            ])
        })
        .collect::<Vec<_>>();
    let table = Table::new(
        rows,
        [
            Constraint::Percentage(50),
            Constraint::Percentage(20),
            Constraint::Percentage(30),
        ],
    )
    .header(
        Row::new(vec!["Model", "Requests", "Cost"]).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        ),
    );
    f.render_widget(table, parts[1]);
}

fn render_confirm(f: &mut ratatui::Frame, state: &AppState, action: &ConfirmAction) {
    let area = centered_rect(56, 34, f.area());
    f.render_widget(Clear, area);

    let (title, message) = match action {
        ConfirmAction::Quit => ("Confirm Quit", "Do you want to exit usage-chart?"),
    };

    let cancel_style = if state.confirm_selected == 0 {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };
    let confirm_style = if state.confirm_selected == 1 {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Red)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    };

    let content = Paragraph::new(vec![
        Line::from(message),
        Line::from(""),
        Line::from(vec![
            Span::styled("[Cancel (Esc)]", cancel_style),
            Span::raw("   "),
            Span::styled("[Confirm (Enter)]", confirm_style),
        ]),
        Line::from("Use Left/Right to choose"),
    ])
    .block(
        Block::default()
            .borders(Borders::ALL)
            .title(format!(" {} ", title)),
    )
    .alignment(Alignment::Center);

    f.render_widget(content, area);
}

fn render_error(f: &mut ratatui::Frame, state: &AppState) {
    let area = centered_rect(60, 30, f.area());
    f.render_widget(Clear, area);
    let content = Paragraph::new(vec![
        Line::from(state.error_message.clone()),
        Line::from(""),
        Line::from("Press Enter or Esc"),
    ])
    .block(Block::default().borders(Borders::ALL).title(" Error "))
    .style(Style::default().fg(Color::Red));
    f.render_widget(content, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn recent_records() -> Vec<UsageRecord> {
        let now = Utc::now();
        [("gpt", 1.5, 0), ("claude", 2.0, 1), ("", 0.25, 2)]
            .into_iter()
            .map(|(category, cost, hours_ago)| UsageRecord {
                timestamp: now - Duration::hours(hours_ago),
                kind: "Included".into(),
                category: category.into(),
                max_mode: "No".into(),
                input_with_cache_write: 0,
                input_without_cache_write: 0,
                cache_read: 0,
                output_tokens: 0,
                total_tokens: 0,
                cost,
            })
            .collect()
    }

    fn loaded_state(records: &[UsageRecord]) -> AppState {
        let mut state = AppState {
            range: TimeRange::OneDay,
            ..AppState::default()
        };
        refresh_view(&mut state, records, Zone::Utc);
        state
    }

    fn press(state: &mut AppState, records: &[UsageRecord], code: KeyCode) -> KeyAction {
        handle_key(code, KeyModifiers::NONE, state, records, Zone::Utc)
    }

    #[test]
    fn build_view_counts_window_and_categories() {
        let records = recent_records();
        let view = build_view(&records, TimeRange::OneDay, Zone::Utc);
        assert_eq!(view.summaries.len(), 25);
        assert_eq!(view.records_in_window, 3);
        assert_eq!(view.total_records, 3);
        assert_eq!(view.categories, vec!["Unknown", "claude", "gpt"]);
        assert!((view.window_cost - 3.75).abs() < 1e-9);
        let gpt_total = view
            .category_totals
            .iter()
            .find(|(c, _)| c == "gpt")
            .map(|(_, t)| *t);
        assert_eq!(gpt_total, Some(1.5));
    }

    #[test]
    fn window_keys_switch_granularity() {
        let records = recent_records();
        let mut state = loaded_state(&records);
        assert_eq!(state.view.summaries.len(), 25);

        press(&mut state, &records, KeyCode::Char('7'));
        assert_eq!(state.range, TimeRange::SevenDays);
        assert_eq!(state.view.summaries.len(), 7);
        assert_eq!(state.selected, Some(6));

        press(&mut state, &records, KeyCode::Char('3'));
        assert_eq!(state.view.summaries.len(), 30);
    }

    #[test]
    fn enter_opens_detail_for_selected_bucket() {
        let records = recent_records();
        let mut state = loaded_state(&records);
        press(&mut state, &records, KeyCode::Enter);
        assert_eq!(state.screen, Screen::Detail);
        let detail = state.detail.as_ref().expect("detail");
        assert_eq!(
            Some(detail.bucket.as_str()),
            state.selected_bucket().map(|s| s.bucket.as_str())
        );
        assert_eq!(detail.total_requests, 1);

        press(&mut state, &records, KeyCode::Esc);
        assert_eq!(state.screen, Screen::Dashboard);
        assert!(state.detail.is_none());
    }

    #[test]
    fn reload_key_requests_a_load() {
        let records = recent_records();
        let mut state = loaded_state(&records);
        assert_eq!(
            press(&mut state, &records, KeyCode::Char('r')),
            KeyAction::Reload
        );
        assert_eq!(
            press(&mut state, &records, KeyCode::Char('x')),
            KeyAction::None
        );
    }

    #[test]
    fn quit_requires_confirmation() {
        let records = recent_records();
        let mut state = loaded_state(&records);
        press(&mut state, &records, KeyCode::Char('q'));
        assert_eq!(state.screen, Screen::Confirm(ConfirmAction::Quit));

        press(&mut state, &records, KeyCode::Enter);
        assert!(state.running);
        assert_eq!(state.screen, Screen::Dashboard);

        handle_key(
            KeyCode::Char('c'),
            KeyModifiers::CONTROL,
            &mut state,
            &records,
            Zone::Utc,
        );
        press(&mut state, &records, KeyCode::Right);
        press(&mut state, &records, KeyCode::Enter);
        assert!(!state.running);
    }

    #[test]
    fn error_dialog_closes_on_escape() {
        let records = recent_records();
        let mut state = loaded_state(&records);
        show_error(&mut state, "boom".into());
        assert_eq!(state.screen, Screen::ErrorDialog);
        press(&mut state, &records, KeyCode::Esc);
        assert_eq!(state.screen, Screen::Dashboard);
    }
}
