mod app;

use std::io;
use std::time::Duration;

use app::{format_diff, format_stat, format_time_ms, truncate, AppState, ConnectionStatus};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> io::Result<()> {
    let base_url = std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .map_err(io::Error::other)?;

    let mut app = AppState::new(base_url);

    // Initial fetch before rendering
    app.refresh(&client).await;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut rounds_state = TableState::default();

    let result = run_loop(&mut terminal, &mut app, &client, &mut rounds_state).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    result
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    client: &reqwest::Client,
    rounds_state: &mut TableState,
) -> io::Result<()> {
    let refresh_interval = Duration::from_secs(2);
    let mut last_tick = std::time::Instant::now();

    loop {
        terminal.draw(|f| render(f, app, rounds_state))?;

        let timeout = refresh_interval
            .checked_sub(last_tick.elapsed())
            .unwrap_or(Duration::ZERO);

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            app.refresh(client).await;
                            last_tick = std::time::Instant::now();
                        }
                        KeyCode::Down | KeyCode::Char('j') => {
                            let max = app.rounds.len().saturating_sub(1);
                            let next = rounds_state.selected().map_or(0, |i| (i + 1).min(max));
                            rounds_state.select(Some(next));
                        }
                        KeyCode::Up | KeyCode::Char('k') => {
                            let prev = rounds_state
                                .selected()
                                .map_or(0, |i| i.saturating_sub(1));
                            rounds_state.select(Some(prev));
                        }
                        _ => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= refresh_interval {
            app.refresh(client).await;
            last_tick = std::time::Instant::now();
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &AppState, rounds_state: &mut TableState) {
    let area = f.area();

    // Outer vertical split: header | body | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(1), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_body(f, app, rounds_state, chunks[1]);
    render_footer(f, chunks[2]);
}

fn title(text: &str) -> Span<'_> {
    Span::styled(
        text,
        Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
    )
}

fn panel(text: &str) -> Block<'_> {
    Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(title(text))
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (conn_text, conn_color) = match &app.status {
        ConnectionStatus::Connected => ("● connected".to_string(), Color::Green),
        ConnectionStatus::Connecting => ("◌ connecting".to_string(), Color::Yellow),
        ConnectionStatus::Error(e) => (format!("✗ {}", truncate(e, 40)), Color::Red),
    };

    let source_color = if app.health.status == "UP" {
        Color::Green
    } else {
        Color::Red
    };
    let last_round = app
        .health
        .last_round_id
        .map_or("—".to_string(), |id| format!("#{id}"));
    let p99 = app
        .latency
        .p99_ms
        .map_or("—".to_string(), |v| format!("{v:.0}ms p99"));

    let spans = vec![
        title(" Round Tracker  "),
        Span::styled(conn_text, Style::default().fg(conn_color)),
        Span::raw("  │  source "),
        Span::styled(
            app.health.status.clone(),
            Style::default().fg(source_color).add_modifier(Modifier::BOLD),
        ),
        Span::raw("  │  last "),
        Span::styled(last_round, Style::default().fg(Color::White)),
        Span::raw("  │  "),
        Span::styled(
            format!(
                "{} cycles ({} paused)",
                app.health.cycles_run, app.health.cycles_paused
            ),
            Style::default().fg(Color::White),
        ),
        Span::raw("  │  "),
        Span::styled(p99, Style::default().fg(Color::White)),
    ];

    let paragraph = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    f.render_widget(paragraph, area);
}

fn render_body(f: &mut Frame, app: &AppState, rounds_state: &mut TableState, area: Rect) {
    // Horizontal split: stats (40%) | rounds (60%)
    let halves = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(area);

    let left = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(12), // averages
            Constraint::Length(4),  // medians
            Constraint::Min(0),     // oracle odds
        ])
        .split(halves[0]);

    render_averages(f, app, left[0]);
    render_medians(f, app, left[1]);
    render_oracle_odds(f, app, left[2]);
    render_rounds_table(f, app, rounds_state, halves[1]);
}

fn stat_line(label: &str, value: String) -> Line<'_> {
    Line::from(vec![
        Span::styled(format!("{label:<14}"), Style::default().fg(Color::Yellow)),
        Span::raw(value),
    ])
}

fn render_averages(f: &mut Frame, app: &AppState, area: Rect) {
    let a = &app.averages;
    let count = |v: Option<u64>| v.map_or("—".to_string(), |n| n.to_string());
    let lines = vec![
        stat_line("rounds", count(a.nb_entries)),
        stat_line(
            "up / down",
            format!("{} / {}", count(a.nb_round_up), count(a.nb_round_down)),
        ),
        stat_line("avg payout", format_stat(a.avg_payout, "x")),
        stat_line("avg pool", format_stat(a.avg_pool, "")),
        stat_line(
            "safe",
            format!(
                "{}  wr {}  ev {}",
                format_stat(a.avg_safe, "x"),
                format_stat(a.safe_percent_wr, "%"),
                format_stat(a.expected_safe, ""),
            ),
        ),
        stat_line(
            "risky",
            format!(
                "{}  wr {}  ev {}",
                format_stat(a.avg_risky, "x"),
                format_stat(a.risky_percent_wr, "%"),
                format_stat(a.expected_risky, ""),
            ),
        ),
        stat_line(
            "avg diff",
            format!(
                "up {}  down {}",
                format_stat(a.avg_diff_up, ""),
                format_stat(a.avg_diff_down, "")
            ),
        ),
        stat_line("bet", format!("{:.2}", a.bet_amount)),
        stat_line(
            "rebuilt",
            a.computed_at.map_or("—".to_string(), format_time_ms),
        ),
    ];
    f.render_widget(Paragraph::new(lines).block(panel(" AVERAGES ")), area);
}

fn render_medians(f: &mut Frame, app: &AppState, area: Rect) {
    let line = stat_line(
        "payout / pool",
        format!(
            "{} / {}",
            format_stat(app.medians.payout, "x"),
            format_stat(app.medians.pool, "")
        ),
    );
    f.render_widget(Paragraph::new(line).block(panel(" MEDIANS ")), area);
}

fn render_oracle_odds(f: &mut Frame, app: &AppState, area: Rect) {
    let header_cells = ["Gap", "Count", "%"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .oracles
        .odds
        .iter()
        .map(|o| {
            Row::new(vec![
                Cell::from(format!("{}s", o.value)),
                Cell::from(o.count.to_string()).style(Style::default().fg(Color::Cyan)),
                Cell::from(format!("{:.3}", o.percentage)),
            ])
        })
        .collect();

    let avg = app
        .oracles
        .average
        .map_or("—".to_string(), |v| format!("{v:.2}s"));
    let median = app
        .oracles
        .median
        .map_or("—".to_string(), |v| format!("{v}s"));
    let title_text = format!(" ORACLE GAPS  avg {avg}  median {median} ");

    let table = Table::new(
        rows,
        [
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Min(7),
        ],
    )
    .header(header)
    .block(panel(&title_text));

    f.render_widget(table, area);
}

fn render_rounds_table(f: &mut Frame, app: &AppState, state: &mut TableState, area: Rect) {
    let header_cells = ["Closed", "Round", "Winner", "Diff", "Payout", "Pool", "Bucket"]
        .iter()
        .map(|h| Cell::from(*h).style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)));
    let header = Row::new(header_cells).height(1);

    let rows: Vec<Row> = app
        .rounds
        .iter()
        .map(|r| {
            let winner_color = if r.winner == "UP" {
                Color::Green
            } else {
                Color::Red
            };
            let (bucket, bucket_color) = if r.is_risky() {
                ("risky", Color::Magenta)
            } else {
                ("safe", Color::Cyan)
            };

            Row::new(vec![
                Cell::from(format_time_ms(r.closed_at)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(format!("#{}", r.round_id)),
                Cell::from(r.winner.clone()).style(Style::default().fg(winner_color)),
                Cell::from(format_diff(r.price_diff)),
                Cell::from(format!("{:.2}x", r.winning_payout())),
                Cell::from(format!("{:.3}", r.pool_value)),
                Cell::from(bucket).style(Style::default().fg(bucket_color)),
            ])
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Length(8),
            Constraint::Length(6),
            Constraint::Length(9),
            Constraint::Length(7),
            Constraint::Length(8),
            Constraint::Min(6),
        ],
    )
    .header(header)
    .block(panel(" RECENT ROUNDS "))
    .row_highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    );

    f.render_stateful_widget(table, area, state);
}

fn render_footer(f: &mut Frame, area: Rect) {
    let line = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[r] ", Style::default().fg(Color::Yellow)),
        Span::raw("refresh  "),
        Span::styled("[↑↓ / j k] ", Style::default().fg(Color::Yellow)),
        Span::raw("scroll rounds  "),
        Span::styled("auto-refresh: 2s", Style::default().fg(Color::DarkGray)),
    ]);
    let paragraph = Paragraph::new(line).style(Style::default().fg(Color::White));
    f.render_widget(paragraph, area);
}
