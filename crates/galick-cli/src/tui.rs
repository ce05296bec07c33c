use std::io::{self, Stdout};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph},
    Frame, Terminal,
};
use tokio_util::sync::CancellationToken;

use galick_core::metrics::{Stats, StatsSnapshot};

const TICK_RATE: Duration = Duration::from_millis(100);

/// Drive the live presenter until the run duration elapses, the user quits,
/// or the run is cancelled elsewhere. Quitting cancels the run token; the
/// caller prints the final report after the engine has drained.
pub async fn run(
    stats: Arc<Stats>,
    duration: Duration,
    protocol: &'static str,
    cancel: CancellationToken,
) -> Result<()> {
    enable_raw_mode().context("failed to enable raw terminal mode")?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen).context("failed to enter alternate screen")?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend).context("failed to initialise terminal")?;

    let result = event_loop(&mut terminal, &stats, duration, protocol, &cancel);

    // Always restore the terminal, even when the loop failed.
    disable_raw_mode().ok();
    execute!(terminal.backend_mut(), LeaveAlternateScreen).ok();
    terminal.show_cursor().ok();

    result
}

fn event_loop(
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    stats: &Arc<Stats>,
    duration: Duration,
    protocol: &'static str,
    cancel: &CancellationToken,
) -> Result<()> {
    let start = Instant::now();

    loop {
        let snapshot = stats.snapshot();
        let elapsed = start.elapsed();
        let percent = (elapsed.as_secs_f64() / duration.as_secs_f64()).clamp(0.0, 1.0);

        terminal.draw(|frame| draw(frame, &snapshot, elapsed, percent, protocol))?;

        // Poll doubles as the ~100ms frame tick.
        if event::poll(TICK_RATE)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    let quit = matches!(key.code, KeyCode::Char('q'))
                        || (matches!(key.code, KeyCode::Char('c'))
                            && key.modifiers.contains(KeyModifiers::CONTROL));
                    if quit {
                        cancel.cancel();
                        break;
                    }
                }
            }
        }

        if elapsed >= duration || cancel.is_cancelled() {
            break;
        }
    }

    Ok(())
}

fn draw(
    frame: &mut Frame,
    snapshot: &StatsSnapshot,
    elapsed: Duration,
    percent: f64,
    protocol: &'static str,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(7),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Min(0),
        ])
        .split(frame.area());

    let title = Paragraph::new(format!("  Galick Load Test Running... [{protocol}]"))
        .style(Style::default().add_modifier(Modifier::BOLD));
    frame.render_widget(title, chunks[0]);

    let elapsed_secs = elapsed.as_secs_f64();
    let qps = if elapsed_secs > 0.0 {
        snapshot.total_requests as f64 / elapsed_secs
    } else {
        0.0
    };
    let stats_text = format!(
        "  Requests: {}\n  Success:  {}\n  Errors:   {}\n  QPS:      {qps:.2}\n  P99:      {:.2?}",
        snapshot.total_requests,
        snapshot.success_count,
        snapshot.error_count,
        snapshot.quantile(0.99),
    );
    frame.render_widget(Paragraph::new(stats_text), chunks[1]);

    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title(" Progress "))
        .gauge_style(Style::default().fg(Color::Magenta))
        .ratio(percent);
    frame.render_widget(gauge, chunks[2]);

    let footer =
        Paragraph::new("  Press 'q' to quit").style(Style::default().fg(Color::DarkGray));
    frame.render_widget(footer, chunks[3]);
}
