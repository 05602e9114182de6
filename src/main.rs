use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
    Frame, Terminal,
};
use std::{
    io::{self, stdout},
    time::{Duration, Instant},
};

use puyo::game::{CascadeStep, Game, GameEvent, Phase, PuyoColor};

// ============================================================================
// Visual Constants
// ============================================================================

const CELL_WIDTH: u16 = 2;
const BLOCK_CHAR: &str = "██";
const EMPTY_CHAR: &str = "  ";

// ============================================================================
// Color Mapping
// ============================================================================

fn puyo_color(color: PuyoColor) -> Color {
    match color {
        PuyoColor::Blue => Color::Blue,
        PuyoColor::Purple => Color::Magenta,
        PuyoColor::Pink => Color::LightMagenta,
        PuyoColor::Orange => Color::Rgb(255, 165, 0),
        PuyoColor::Green => Color::Green,
        PuyoColor::Teal => Color::Cyan,
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Settled cells plus the active piece, composed into one drawable grid.
/// The bool marks cells fading out before removal.
fn compose_grid(game: &Game) -> Vec<Vec<Option<(PuyoColor, bool)>>> {
    let (rows, cols) = game.dimensions();
    let mut grid = vec![vec![None; cols]; rows];

    for cell in game.cells() {
        grid[cell.y][cell.x] = Some((cell.color, cell.removed));
    }
    for cell in game.player_cells() {
        grid[cell.y][cell.x] = Some((cell.color, false));
    }

    grid
}

fn render(frame: &mut Frame, game: &Game, cleared_total: u32) {
    let area = frame.size();
    render_game(frame, game, cleared_total, area);
    if game.is_game_over() {
        render_game_over(frame, cleared_total, area);
    }
}

fn render_game(frame: &mut Frame, game: &Game, cleared_total: u32, area: Rect) {
    let (rows, cols) = game.dimensions();
    let grid_display_width = (cols as u16 * CELL_WIDTH) + 2;
    let grid_display_height = rows as u16 + 2;
    let info_width = 14;
    let total_width = grid_display_width + info_width + 2;
    let total_height = grid_display_height + 3;

    let main_area = centered_rect(total_width, total_height, area);

    let vertical = Layout::vertical([
        Constraint::Length(grid_display_height),
        Constraint::Fill(1),
    ])
    .split(main_area);

    let game_row = vertical[0];

    let horizontal = Layout::horizontal([
        Constraint::Length(grid_display_width),
        Constraint::Length(info_width),
    ])
    .split(game_row);

    render_grid(frame, game, horizontal[0]);
    render_info(frame, game, cleared_total, horizontal[1]);

    let controls_area = Rect {
        x: area.x,
        y: game_row.y + game_row.height,
        width: area.width,
        height: 2,
    };

    if controls_area.y + 1 < area.height {
        let controls = Paragraph::new(vec![Line::from(
            "←→/AD: Move | ↓/S: Drop | ↑/Space: Rotate | R: Restart | Q/ESC: Quit",
        )])
        .alignment(Alignment::Center)
        .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(controls, controls_area);
    }
}

fn render_grid(frame: &mut Frame, game: &Game, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Puyo ")
        .title_alignment(Alignment::Center);

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let grid = compose_grid(game);
    let mut lines: Vec<Line> = Vec::new();

    for row in &grid {
        let mut spans: Vec<Span> = Vec::new();

        for slot in row {
            let (symbol, style) = match slot {
                None => (EMPTY_CHAR, Style::default()),
                Some((color, false)) => (BLOCK_CHAR, Style::default().fg(puyo_color(*color))),
                // Fading out before removal
                Some((color, true)) => (
                    BLOCK_CHAR,
                    Style::default()
                        .fg(puyo_color(*color))
                        .add_modifier(Modifier::DIM),
                ),
            };
            spans.push(Span::styled(symbol, style));
        }

        lines.push(Line::from(spans));
    }

    let paragraph = Paragraph::new(lines);
    frame.render_widget(paragraph, inner);
}

fn render_info(frame: &mut Frame, game: &Game, cleared_total: u32, area: Rect) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(" Info ")
        .title_alignment(Alignment::Center);

    let inner = block.inner(area);
    frame.render_widget(block, area);

    let phase = match game.phase() {
        Phase::Falling => "falling",
        Phase::Settling => "settling",
        Phase::Removing => "clearing",
        Phase::GameOver => "game over",
    };

    let lines = vec![
        Line::from(""),
        Line::from(Span::styled("Cleared", Style::default().fg(Color::Yellow))),
        Line::from(format!("{}", cleared_total)),
        Line::from(""),
        Line::from(Span::styled("Speed", Style::default().fg(Color::Cyan))),
        Line::from(format!("{} ms", game.drop_period_ms())),
        Line::from(""),
        Line::from(Span::styled("Phase", Style::default().fg(Color::Green))),
        Line::from(phase),
    ];

    let paragraph = Paragraph::new(lines).alignment(Alignment::Center);
    frame.render_widget(paragraph, inner);
}

fn render_game_over(frame: &mut Frame, cleared_total: u32, area: Rect) {
    let text = vec![
        Line::from(""),
        Line::from(Span::styled("GAME OVER", Style::default().fg(Color::Red))),
        Line::from(""),
        Line::from(format!("Cleared: {}", cleared_total)),
        Line::from(""),
        Line::from(Span::styled(
            "Press R to restart",
            Style::default().fg(Color::DarkGray),
        )),
        Line::from(Span::styled(
            "Press ESC to quit",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let paragraph = Paragraph::new(text).alignment(Alignment::Center).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Game Over ")
            .title_alignment(Alignment::Center)
            .style(Style::default().bg(Color::Black)),
    );

    let popup_area = centered_rect(24, 11, area);
    frame.render_widget(paragraph, popup_area);
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let horizontal = Layout::horizontal([
        Constraint::Fill(1),
        Constraint::Length(width.min(area.width)),
        Constraint::Fill(1),
    ])
    .split(area);

    let vertical = Layout::vertical([
        Constraint::Fill(1),
        Constraint::Length(height.min(area.height)),
        Constraint::Fill(1),
    ])
    .split(horizontal[1]);

    vertical[1]
}

// ============================================================================
// Main Loop
// ============================================================================

fn main() -> io::Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout());
    let mut terminal = Terminal::new(backend)?;

    let mut game = Game::new();
    let mut cleared_total: u32 = 0;
    let mut last_tick = Instant::now();
    // Deadline for the next cascade step; None while no cascade is running.
    let mut next_cascade_at: Option<Instant> = None;

    loop {
        for event in game.take_events() {
            if let GameEvent::MatchesRemoved(count) = event {
                cleared_total += count as u32;
            }
        }

        terminal.draw(|frame| render(frame, &game, cleared_total))?;

        // Wait until the nearest deadline: a cascade step while busy,
        // otherwise the next automatic-descent tick.
        let drop_period = Duration::from_millis(game.drop_period_ms());
        let deadline = next_cascade_at.unwrap_or(last_tick + drop_period);
        let timeout = deadline.saturating_duration_since(Instant::now());

        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        // Always allow quit
                        KeyCode::Esc | KeyCode::Char('q') | KeyCode::Char('Q') => break,
                        // Always allow restart
                        KeyCode::Char('r') | KeyCode::Char('R') => {
                            game.restart();
                            cleared_total = 0;
                            last_tick = Instant::now();
                            next_cascade_at = None;
                        }
                        // Only process piece controls while input is accepted
                        _ if game.accepting_input() => {
                            let pivot = game.player_cells()[0];
                            let (px, py) = (pivot.x as i32, pivot.y as i32);
                            match key.code {
                                KeyCode::Left | KeyCode::Char('a') | KeyCode::Char('A') => {
                                    game.request_move_to(px - 1, py);
                                }
                                KeyCode::Right | KeyCode::Char('d') | KeyCode::Char('D') => {
                                    game.request_move_to(px + 1, py);
                                }
                                KeyCode::Down | KeyCode::Char('s') | KeyCode::Char('S') => {
                                    game.request_move_to(px, py + 1);
                                }
                                KeyCode::Up
                                | KeyCode::Char('w')
                                | KeyCode::Char('W')
                                | KeyCode::Char(' ') => {
                                    game.request_rotate();
                                }
                                _ => {}
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let now = Instant::now();
        if let Some(at) = next_cascade_at {
            if now >= at {
                next_cascade_at = match game.step_cascade() {
                    CascadeStep::Collapsed => {
                        Some(now + Duration::from_millis(game.drop_period_ms()))
                    }
                    CascadeStep::MatchesMarked(_) => {
                        Some(now + Duration::from_millis(game.removal_delay_ms()))
                    }
                    CascadeStep::MatchesRemoved(_) => Some(now),
                    CascadeStep::Settled | CascadeStep::Idle => {
                        last_tick = now;
                        None
                    }
                };
            }
        } else if now.duration_since(last_tick) >= Duration::from_millis(game.drop_period_ms()) {
            game.on_tick();
            last_tick = now;
            if game.is_busy() {
                // Piece locked on this tick; start pacing the cascade.
                next_cascade_at = Some(now + Duration::from_millis(game.drop_period_ms()));
            }
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}
