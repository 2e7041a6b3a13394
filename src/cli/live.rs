//! Live terminal dashboard: session tabs, status panel, focused buffer.
//!
//! Uses `crossterm` for raw mode, the alternate screen and colors. The
//! layout is a fixed grid redrawn after each batch of dashboard events or
//! key presses.

#![allow(missing_docs)]
#![allow(clippy::cast_possible_truncation)]

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossterm::cursor::MoveTo;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};
use crossterm::style::{
    Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor,
};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};

use crate::app::dashboard::{Dashboard, Tone};
use crate::cli::style_color;
use crate::dispatch::target::Secret;
use crate::session::view::{SessionView, StyledLine};
use crate::text::search::{Layer, Span};

const STATUS_ROWS: usize = 8;
const REDRAW_EVERY: Duration = Duration::from_millis(250);

// ──────────────────── input state ────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
enum Prompt {
    Search,
    Filter,
    Save,
    OpenFile,
    OpenDirectory,
    Port,
    Color,
    Remote,
    Password { host: String, user: String },
}

impl Prompt {
    fn label(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Filter => "filter",
            Self::Save => "save to",
            Self::OpenFile => "open file",
            Self::OpenDirectory => "open directory",
            Self::Port => "port check (host port tcp|udp)",
            Self::Color => "color (KEYWORD style)",
            Self::Remote => "remote (host user)",
            Self::Password { .. } => "password",
        }
    }

    const fn masked(&self) -> bool {
        matches!(self, Self::Password { .. })
    }
}

#[derive(Debug, Default)]
struct InputState {
    prompt: Option<(Prompt, String)>,
    /// Result of the last prompt, shown until the next dashboard message.
    notice: Option<String>,
}

enum Flow {
    Continue,
    Quit,
}

// ──────────────────── main loop ────────────────────

/// Run until the user quits (q/Esc/Ctrl-C) or `shutdown` is set.
pub fn run(dashboard: &mut Dashboard, shutdown: &AtomicBool) -> io::Result<()> {
    let mut stdout = io::stdout();
    terminal::enable_raw_mode()?;
    execute!(stdout, EnterAlternateScreen)?;

    let result = run_inner(&mut stdout, dashboard, shutdown);

    let _ = execute!(stdout, LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();
    result
}

fn run_inner(
    stdout: &mut io::Stdout,
    dashboard: &mut Dashboard,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    let mut input = InputState::default();
    let mut last_render: Option<Instant> = None;
    let mut dirty = true;

    while !shutdown.load(Ordering::Relaxed) {
        if event::poll(Duration::from_millis(50))?
            && let Event::Key(key) = event::read()?
        {
            if let Flow::Quit = handle_key(dashboard, &mut input, key) {
                return Ok(());
            }
            dirty = true;
        }

        if dashboard.pump(Duration::ZERO) > 0 {
            input.notice = None;
            dirty = true;
        }

        let due = last_render.is_none_or(|t| t.elapsed() >= REDRAW_EVERY);
        if dirty || due {
            render_frame(stdout, dashboard, &input)?;
            last_render = Some(Instant::now());
            dirty = false;
        }
    }
    Ok(())
}

// ──────────────────── key handling ────────────────────

fn handle_key(dashboard: &mut Dashboard, input: &mut InputState, key: KeyEvent) -> Flow {
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return Flow::Quit;
    }
    if input.prompt.is_some() {
        handle_prompt_key(dashboard, input, key);
        return Flow::Continue;
    }

    let open_prompt = |p: Prompt| Some((p, String::new()));
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return Flow::Quit,
        KeyCode::Tab => cycle_focus(dashboard, true),
        KeyCode::BackTab => cycle_focus(dashboard, false),
        KeyCode::Char('x') => {
            if let Some(id) = dashboard.sessions().focused() {
                note(input, dashboard.sessions_mut().close(id));
            }
        }
        KeyCode::Char('r') => note(input, dashboard.sessions_mut().refresh_now()),
        KeyCode::Char('a') => {
            let next = !dashboard.sessions().auto_refresh();
            note(input, dashboard.sessions_mut().set_auto_refresh(next));
        }
        KeyCode::Char('c') => note(input, dashboard.sessions_mut().clear()),
        KeyCode::Char('R') => note(input, dashboard.refresh_status()),
        KeyCode::Char('l') => dashboard.open_latest_log(),
        KeyCode::Char('d') => note(input, dashboard.monitor_data_folder().map(|_| ())),
        KeyCode::Char('S') => dashboard.restart_service(),
        KeyCode::Char('C') => dashboard.clear_site_cache(),
        KeyCode::Char('A') => dashboard.clear_agent_cache(),
        KeyCode::Char('t') => note(input, dashboard.toggle_throttle()),
        KeyCode::Char('M') => dashboard.clear_remote(),
        KeyCode::Char('/') => input.prompt = open_prompt(Prompt::Search),
        KeyCode::Char('f') => input.prompt = open_prompt(Prompt::Filter),
        KeyCode::Char('s') => input.prompt = open_prompt(Prompt::Save),
        KeyCode::Char('o') => input.prompt = open_prompt(Prompt::OpenFile),
        KeyCode::Char('O') => input.prompt = open_prompt(Prompt::OpenDirectory),
        KeyCode::Char('p') => input.prompt = open_prompt(Prompt::Port),
        KeyCode::Char('k') => input.prompt = open_prompt(Prompt::Color),
        KeyCode::Char('m') => input.prompt = open_prompt(Prompt::Remote),
        _ => {}
    }
    Flow::Continue
}

fn handle_prompt_key(dashboard: &mut Dashboard, input: &mut InputState, key: KeyEvent) {
    let Some((prompt, buffer)) = input.prompt.as_mut() else {
        return;
    };
    match key.code {
        KeyCode::Esc => input.prompt = None,
        KeyCode::Backspace => {
            buffer.pop();
        }
        KeyCode::Char(c) => buffer.push(c),
        KeyCode::Enter => {
            let (prompt, text) = (prompt.clone(), std::mem::take(buffer));
            input.prompt = None;
            submit(dashboard, input, prompt, &text);
        }
        _ => {}
    }
}

fn submit(dashboard: &mut Dashboard, input: &mut InputState, prompt: Prompt, text: &str) {
    let words: Vec<&str> = text.split_whitespace().collect();
    match prompt {
        Prompt::Search => {
            let r = dashboard.sessions_mut().search(text);
            input.notice = Some(match r {
                Ok(n) => format!("{n} match(es)"),
                Err(e) => e.to_string(),
            });
        }
        Prompt::Filter => {
            let r = dashboard.sessions_mut().filter(text);
            input.notice = Some(match r {
                Ok(n) => format!("{n} filter match(es)"),
                Err(e) => e.to_string(),
            });
        }
        Prompt::Save => note(input, dashboard.sessions_mut().save(std::path::Path::new(text.trim()))),
        Prompt::OpenFile => note(input, dashboard.open_file(text).map(|_| ())),
        Prompt::OpenDirectory => note(input, dashboard.open_directory(text).map(|_| ())),
        Prompt::Port => {
            let (host, port, proto) = (
                words.first().copied().unwrap_or_default(),
                words.get(1).copied().unwrap_or_default(),
                words.get(2).copied().unwrap_or("TCP"),
            );
            note(input, dashboard.check_port(host, port, proto));
        }
        Prompt::Color => {
            let (keyword, style) = text.trim().split_once(' ').unwrap_or((text.trim(), ""));
            note(input, dashboard.change_color(keyword, style));
        }
        Prompt::Remote => match words.as_slice() {
            [host, user] => {
                input.prompt = Some((
                    Prompt::Password {
                        host: (*host).to_string(),
                        user: (*user).to_string(),
                    },
                    String::new(),
                ));
            }
            _ => input.notice = Some("expected: host user".to_string()),
        },
        Prompt::Password { host, user } => {
            note(input, dashboard.set_remote(&host, &user, Secret::new(text)));
        }
    }
}

fn note(input: &mut InputState, result: crate::core::errors::Result<()>) {
    if let Err(e) = result {
        input.notice = Some(e.to_string());
    }
}

fn cycle_focus(dashboard: &mut Dashboard, forward: bool) {
    let open = dashboard.sessions().list_open();
    if open.is_empty() {
        return;
    }
    let current = dashboard
        .sessions()
        .focused()
        .and_then(|f| open.iter().position(|id| *id == f))
        .unwrap_or(0);
    let next = if forward {
        (current + 1) % open.len()
    } else {
        (current + open.len() - 1) % open.len()
    };
    let _ = dashboard.sessions_mut().focus(open[next]);
}

// ──────────────────── frame rendering ────────────────────

fn render_frame(stdout: &mut io::Stdout, dashboard: &Dashboard, input: &InputState) -> io::Result<()> {
    let (cols, rows) = terminal::size()?;
    let (width, height) = (cols as usize, rows as usize);
    queue!(stdout, Clear(ClearType::All), MoveTo(0, 0))?;

    let target = dashboard.dispatcher().selector().snapshot();
    let auto = if dashboard.sessions().auto_refresh() { "on" } else { "off" };
    queue!(
        stdout,
        SetAttribute(Attribute::Bold),
        Print(clip(
            &format!(" bfxdiag | target: {} | auto-refresh: {auto}", target.target.label()),
            width
        )),
        SetAttribute(Attribute::Reset),
    )?;

    let mut row: u16 = 1;
    for (label, value) in dashboard.status().rows() {
        queue!(
            stdout,
            MoveTo(0, row),
            Print(clip(&format!(" {label:<20} {value}"), width))
        )?;
        row += 1;
    }

    queue!(stdout, MoveTo(0, row))?;
    render_tabs(stdout, dashboard, width)?;
    row += 1;

    let body_rows = height.saturating_sub(STATUS_ROWS + 4);
    if let Some(view) = dashboard.sessions().focused().and_then(|id| dashboard.sessions().view(id)) {
        render_view(stdout, view, row, body_rows, width)?;
    }

    let footer_row = rows.saturating_sub(1);
    queue!(stdout, MoveTo(0, footer_row))?;
    render_footer(stdout, dashboard, input, width)?;
    stdout.flush()
}

fn render_tabs(stdout: &mut io::Stdout, dashboard: &Dashboard, width: usize) -> io::Result<()> {
    let sessions = dashboard.sessions();
    let focused = sessions.focused();
    let mut used = 0;
    for (n, id) in sessions.list_open().into_iter().enumerate() {
        let title = sessions.title(id).unwrap_or_default();
        let live = if sessions.is_live(id) { "" } else { " (stopped)" };
        let tab = format!(" {}:{title}{live} ", n + 1);
        used += tab.chars().count();
        if used > width {
            break;
        }
        if Some(id) == focused {
            queue!(stdout, SetAttribute(Attribute::Reverse), Print(tab), SetAttribute(Attribute::Reset))?;
        } else {
            queue!(stdout, Print(tab))?;
        }
    }
    if used == 0 {
        queue!(stdout, Print(" no open sessions (o: open file, l: latest log, d: data folder)"))?;
    }
    Ok(())
}

fn render_view(
    stdout: &mut io::Stdout,
    view: &SessionView,
    top: u16,
    rows: usize,
    width: usize,
) -> io::Result<()> {
    if let Some(err) = view.last_error() {
        queue!(
            stdout,
            MoveTo(0, top),
            SetForegroundColor(Color::Red),
            Print(clip(err, width)),
            ResetColor
        )?;
    }
    let lines = view.lines();
    let skip = lines.len().saturating_sub(rows.saturating_sub(1));
    for (offset, (idx, line)) in lines.iter().enumerate().skip(skip).enumerate() {
        let y = top + 1 + offset as u16;
        queue!(stdout, MoveTo(0, y))?;
        render_line(
            stdout,
            line,
            spans_for(view.spans(Layer::Search), idx),
            spans_for(view.spans(Layer::Filter), idx),
            width,
        )?;
    }
    Ok(())
}

fn spans_for(spans: &[Span], line: usize) -> Vec<&Span> {
    spans.iter().filter(|s| s.line == line).collect()
}

fn render_line(
    stdout: &mut io::Stdout,
    line: &StyledLine,
    search: Vec<&Span>,
    filter: Vec<&Span>,
    width: usize,
) -> io::Result<()> {
    if let Some(color) = line.style.as_ref().and_then(style_color) {
        queue!(stdout, SetForegroundColor(color))?;
    }
    let in_span = |spans: &[&Span], at: usize| spans.iter().any(|s| s.start <= at && at < s.end);
    let mut current = (false, false);
    for (i, (at, ch)) in line.text.char_indices().enumerate() {
        if i >= width {
            break;
        }
        let marks = (in_span(&search, at), in_span(&filter, at));
        if marks != current {
            queue!(stdout, SetAttribute(Attribute::NoReverse), SetAttribute(Attribute::NoUnderline))?;
            if marks.0 {
                queue!(stdout, SetAttribute(Attribute::Reverse))?;
            }
            if marks.1 {
                queue!(stdout, SetAttribute(Attribute::Underlined))?;
            }
            current = marks;
        }
        queue!(stdout, Print(ch))?;
    }
    queue!(stdout, SetAttribute(Attribute::Reset), ResetColor)
}

fn render_footer(
    stdout: &mut io::Stdout,
    dashboard: &Dashboard,
    input: &InputState,
    width: usize,
) -> io::Result<()> {
    if let Some((prompt, buffer)) = &input.prompt {
        let shown = if prompt.masked() {
            "*".repeat(buffer.chars().count())
        } else {
            buffer.clone()
        };
        return queue!(stdout, Print(clip(&format!(" {}: {shown}", prompt.label()), width)));
    }
    if let Some(notice) = &input.notice {
        return queue!(stdout, Print(clip(&format!(" {notice}"), width)));
    }
    let line = dashboard.status_line();
    let color = match line.tone {
        Tone::Info => Color::Reset,
        Tone::Busy => Color::Yellow,
        Tone::Success => Color::Green,
        Tone::Error => Color::Red,
    };
    queue!(
        stdout,
        SetForegroundColor(color),
        Print(clip(&format!(" {}", line.message), width)),
        ResetColor
    )
}

fn clip(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_counts_chars() {
        assert_eq!(clip("héllo", 2), "hé");
        assert_eq!(clip("ab", 10), "ab");
    }

    #[test]
    fn prompt_labels() {
        assert!(Prompt::Password {
            host: "h".into(),
            user: "u".into()
        }
        .masked());
        assert!(!Prompt::Search.masked());
        assert_eq!(Prompt::Color.label(), "color (KEYWORD style)");
    }

    #[test]
    fn span_lookup_is_per_line() {
        let spans = vec![
            Span { line: 0, start: 0, end: 2 },
            Span { line: 1, start: 1, end: 3 },
        ];
        assert_eq!(spans_for(&spans, 1).len(), 1);
        assert!(spans_for(&spans, 5).is_empty());
    }
}
