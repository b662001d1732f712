//! Single-line text progress indicator

use parking_lot::Mutex;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};
use unicode_width::UnicodeWidthChar;

use super::{ProgressCallback, ProgressFactory};

/// Minimum interval between redraws
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

struct ProgressState {
    columns: u16,
    tmux_pane_columns: Option<u16>,
    file_count: usize,
    file_index: usize,
    name: String,
    size: u64,
    step: u64,
    last_draw: Option<Instant>,
}

/// Progress bar redrawn in place with carriage returns
pub struct TextProgressBar<W: Write + Send> {
    writer: Mutex<W>,
    state: Mutex<ProgressState>,
}

impl<W: Write + Send> TextProgressBar<W> {
    pub fn new(writer: W, columns: u16, tmux_pane_columns: Option<u16>) -> Self {
        Self {
            writer: Mutex::new(writer),
            state: Mutex::new(ProgressState {
                columns,
                tmux_pane_columns,
                file_count: 0,
                file_index: 0,
                name: String::new(),
                size: 0,
                step: 0,
                last_draw: None,
            }),
        }
    }

    fn draw(&self, force: bool) {
        let line = {
            let mut state = self.state.lock();
            let now = Instant::now();
            if !force
                && state
                    .last_draw
                    .is_some_and(|t| now.duration_since(t) < REDRAW_INTERVAL)
            {
                return;
            }
            state.last_draw = Some(now);
            render_line(&state)
        };
        let mut writer = self.writer.lock();
        let _ = write!(writer, "\r{}", line);
        let _ = writer.flush();
    }
}

fn render_line(state: &ProgressState) -> String {
    let width = match state.tmux_pane_columns {
        Some(pane) if pane > 0 => pane.min(state.columns),
        _ => state.columns,
    } as usize;
    let percent = if state.size == 0 {
        100
    } else {
        (state.step.saturating_mul(100) / state.size).min(100)
    };
    let prefix = if state.file_count > 1 {
        format!("({}/{}) ", state.file_index, state.file_count)
    } else {
        String::new()
    };
    let suffix = format!(" {:>3}% {}/{}", percent, human_size(state.step), human_size(state.size));

    let budget = width.saturating_sub(prefix.len() + suffix.len() + 1);
    format!("{}{}{}", prefix, fit_width(&state.name, budget), suffix)
}

/// Truncate `text` to at most `width` terminal columns
fn fit_width(text: &str, width: usize) -> String {
    let mut used = 0;
    let mut out = String::new();
    for c in text.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width {
            break;
        }
        used += w;
        out.push(c);
    }
    out
}

fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{}{}", bytes, UNITS[0])
    } else {
        format!("{:.1}{}", value, UNITS[unit])
    }
}

impl<W: Write + Send> ProgressCallback for TextProgressBar<W> {
    fn on_num(&self, num: usize) {
        self.state.lock().file_count = num;
    }

    fn on_name(&self, name: &str) {
        {
            let mut state = self.state.lock();
            state.file_index += 1;
            state.name = name.to_string();
            state.size = 0;
            state.step = 0;
        }
        self.draw(true);
    }

    fn on_size(&self, size: u64) {
        self.state.lock().size = size;
    }

    fn on_step(&self, step: u64) {
        let done = {
            let mut state = self.state.lock();
            state.step = step;
            step >= state.size
        };
        self.draw(done);
    }

    fn on_done(&self) {
        self.draw(true);
        let mut writer = self.writer.lock();
        let _ = writer.write_all(b"\r\n");
        let _ = writer.flush();
    }

    fn set_terminal_columns(&self, columns: u16) {
        self.state.lock().columns = columns;
        self.draw(true);
    }
}

/// Builds progress bars on the real terminal
#[derive(Default)]
pub struct TextProgressFactory;

impl ProgressFactory for TextProgressFactory {
    fn create(&self, columns: u16, tmux_pane_columns: Option<u16>) -> Arc<dyn ProgressCallback> {
        Arc::new(TextProgressBar::new(io::stdout(), columns, tmux_pane_columns))
    }
}
