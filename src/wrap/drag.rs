//! Drag-upload automation
//!
//! Terminals paste the paths of files dropped onto them. When drag support is
//! enabled, a pasted path list is held back from the child, and after a short
//! settle delay the automator types `trz` (or `trz -d`) into the child so the
//! remote side starts an upload of the dropped files.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::wrap::context::{ChildInput, SessionContext};

const PASTE_START: &[u8] = b"\x1b[200~";
const PASTE_END: &[u8] = b"\x1b[201~";
const CANCEL_BYTE: u8 = 0x03;

/// Command typed for a batch of files
pub const UPLOAD_COMMAND: &str = "trz";
/// Command typed for a batch containing a directory
pub const UPLOAD_DIRECTORY_COMMAND: &str = "trz -d";

/// Delays of one automation cycle
#[derive(Debug, Clone, Copy)]
pub struct DragTimings {
    /// Wait for further drops before starting
    pub settle: Duration,
    /// Wait after cancelling the partially typed command line
    pub interrupt: Duration,
    /// Wait for the remote side to answer with a trigger
    pub answer: Duration,
}

impl Default for DragTimings {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(300),
            interrupt: Duration::from_millis(200),
            answer: Duration::from_secs(1),
        }
    }
}

/// Dropped paths waiting for upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DragBatch {
    pub paths: Vec<PathBuf>,
    pub has_directory: bool,
}

#[derive(Default)]
struct DragState {
    dragging: bool,
    batch: DragBatch,
    /// Bumped for every new batch so a stale cycle never clears a newer one
    generation: u64,
}

/// Result of inspecting an inbound chunk for dropped paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropInput {
    /// The chunk is a list of dropped paths
    Files(DragBatch),
    /// Escape-prefixed terminal report; leaves a pending batch alone
    TerminalReport,
    /// Ordinary input
    Other,
}

/// Batches dropped paths and drives one upload cycle per batch
pub struct DragAutomator {
    state: Mutex<DragState>,
    ctx: Arc<SessionContext>,
    child_input: ChildInput,
    timings: DragTimings,
}

impl DragAutomator {
    pub fn new(ctx: Arc<SessionContext>, child_input: ChildInput, timings: DragTimings) -> Self {
        Self {
            state: Mutex::new(DragState::default()),
            ctx,
            child_input,
            timings,
        }
    }

    pub fn is_dragging(&self) -> bool {
        self.state.lock().dragging
    }

    /// Add dropped paths
    ///
    /// Returns the generation of the batch if this call started a new one,
    /// `None` if the paths were appended to the pending batch.
    pub fn add_drag_files(&self, paths: Vec<PathBuf>, has_directory: bool) -> Option<u64> {
        let mut state = self.state.lock();
        state.batch.has_directory |= has_directory;
        if state.dragging {
            state.batch.paths.extend(paths);
            return None;
        }
        state.dragging = true;
        state.batch.paths = paths;
        state.generation += 1;
        Some(state.generation)
    }

    /// Clear the pending batch, returning it if one was pending
    pub fn reset_drag_files(&self) -> Option<DragBatch> {
        let mut state = self.state.lock();
        if !state.dragging {
            return None;
        }
        state.dragging = false;
        Some(std::mem::take(&mut state.batch))
    }

    /// Record a drop and start an automation cycle for a new batch
    pub fn handle_drop(self: &Arc<Self>, batch: DragBatch) {
        if let Some(generation) = self.add_drag_files(batch.paths, batch.has_directory) {
            let automator = Arc::clone(self);
            thread::spawn(move || automator.run_cycle(generation));
        }
    }

    /// One automation cycle for the batch started as `generation`
    fn run_cycle(&self, generation: u64) {
        thread::sleep(self.timings.settle);
        let has_directory = {
            let state = self.state.lock();
            // Reset, or superseded by a batch with its own cycle
            if !state.dragging || state.generation != generation {
                return;
            }
            state.batch.has_directory
        };

        self.ctx.set_interrupting(true);
        self.write_child(&[CANCEL_BYTE]);
        thread::sleep(self.timings.interrupt);
        self.ctx.set_interrupting(false);

        self.ctx.arm_skip_echoed_command();
        let command = if has_directory {
            UPLOAD_DIRECTORY_COMMAND
        } else {
            UPLOAD_COMMAND
        };
        tracing::debug!(command, "Starting drag upload");
        self.write_child(format!("{}\r", command).as_bytes());

        thread::sleep(self.timings.answer);
        let mut state = self.state.lock();
        if state.dragging && state.generation == generation {
            state.dragging = false;
            state.batch = DragBatch::default();
        }
    }

    fn write_child(&self, buf: &[u8]) {
        if let Err(e) = self.child_input.write_all(buf) {
            tracing::debug!("Failed to write drag command: {}", e);
        }
    }
}

/// Inspect an inbound chunk for a pasted list of dropped paths
///
/// Accepts bracketed pastes, or plain chunks of at least two bytes ending in
/// a space. Tokens follow shell quoting, and every token must be an existing
/// absolute path.
pub fn detect_drag_files(buf: &[u8]) -> DropInput {
    let (body, bracketed) = match buf.strip_prefix(PASTE_START) {
        Some(rest) => (rest.strip_suffix(PASTE_END).unwrap_or(rest), true),
        None if buf.first() == Some(&0x1b) => return DropInput::TerminalReport,
        None => (buf, false),
    };
    let Ok(text) = std::str::from_utf8(body) else {
        return DropInput::Other;
    };
    if !bracketed && (text.len() < 2 || !text.ends_with(' ')) {
        return DropInput::Other;
    }
    let Some(tokens) = shlex::split(text) else {
        return DropInput::Other;
    };
    if tokens.is_empty() {
        return DropInput::Other;
    }

    let mut batch = DragBatch::default();
    for token in tokens {
        let path = PathBuf::from(token);
        if !path.is_absolute() {
            return DropInput::Other;
        }
        match std::fs::metadata(&path) {
            Ok(metadata) => batch.has_directory |= metadata.is_dir(),
            Err(_) => return DropInput::Other,
        }
        batch.paths.push(path);
    }
    DropInput::Files(batch)
}
