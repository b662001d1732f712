//! Session router: the two byte pumps between the user's terminal and the child
//!
//! The inbound pump forwards keystrokes to the child unless a transfer owns
//! the session. The outbound pump relays child output to the terminal, hands
//! the stream to the active transfer while one is published, and watches for
//! transfer triggers.

use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use crate::wrap::context::{ChildInput, SessionContext};
use crate::wrap::drag::{
    detect_drag_files, DragAutomator, DragTimings, DropInput, UPLOAD_COMMAND,
    UPLOAD_DIRECTORY_COMMAND,
};
use crate::wrap::handoff::{Collaborators, HandoffController};
use crate::wrap::trace_log::{Direction, TraceLogger};
use crate::wrap::trigger::{mark_consumed, TriggerDetector};


/// Read size of both pumps
pub const BUFFER_SIZE: usize = 10 * 1024;

const CANCEL_BYTE: u8 = 0x03;
/// Written instead of closing the child's input on platforms that keep it open
const EOF_BYTE: u8 = 0x1a;

/// CSI, OSC and two-byte escape sequences
static VT100_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .unwrap()
});

/// Router behavior switches
#[derive(Debug, Clone)]
pub struct RouterOptions {
    /// Honor trace log sentinels
    pub trace_log: bool,
    /// Directory for trace log files
    pub trace_dir: PathBuf,
    /// Detect dropped files on the inbound stream
    pub drag_files: bool,
    pub drag_timings: DragTimings,
    /// Keep the child's input open at end of input
    pub eof_keeps_child_alive: bool,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            trace_log: false,
            trace_dir: std::env::temp_dir(),
            drag_files: false,
            drag_timings: DragTimings::default(),
            eof_keeps_child_alive: cfg!(windows),
        }
    }
}

/// Routes bytes for one wrapped session
pub struct SessionRouter {
    ctx: Arc<SessionContext>,
    child_input: ChildInput,
    detector: TriggerDetector,
    trace: Option<TraceLogger>,
    drag: Option<Arc<DragAutomator>>,
    handoff: Arc<HandoffController>,
    eof_keeps_child_alive: bool,
}

impl SessionRouter {
    pub fn new(
        ctx: Arc<SessionContext>,
        child_input: ChildInput,
        collaborators: Collaborators,
        options: RouterOptions,
    ) -> Self {
        let drag = options.drag_files.then(|| {
            Arc::new(DragAutomator::new(
                ctx.clone(),
                child_input.clone(),
                options.drag_timings,
            ))
        });
        let handoff = Arc::new(HandoffController::new(
            ctx.clone(),
            child_input.clone(),
            collaborators,
            drag.clone(),
        ));
        Self {
            ctx,
            child_input,
            detector: TriggerDetector::new(),
            trace: options
                .trace_log
                .then(|| TraceLogger::new(options.trace_dir)),
            drag,
            handoff,
            eof_keeps_child_alive: options.eof_keeps_child_alive,
        }
    }

    /// Pump the user's input into the child until end of input
    ///
    /// At end of input the child's input is closed, or receives a single
    /// `0x1A` byte when it must stay open.
    pub fn pump_input<R: Read>(&self, mut input: R) {
        let mut buf = vec![0u8; BUFFER_SIZE];
        loop {
            let n = match input.read(&mut buf) {
                Ok(0) if self.eof_keeps_child_alive => {
                    tracing::debug!("Input closed, signalling end of input to child");
                    if let Err(e) = self.route_input(&[EOF_BYTE]) {
                        tracing::debug!("Child input write error: {}", e);
                    }
                    break;
                }
                Ok(0) => {
                    tracing::debug!("Input closed, closing child input");
                    self.child_input.close();
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!("Input read error: {}", e);
                    break;
                }
            };

            if let Err(e) = self.route_input(&buf[..n]) {
                tracing::debug!("Child input write error: {}", e);
                break;
            }
        }
    }

    /// Route one inbound chunk
    fn route_input(&self, chunk: &[u8]) -> io::Result<()> {
        let chunk = self.trace(chunk, Direction::Inbound);

        if let Some(transfer) = self.ctx.active_transfer() {
            if chunk.first() == Some(&CANCEL_BYTE) {
                tracing::info!("Transfer cancelled from keyboard");
                transfer.stop_transferring_files();
            }
            return Ok(());
        }

        if let Some(drag) = &self.drag {
            match detect_drag_files(&chunk) {
                DropInput::Files(batch) => {
                    tracing::debug!(count = batch.paths.len(), "Files dropped");
                    drag.handle_drop(batch);
                    return Ok(());
                }
                DropInput::TerminalReport => {}
                DropInput::Other => {
                    drag.reset_drag_files();
                }
            }
        }

        self.child_input.write_all(&chunk)
    }

    /// Pump the child's output to the terminal until the child closes it
    pub fn pump_output<R: Read, W: Write>(&self, mut output: R, mut terminal: W) {
        let mut buf = vec![0u8; BUFFER_SIZE];
        loop {
            let n = match output.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    // EIO once the child side of the pty is gone
                    tracing::debug!("Child output read error: {}", e);
                    break;
                }
            };

            if let Err(e) = self.route_output(&buf[..n], &mut terminal) {
                tracing::debug!("Terminal write error: {}", e);
                break;
            }
        }
    }

    /// Route one outbound chunk
    fn route_output<W: Write>(&self, chunk: &[u8], terminal: &mut W) -> io::Result<()> {
        let chunk = self.trace(chunk, Direction::Outbound);

        if let Some(transfer) = self.ctx.active_transfer() {
            transfer.add_received_data(&chunk);
            return Ok(());
        }

        if let Some(found) = self.detector.detect(&chunk) {
            write_terminal(terminal, &mark_consumed(&chunk, found.offset))?;
            self.handoff.start(found.record);
            return Ok(());
        }

        if self.ctx.is_interrupting() {
            return Ok(());
        }

        if self.ctx.take_skip_echoed_command() && is_echoed_command(&chunk) {
            return write_terminal(terminal, b"\r\n");
        }

        write_terminal(terminal, &chunk)
    }

    fn trace<'a>(&self, chunk: &'a [u8], direction: Direction) -> Cow<'a, [u8]> {
        match &self.trace {
            Some(trace) => trace.process(chunk, direction),
            None => Cow::Borrowed(chunk),
        }
    }
}

fn write_terminal<W: Write>(terminal: &mut W, buf: &[u8]) -> io::Result<()> {
    terminal.write_all(buf)?;
    terminal.flush()
}

/// True if `chunk` is just the echo of an injected upload command
fn is_echoed_command(chunk: &[u8]) -> bool {
    let stripped = VT100_PATTERN.replace_all(chunk, &b""[..]);
    let end = stripped
        .iter()
        .rposition(|&b| b != b'\r' && b != b'\n')
        .map_or(0, |i| i + 1);
    let line = &stripped[..end];
    line == UPLOAD_COMMAND.as_bytes() || line == UPLOAD_DIRECTORY_COMMAND.as_bytes()
}
