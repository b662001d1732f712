//! Local terminal helpers: raw mode and window size

use nix::sys::termios::{self, SetArg, Termios};
use std::io::{self, IsTerminal};
use std::os::fd::AsFd;

/// Puts stdin into raw mode until dropped
pub struct RawModeGuard {
    original: Termios,
}

impl RawModeGuard {
    /// Enable raw mode; `None` when stdin is not a terminal
    pub fn enable() -> nix::Result<Option<Self>> {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            return Ok(None);
        }
        let original = termios::tcgetattr(stdin.as_fd())?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(stdin.as_fd(), SetArg::TCSANOW, &raw)?;
        Ok(Some(Self { original }))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(io::stdin().as_fd(), SetArg::TCSANOW, &self.original) {
            tracing::debug!("Failed to restore terminal mode: {}", e);
        }
    }
}

/// Current terminal size as (rows, columns)
pub fn get_terminal_size() -> Option<(u16, u16)> {
    let fd = libc::STDOUT_FILENO;
    let mut size: libc::winsize = unsafe { std::mem::zeroed() };

    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut size) };

    if result == 0 && size.ws_row > 0 && size.ws_col > 0 {
        Some((size.ws_row, size.ws_col))
    } else {
        None
    }
}
