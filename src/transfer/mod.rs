//! Collaborators driven by the transfer handoff
//!
//! The interception layer only talks to these traits. The built-in
//! implementations wired by the `trzsz` binary live in the submodules.

mod buffer;
mod paths;
mod picker;
mod progress;
mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::ReceiveBuffer;
pub use paths::{check_duplicate_names, check_path_writable, check_paths_readable, SourceFile};
pub use picker::DialogPicker;
pub use progress::{TextProgressBar, TextProgressFactory};
pub use stream::{StreamTransfer, StreamTransferFactory};

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::wrap::ChildInput;

/// Error type for transfer flows
#[derive(Debug, Error)]
pub enum TransferError {
    /// Cancelled locally (in-band cancel byte or interrupt signal)
    #[error("Stopped")]
    Stopped,

    /// A local path failed a permission or existence check
    #[error("{0}")]
    Path(String),

    /// The remote side reported a failure
    #[error("remote error: {0}")]
    Remote(String),

    /// Unexpected or malformed message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The remote side did not answer in time
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The file picker could not be run
    #[error("picker error: {0}")]
    Picker(String),

    /// A dispatch task panicked
    #[error("panic: {0}")]
    Panic(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Transfer configuration announced by the remote side
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TransferConfig {
    /// Remote asked for no progress output
    #[serde(default)]
    pub quiet: bool,

    /// Remote will overwrite existing files instead of renaming
    #[serde(default)]
    pub overwrite: bool,

    /// Width of the remote tmux pane, if the remote runs inside tmux
    #[serde(default)]
    pub tmux_pane_width: Option<i32>,
}

/// One in-flight transfer, bound to the child's input stream
///
/// Published in the session's single active-transfer slot for the duration
/// of a dispatch flow. Both pumps and the signal bridge only ever call
/// [`Transfer::add_received_data`] and [`Transfer::stop_transferring_files`].
pub trait Transfer: Send + Sync {
    /// Accept or decline the transfer offered by the remote side
    fn send_action(&self, confirm: bool, remote_is_windows: bool) -> Result<(), TransferError>;

    /// Receive the remote's transfer configuration
    fn recv_config(&self) -> Result<TransferConfig, TransferError>;

    /// Receive files into `dir`, returning the local names
    fn recv_files(
        &self,
        dir: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<String>, TransferError>;

    /// Send `files`, returning the names the remote saved them as
    fn send_files(
        &self,
        files: &[SourceFile],
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<String>, TransferError>;

    /// Finish successfully with a status message
    fn client_exit(&self, message: &str) -> Result<(), TransferError>;

    /// Report a failure to the remote side
    fn client_error(&self, err: &TransferError);

    /// Abort the in-progress file operation
    fn stop_transferring_files(&self);

    /// Deliver bytes read from the child's output
    fn add_received_data(&self, buf: &[u8]);
}

/// Creates a transfer bound to the child's input stream
pub trait TransferFactory: Send + Sync {
    fn create(&self, child_input: ChildInput) -> Arc<dyn Transfer>;
}

/// File and folder selection
///
/// `Ok(None)` means the user cancelled, which declines the transfer.
pub trait PathPicker: Send + Sync {
    fn choose_save_directory(&self) -> Result<Option<PathBuf>, TransferError>;

    fn choose_upload_paths(&self, directory: bool) -> Result<Option<Vec<PathBuf>>, TransferError>;
}

/// Progress events emitted by the file flows
pub trait ProgressCallback: Send + Sync {
    fn on_num(&self, num: usize);
    fn on_name(&self, name: &str);
    fn on_size(&self, size: u64);
    fn on_step(&self, step: u64);
    fn on_done(&self);
    fn set_terminal_columns(&self, columns: u16);
}

/// Builds a progress indicator sized to the terminal
pub trait ProgressFactory: Send + Sync {
    fn create(&self, columns: u16, tmux_pane_columns: Option<u16>) -> Arc<dyn ProgressCallback>;
}
