//! In-memory collaborators for unit tests

use parking_lot::Mutex;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::*;

/// Writer whose bytes can be inspected from another thread
#[derive(Clone, Default)]
pub(crate) struct SharedBuf(pub Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuf {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Poll `cond` until it holds or `timeout` elapses
pub(crate) fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Calls observed by a [`RecordingTransfer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Action { confirm: bool, remote_is_windows: bool },
    RecvConfig,
    RecvFiles(PathBuf),
    SendFiles(Vec<String>),
    Exit(String),
    Error(String),
}

/// Transfer double that records calls and blocks file flows until released
pub(crate) struct RecordingTransfer {
    pub calls: Mutex<Vec<Call>>,
    pub received: Mutex<Vec<u8>>,
    pub config: Mutex<TransferConfig>,
    stopped: AtomicBool,
    hold: AtomicBool,
    fail_action: AtomicBool,
    panic_on_config: AtomicBool,
}

impl RecordingTransfer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            received: Mutex::new(Vec::new()),
            config: Mutex::new(TransferConfig::default()),
            stopped: AtomicBool::new(false),
            hold: AtomicBool::new(false),
            fail_action: AtomicBool::new(false),
            panic_on_config: AtomicBool::new(false),
        })
    }

    /// Make file flows block until stopped
    pub fn hold_until_stopped(self: &Arc<Self>) -> Arc<Self> {
        self.hold.store(true, Ordering::SeqCst);
        self.clone()
    }

    pub fn fail_action(self: &Arc<Self>) -> Arc<Self> {
        self.fail_action.store(true, Ordering::SeqCst);
        self.clone()
    }

    pub fn panic_on_config(self: &Arc<Self>) -> Arc<Self> {
        self.panic_on_config.store(true, Ordering::SeqCst);
        self.clone()
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn wait_if_held(&self) -> Result<(), TransferError> {
        while self.hold.load(Ordering::SeqCst) {
            if self.was_stopped() {
                return Err(TransferError::Stopped);
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        Ok(())
    }
}

impl Transfer for RecordingTransfer {
    fn send_action(&self, confirm: bool, remote_is_windows: bool) -> Result<(), TransferError> {
        self.calls.lock().push(Call::Action {
            confirm,
            remote_is_windows,
        });
        if self.fail_action.load(Ordering::SeqCst) {
            return Err(TransferError::Protocol("action rejected".to_string()));
        }
        Ok(())
    }

    fn recv_config(&self) -> Result<TransferConfig, TransferError> {
        self.calls.lock().push(Call::RecvConfig);
        if self.panic_on_config.load(Ordering::SeqCst) {
            panic!("config exploded");
        }
        Ok(self.config.lock().clone())
    }

    fn recv_files(
        &self,
        dir: &Path,
        _progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<String>, TransferError> {
        self.calls.lock().push(Call::RecvFiles(dir.to_path_buf()));
        self.wait_if_held()?;
        Ok(vec!["a.txt".to_string(), "b.txt".to_string()])
    }

    fn send_files(
        &self,
        files: &[SourceFile],
        _progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<String>, TransferError> {
        let names: Vec<String> = files.iter().map(|f| f.display_name()).collect();
        self.calls.lock().push(Call::SendFiles(names.clone()));
        self.wait_if_held()?;
        Ok(names)
    }

    fn client_exit(&self, message: &str) -> Result<(), TransferError> {
        self.calls.lock().push(Call::Exit(message.to_string()));
        Ok(())
    }

    fn client_error(&self, err: &TransferError) {
        self.calls.lock().push(Call::Error(err.to_string()));
    }

    fn stop_transferring_files(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn add_received_data(&self, buf: &[u8]) {
        self.received.lock().extend_from_slice(buf);
    }
}

/// Factory handing out prepared transfers in order, then fresh ones
#[derive(Default)]
pub(crate) struct QueueFactory {
    pub prepared: Mutex<Vec<Arc<RecordingTransfer>>>,
    pub created: Mutex<Vec<Arc<RecordingTransfer>>>,
}

impl QueueFactory {
    pub fn with(transfers: Vec<Arc<RecordingTransfer>>) -> Arc<Self> {
        Arc::new(Self {
            prepared: Mutex::new(transfers),
            created: Mutex::new(Vec::new()),
        })
    }

    pub fn created(&self) -> Vec<Arc<RecordingTransfer>> {
        self.created.lock().clone()
    }
}

impl TransferFactory for QueueFactory {
    fn create(&self, _child_input: ChildInput) -> Arc<dyn Transfer> {
        let mut prepared = self.prepared.lock();
        let transfer = if prepared.is_empty() {
            RecordingTransfer::new()
        } else {
            prepared.remove(0)
        };
        self.created.lock().push(transfer.clone());
        transfer
    }
}

/// Picker returning fixed answers
pub(crate) struct FixedPicker {
    pub save_dir: Option<PathBuf>,
    pub upload: Option<Vec<PathBuf>>,
}

impl PathPicker for FixedPicker {
    fn choose_save_directory(&self) -> Result<Option<PathBuf>, TransferError> {
        Ok(self.save_dir.clone())
    }

    fn choose_upload_paths(&self, _directory: bool) -> Result<Option<Vec<PathBuf>>, TransferError> {
        Ok(self.upload.clone())
    }
}

/// Progress double counting resize notifications
#[derive(Default)]
pub(crate) struct NullProgress {
    pub columns: Mutex<Vec<u16>>,
}

impl ProgressCallback for NullProgress {
    fn on_num(&self, _num: usize) {}
    fn on_name(&self, _name: &str) {}
    fn on_size(&self, _size: u64) {}
    fn on_step(&self, _step: u64) {}
    fn on_done(&self) {}
    fn set_terminal_columns(&self, columns: u16) {
        self.columns.lock().push(columns);
    }
}

#[derive(Default)]
pub(crate) struct NullProgressFactory {
    pub created: Mutex<Vec<Arc<NullProgress>>>,
}

impl ProgressFactory for NullProgressFactory {
    fn create(&self, _columns: u16, _tmux_pane_columns: Option<u16>) -> Arc<dyn ProgressCallback> {
        let progress = Arc::new(NullProgress::default());
        self.created.lock().push(progress.clone());
        progress
    }
}
