//! Transfer handoff: owns the active-transfer slot for one dispatch flow
//!
//! A trigger publishes a fresh transfer before the outbound pump reads its
//! next chunk, so every byte after the trigger reaches the transfer. The
//! flow itself runs on its own thread; when it returns (success, failure or
//! cancel) the transfer is retracted and plain relaying resumes.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::transfer::{
    check_duplicate_names, check_path_writable, check_paths_readable, PathPicker,
    ProgressCallback, ProgressFactory, Transfer, TransferConfig, TransferError, TransferFactory,
};
use crate::wrap::context::{ChildInput, ResizeSubscription, SessionContext};
use crate::wrap::drag::DragAutomator;
use crate::wrap::trigger::{TransferMode, TriggerRecord};

/// External collaborators a session hands transfers to
#[derive(Clone)]
pub struct Collaborators {
    pub transfers: Arc<dyn TransferFactory>,
    pub picker: Arc<dyn PathPicker>,
    pub progress: Arc<dyn ProgressFactory>,
}

/// Dispatches one flow per accepted trigger
pub struct HandoffController {
    ctx: Arc<SessionContext>,
    child_input: ChildInput,
    collaborators: Collaborators,
    drag: Option<Arc<DragAutomator>>,
}

impl HandoffController {
    pub fn new(
        ctx: Arc<SessionContext>,
        child_input: ChildInput,
        collaborators: Collaborators,
        drag: Option<Arc<DragAutomator>>,
    ) -> Self {
        Self {
            ctx,
            child_input,
            collaborators,
            drag,
        }
    }

    /// Publish a new transfer and run its flow on a dedicated thread
    ///
    /// If another transfer still owns the slot, the new flow waits for its
    /// retraction before publishing, so flows never overlap.
    pub fn start(self: &Arc<Self>, record: TriggerRecord) -> JoinHandle<()> {
        let transfer = self
            .collaborators
            .transfers
            .create(self.child_input.clone());
        let published = self.ctx.try_publish(Arc::clone(&transfer));
        let controller = Arc::clone(self);

        thread::spawn(move || {
            let _published = match published {
                Some(guard) => guard,
                None => {
                    tracing::debug!("Waiting for the previous transfer to finish");
                    controller.ctx.publish_when_free(Arc::clone(&transfer))
                }
            };
            controller.dispatch(transfer.as_ref(), record);
        })
    }

    /// Run the flow for `record`, reporting any failure exactly once
    pub fn dispatch(&self, transfer: &dyn Transfer, record: TriggerRecord) {
        tracing::info!(mode = ?record.mode, remote_is_windows = record.remote_is_windows, "Transfer started");

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| match record.mode {
            TransferMode::Download => self.download_files(transfer, record.remote_is_windows),
            TransferMode::Upload => self.upload_files(transfer, false, record.remote_is_windows),
            TransferMode::UploadDirectory => {
                self.upload_files(transfer, true, record.remote_is_windows)
            }
        }));

        match outcome {
            Ok(Ok(())) => tracing::info!("Transfer finished"),
            Ok(Err(e)) => transfer.client_error(&e),
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                tracing::warn!("Transfer panicked: {}", message);
                transfer.client_error(&TransferError::Panic(message));
            }
        }
    }

    fn download_files(
        &self,
        transfer: &dyn Transfer,
        remote_is_windows: bool,
    ) -> Result<(), TransferError> {
        let Some(path) = self.collaborators.picker.choose_save_directory()? else {
            return transfer.send_action(false, remote_is_windows);
        };
        check_path_writable(&path)?;

        transfer.send_action(true, remote_is_windows)?;
        let config = transfer.recv_config()?;

        let (progress, _subscription) = self.progress_for(&config);
        let local_names = transfer.recv_files(&path, progress.as_deref())?;

        transfer.client_exit(&format!(
            "Saved {} to {}",
            local_names.join(", "),
            path.display()
        ))
    }

    fn upload_files(
        &self,
        transfer: &dyn Transfer,
        directory: bool,
        remote_is_windows: bool,
    ) -> Result<(), TransferError> {
        let Some(paths) = self.choose_upload_paths(directory)? else {
            return transfer.send_action(false, remote_is_windows);
        };
        let files = check_paths_readable(&paths, directory)?;

        transfer.send_action(true, remote_is_windows)?;
        let config = transfer.recv_config()?;
        if config.overwrite {
            check_duplicate_names(&files)?;
        }

        let (progress, _subscription) = self.progress_for(&config);
        let remote_names = transfer.send_files(&files, progress.as_deref())?;

        transfer.client_exit(&format!("Received {}", remote_names.join(", ")))
    }

    /// Dropped files take precedence over the picker
    fn choose_upload_paths(&self, directory: bool) -> Result<Option<Vec<PathBuf>>, TransferError> {
        if let Some(batch) = self.drag.as_ref().and_then(|d| d.reset_drag_files()) {
            return Ok(Some(batch.paths));
        }
        self.collaborators.picker.choose_upload_paths(directory)
    }

    /// Progress indicator subscribed to width changes, unless the remote is quiet
    fn progress_for(
        &self,
        config: &TransferConfig,
    ) -> (Option<Arc<dyn ProgressCallback>>, Option<ResizeSubscription>) {
        if config.quiet {
            return (None, None);
        }
        let tmux_pane_columns = config
            .tmux_pane_width
            .and_then(|w| u16::try_from(w).ok())
            .filter(|&w| w > 0);
        let progress = self
            .collaborators
            .progress
            .create(self.ctx.columns(), tmux_pane_columns);

        let subscriber = Arc::clone(&progress);
        let subscription = self
            .ctx
            .subscribe_resize(move |columns| subscriber.set_terminal_columns(columns));
        (Some(progress), Some(subscription))
    }
}
