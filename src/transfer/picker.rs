//! File picker backed by the desktop's `zenity` dialog

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Command;

use super::{PathPicker, TransferError};
use crate::config::Settings;

const DIALOG_PROGRAM: &str = "zenity";

/// Picker honouring the configured default paths
pub struct DialogPicker {
    settings: Settings,
}

impl DialogPicker {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Run the dialog; `Ok(None)` when the user cancelled
    fn run_dialog(&self, args: &[String]) -> Result<Option<Vec<PathBuf>>, TransferError> {
        let output = Command::new(DIALOG_PROGRAM)
            .args(args)
            .output()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => TransferError::Picker(format!(
                    "{} not found; set DefaultDownloadPath or use drag upload",
                    DIALOG_PROGRAM
                )),
                _ => TransferError::Picker(e.to_string()),
            })?;

        // Exit status 1 is the dialog's cancel button
        match output.status.code() {
            Some(0) => {}
            Some(1) => return Ok(None),
            _ => {
                return Err(TransferError::Picker(
                    String::from_utf8_lossy(&output.stderr).trim().to_string(),
                ))
            }
        }

        let paths: Vec<PathBuf> = String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(PathBuf::from)
            .collect();
        if paths.is_empty() {
            return Ok(None);
        }
        Ok(Some(paths))
    }
}

impl PathPicker for DialogPicker {
    fn choose_save_directory(&self) -> Result<Option<PathBuf>, TransferError> {
        if let Some(path) = &self.settings.default_download_path {
            return Ok(Some(path.clone()));
        }
        let args = dialog_args("Choose a folder to save file(s)", true, false, None);
        Ok(self
            .run_dialog(&args)?
            .and_then(|paths| paths.into_iter().next()))
    }

    fn choose_upload_paths(&self, directory: bool) -> Result<Option<Vec<PathBuf>>, TransferError> {
        let title = if directory {
            "Choose some folders to send"
        } else {
            "Choose some files to send"
        };
        let args = dialog_args(
            title,
            directory,
            true,
            self.settings.default_upload_path.as_ref(),
        );
        self.run_dialog(&args)
    }
}

fn dialog_args(
    title: &str,
    directory: bool,
    multiple: bool,
    start: Option<&PathBuf>,
) -> Vec<String> {
    let mut args = vec![
        "--file-selection".to_string(),
        format!("--title={}", title),
    ];
    if directory {
        args.push("--directory".to_string());
    }
    if multiple {
        args.push("--multiple".to_string());
        args.push("--separator=\n".to_string());
    }
    if let Some(start) = start {
        // Trailing separator opens the folder instead of preselecting it
        args.push(format!("--filename={}/", start.display()));
    }
    args
}
