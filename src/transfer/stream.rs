//! Line-oriented transfer over the child's input and the receive buffer
//!
//! Messages are `#TYPE:payload` lines. String payloads are base64 so they
//! survive the terminal unchanged; integers are plain decimal.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{
    ProgressCallback, ReceiveBuffer, SourceFile, Transfer, TransferConfig, TransferError,
    TransferFactory,
};
use crate::wrap::ChildInput;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Name announcement for one received entry
#[derive(Debug, Deserialize)]
struct NameEntry {
    path_name: Vec<String>,
    #[serde(default)]
    is_dir: bool,
}

/// Built-in [`Transfer`] implementation
pub struct StreamTransfer {
    child_input: ChildInput,
    buffer: ReceiveBuffer,
    config: Mutex<TransferConfig>,
    remote_is_windows: AtomicBool,
    timeout: Duration,
    chunk_size: usize,
}

impl StreamTransfer {
    pub fn new(child_input: ChildInput, timeout: Duration) -> Self {
        Self {
            child_input,
            buffer: ReceiveBuffer::new(),
            config: Mutex::new(TransferConfig::default()),
            remote_is_windows: AtomicBool::new(false),
            timeout,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    fn newline(&self) -> &'static str {
        if self.remote_is_windows.load(Ordering::Relaxed) {
            "!\n"
        } else {
            "\n"
        }
    }

    fn send_line(&self, typ: &str, payload: &str) -> Result<(), TransferError> {
        let line = format!("#{}:{}{}", typ, payload, self.newline());
        self.child_input.write_all(line.as_bytes())?;
        Ok(())
    }

    fn send_string(&self, typ: &str, value: &str) -> Result<(), TransferError> {
        self.send_line(typ, &STANDARD.encode(value))
    }

    fn send_integer(&self, typ: &str, value: u64) -> Result<(), TransferError> {
        self.send_line(typ, &value.to_string())
    }

    /// Read the next `#TYPE:payload` line and check its type
    fn recv_line(&self, expected: &str) -> Result<String, TransferError> {
        loop {
            let raw = self.buffer.read_line(self.timeout).map_err(|e| match e {
                TransferError::Timeout(_) => TransferError::Timeout(expected.to_string()),
                other => other,
            })?;
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\r', '!']);
            // Skip terminal noise before the message marker
            let Some(start) = line.rfind('#') else {
                continue;
            };
            let Some((typ, payload)) = line[start + 1..].split_once(':') else {
                continue;
            };
            if typ.eq_ignore_ascii_case("FAIL") {
                return Err(TransferError::Remote(decode_string(payload)?));
            }
            if typ != expected {
                return Err(TransferError::Protocol(format!(
                    "expected {} but got {}",
                    expected, typ
                )));
            }
            return Ok(payload.to_string());
        }
    }

    fn recv_string(&self, expected: &str) -> Result<String, TransferError> {
        decode_string(&self.recv_line(expected)?)
    }

    fn recv_integer(&self, expected: &str) -> Result<u64, TransferError> {
        let payload = self.recv_line(expected)?;
        payload
            .trim()
            .parse()
            .map_err(|_| TransferError::Protocol(format!("invalid {}: {}", expected, payload)))
    }

    fn check_stopped(&self) -> Result<(), TransferError> {
        if self.buffer.is_stopped() {
            return Err(TransferError::Stopped);
        }
        Ok(())
    }

    fn send_file_content(
        &self,
        file: &SourceFile,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<(), TransferError> {
        let size = fs::metadata(&file.path)?.len();
        if let Some(p) = progress {
            p.on_size(size);
        }
        self.send_integer("SIZE", size)?;
        self.expect_ack(size)?;

        let mut reader = File::open(&file.path)?;
        let mut chunk = vec![0u8; self.chunk_size];
        let mut step = 0u64;
        while step < size {
            self.check_stopped()?;
            let n = reader.read(&mut chunk)?;
            if n == 0 {
                return Err(TransferError::Protocol(format!(
                    "{} shrank while sending",
                    file.display_name()
                )));
            }
            self.send_line("DATA", &STANDARD.encode(&chunk[..n]))?;
            self.expect_ack(n as u64)?;
            step += n as u64;
            if let Some(p) = progress {
                p.on_step(step);
            }
        }
        Ok(())
    }

    fn recv_file_content(
        &self,
        path: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<(), TransferError> {
        let size = self.recv_integer("SIZE")?;
        if let Some(p) = progress {
            p.on_size(size);
        }
        self.send_integer("SUCC", size)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut writer = File::create(path)?;
        let mut step = 0u64;
        while step < size {
            self.check_stopped()?;
            let payload = self.recv_line("DATA")?;
            let data = STANDARD
                .decode(payload.trim())
                .map_err(|e| TransferError::Protocol(format!("invalid DATA: {}", e)))?;
            writer.write_all(&data)?;
            step += data.len() as u64;
            self.send_integer("SUCC", data.len() as u64)?;
            if let Some(p) = progress {
                p.on_step(step);
            }
        }
        writer.flush()?;
        Ok(())
    }

    fn expect_ack(&self, expected: u64) -> Result<(), TransferError> {
        let ack = self.recv_integer("SUCC")?;
        if ack != expected {
            return Err(TransferError::Protocol(format!(
                "acknowledged {} but expected {}",
                ack, expected
            )));
        }
        Ok(())
    }
}

impl Transfer for StreamTransfer {
    fn send_action(&self, confirm: bool, remote_is_windows: bool) -> Result<(), TransferError> {
        self.remote_is_windows
            .store(remote_is_windows, Ordering::Relaxed);
        let action = serde_json::json!({
            "lang": "rust",
            "confirm": confirm,
            "version": crate::VERSION,
            "support_dir": true,
            "newline": self.newline(),
        });
        self.send_string("ACT", &action.to_string())
    }

    fn recv_config(&self) -> Result<TransferConfig, TransferError> {
        let json = self.recv_string("CFG")?;
        let config: TransferConfig = serde_json::from_str(&json)
            .map_err(|e| TransferError::Protocol(format!("invalid CFG: {}", e)))?;
        *self.config.lock() = config.clone();
        Ok(config)
    }

    fn recv_files(
        &self,
        dir: &Path,
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<String>, TransferError> {
        let overwrite = self.config.lock().overwrite;
        let num = self.recv_integer("NUM")?;
        if let Some(p) = progress {
            p.on_num(num as usize);
        }

        let mut roots: HashMap<String, String> = HashMap::new();
        let mut local_names = Vec::new();
        for _ in 0..num {
            self.check_stopped()?;
            let entry: NameEntry = serde_json::from_str(&self.recv_string("NAME")?)
                .map_err(|e| TransferError::Protocol(format!("invalid NAME: {}", e)))?;
            validate_components(&entry.path_name)?;

            let remote_root = entry.path_name[0].clone();
            let local_root = match roots.get(&remote_root) {
                Some(name) => name.clone(),
                None => {
                    let name = if overwrite {
                        remote_root.clone()
                    } else {
                        unique_name(dir, &remote_root)?
                    };
                    roots.insert(remote_root, name.clone());
                    local_names.push(name.clone());
                    name
                }
            };

            let mut local_path: PathBuf = dir.join(&local_root);
            for component in &entry.path_name[1..] {
                local_path.push(component);
            }
            let mut display = vec![local_root];
            display.extend(entry.path_name[1..].iter().cloned());
            self.send_string("SUCC", &display.join("/"))?;

            if entry.is_dir {
                fs::create_dir_all(&local_path)?;
                continue;
            }
            if let Some(p) = progress {
                p.on_name(&display.join("/"));
            }
            self.recv_file_content(&local_path, progress)?;
        }

        if let Some(p) = progress {
            p.on_done();
        }
        Ok(local_names)
    }

    fn send_files(
        &self,
        files: &[SourceFile],
        progress: Option<&dyn ProgressCallback>,
    ) -> Result<Vec<String>, TransferError> {
        self.send_integer("NUM", files.len() as u64)?;
        if let Some(p) = progress {
            p.on_num(files.iter().filter(|f| !f.is_dir).count());
        }

        let mut remote_names = Vec::new();
        for file in files {
            self.check_stopped()?;
            let name = serde_json::json!({
                "path_name": file.rel_path,
                "is_dir": file.is_dir,
            });
            self.send_string("NAME", &name.to_string())?;
            let remote_name = self.recv_string("SUCC")?;
            if file.rel_path.len() == 1 {
                remote_names.push(remote_name);
            }
            if file.is_dir {
                continue;
            }
            if let Some(p) = progress {
                p.on_name(&file.display_name());
            }
            self.send_file_content(file, progress)?;
        }

        if let Some(p) = progress {
            p.on_done();
        }
        Ok(remote_names)
    }

    fn client_exit(&self, message: &str) -> Result<(), TransferError> {
        self.send_string("EXIT", message)
    }

    fn client_error(&self, err: &TransferError) {
        tracing::warn!(error = %err, "Transfer failed");
        // The remote already knows about failures it reported itself
        if matches!(err, TransferError::Remote(_)) {
            return;
        }
        if let Err(e) = self.send_string("FAIL", &err.to_string()) {
            tracing::debug!("Failed to report transfer error: {}", e);
        }
    }

    fn stop_transferring_files(&self) {
        self.buffer.stop();
    }

    fn add_received_data(&self, buf: &[u8]) {
        self.buffer.push(buf);
    }
}

fn decode_string(payload: &str) -> Result<String, TransferError> {
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| TransferError::Protocol(format!("invalid base64: {}", e)))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Reject names that would escape the target directory
fn validate_components(path_name: &[String]) -> Result<(), TransferError> {
    if path_name.is_empty() {
        return Err(TransferError::Protocol("empty file name".to_string()));
    }
    for component in path_name {
        let mut parts = Path::new(component).components();
        let valid = matches!(parts.next(), Some(Component::Normal(_))) && parts.next().is_none();
        if !valid {
            return Err(TransferError::Protocol(format!(
                "invalid file name: {}",
                component
            )));
        }
    }
    Ok(())
}

/// First of `name`, `name.0`, `name.1`, ... that does not exist in `dir`
fn unique_name(dir: &Path, name: &str) -> Result<String, TransferError> {
    if !dir.join(name).exists() {
        return Ok(name.to_string());
    }
    for i in 0..1000 {
        let candidate = format!("{}.{}", name, i);
        if !dir.join(&candidate).exists() {
            return Ok(candidate);
        }
    }
    Err(TransferError::Path(format!(
        "Fail to assign new file name to {}",
        name
    )))
}

/// Creates [`StreamTransfer`]s
pub struct StreamTransferFactory {
    timeout: Duration,
}

impl StreamTransferFactory {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for StreamTransferFactory {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl TransferFactory for StreamTransferFactory {
    fn create(&self, child_input: ChildInput) -> Arc<dyn Transfer> {
        Arc::new(StreamTransfer::new(child_input, self.timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::testing::SharedBuf;
    use pretty_assertions::assert_eq;

    fn transfer() -> (StreamTransfer, SharedBuf) {
        let sink = SharedBuf::default();
        let input = ChildInput::new(Box::new(sink.clone()));
        (StreamTransfer::new(input, Duration::from_millis(200)), sink)
    }

    fn line(typ: &str, value: &str) -> Vec<u8> {
        format!("#{}:{}\n", typ, STANDARD.encode(value)).into_bytes()
    }

    fn sent_lines(sink: &SharedBuf) -> Vec<String> {
        sink.text().lines().map(str::to_string).collect()
    }

    #[test]
    fn test_send_action() {
        let (transfer, sink) = transfer();
        transfer.send_action(true, false).unwrap();

        let lines = sent_lines(&sink);
        assert_eq!(lines.len(), 1);
        let payload = lines[0].strip_prefix("#ACT:").unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&decode_string(payload).unwrap()).unwrap();
        assert_eq!(json["confirm"], true);
        assert_eq!(json["newline"], "\n");
    }

    #[test]
    fn test_windows_remote_newline() {
        let (transfer, sink) = transfer();
        transfer.send_action(false, true).unwrap();
        assert!(sink.text().ends_with("!\n"));
    }

    #[test]
    fn test_recv_config() {
        let (transfer, _sink) = transfer();
        transfer.add_received_data(b"noise\r\n");
        transfer.add_received_data(&line("CFG", r#"{"quiet":true,"overwrite":true}"#));

        let config = transfer.recv_config().unwrap();
        assert!(config.quiet);
        assert!(config.overwrite);
        assert_eq!(config.tmux_pane_width, None);
    }

    #[test]
    fn test_remote_failure() {
        let (transfer, _sink) = transfer();
        transfer.add_received_data(&line("FAIL", "disk full"));
        let err = transfer.recv_config().unwrap_err();
        assert!(matches!(err, TransferError::Remote(ref m) if m == "disk full"));
    }

    #[test]
    fn test_recv_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("hello.txt"), b"old").unwrap();

        let (transfer, sink) = transfer();
        transfer.add_received_data(b"#NUM:1\n");
        transfer.add_received_data(&line(
            "NAME",
            r#"{"path_name":["hello.txt"],"is_dir":false}"#,
        ));
        transfer.add_received_data(b"#SIZE:5\n");
        transfer.add_received_data(&line("DATA", "hello"));

        let names = transfer.recv_files(dir.path(), None).unwrap();
        assert_eq!(names, vec!["hello.txt.0"]);
        assert_eq!(fs::read(dir.path().join("hello.txt.0")).unwrap(), b"hello");
        assert_eq!(fs::read(dir.path().join("hello.txt")).unwrap(), b"old");

        let lines = sent_lines(&sink);
        assert_eq!(lines[0], format!("#SUCC:{}", STANDARD.encode("hello.txt.0")));
        assert_eq!(lines[1], "#SUCC:5");
        assert_eq!(lines[2], "#SUCC:5");
    }

    #[test]
    fn test_recv_files_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let (transfer, _sink) = transfer();
        transfer.add_received_data(b"#NUM:1\n");
        transfer.add_received_data(&line("NAME", r#"{"path_name":[".."],"is_dir":true}"#));

        let err = transfer.recv_files(dir.path(), None).unwrap_err();
        assert!(matches!(err, TransferError::Protocol(_)));
    }

    #[test]
    fn test_send_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.txt");
        fs::write(&path, b"hello").unwrap();
        let files = vec![SourceFile {
            path,
            rel_path: vec!["x.txt".to_string()],
            is_dir: false,
        }];

        let (transfer, sink) = transfer();
        transfer.add_received_data(&line("SUCC", "x.txt"));
        transfer.add_received_data(b"#SUCC:5\n#SUCC:5\n");

        let names = transfer.send_files(&files, None).unwrap();
        assert_eq!(names, vec!["x.txt"]);

        let lines = sent_lines(&sink);
        assert_eq!(lines[0], "#NUM:1");
        assert!(lines[1].starts_with("#NAME:"));
        assert_eq!(lines[2], "#SIZE:5");
        assert_eq!(lines[3], format!("#DATA:{}", STANDARD.encode("hello")));
    }

    #[test]
    fn test_stop_aborts_pending_read() {
        let (transfer, _sink) = transfer();
        transfer.stop_transferring_files();
        assert!(matches!(
            transfer.recv_config(),
            Err(TransferError::Stopped)
        ));
    }

    #[test]
    fn test_client_error_not_echoed_for_remote_failures() {
        let (transfer, sink) = transfer();
        transfer.client_error(&TransferError::Remote("nope".to_string()));
        assert!(sink.text().is_empty());

        transfer.client_error(&TransferError::Stopped);
        assert_eq!(sent_lines(&sink), vec![format!("#FAIL:{}", STANDARD.encode("Stopped"))]);
    }
}
