//! Raw byte trace log toggled by in-band sentinels
//!
//! Enable from the remote shell with
//! `echo -e '\x3CENABLE_TRZSZ_TRACE_LOG\x3E'` and disable with
//! `echo -e '\x3CDISABLE_TRZSZ_TRACE_LOG\x3E'`. Each logged chunk becomes one
//! `[in]`/`[out]` line followed by the base64 of the raw bytes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use std::borrow::Cow;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub const ENABLE_SENTINEL: &[u8] = b"<ENABLE_TRZSZ_TRACE_LOG>";
pub const DISABLE_SENTINEL: &[u8] = b"<DISABLE_TRZSZ_TRACE_LOG>";

/// Stream a chunk was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// User terminal to child
    Inbound,
    /// Child to user terminal
    Outbound,
}

impl Direction {
    fn tag(self) -> &'static str {
        match self {
            Direction::Inbound => "[in]",
            Direction::Outbound => "[out]",
        }
    }
}

struct TraceFile {
    path: PathBuf,
    file: File,
}

impl TraceFile {
    fn create(dir: &Path) -> io::Result<Self> {
        let path = dir.join(format!("trzsz_{}.log", uuid::Uuid::new_v4().simple()));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)?;
        Ok(Self { path, file })
    }

    fn append(&mut self, buf: &[u8], direction: Direction) -> io::Result<()> {
        writeln!(self.file, "{}{}", direction.tag(), STANDARD.encode(buf))?;
        self.file.flush()?;
        self.file.sync_data()
    }
}

/// Trace log shared by both pumps
pub struct TraceLogger {
    dir: PathBuf,
    file: Mutex<Option<TraceFile>>,
}

impl TraceLogger {
    /// Logger creating its files in `dir`
    pub fn new(dir: PathBuf) -> Self {
        Self {
            dir,
            file: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Path of the open log file
    pub fn path(&self) -> Option<PathBuf> {
        self.file.lock().as_ref().map(|f| f.path.clone())
    }

    /// Log `buf` if enabled and apply sentinel toggles
    ///
    /// Returns the chunk to pass on: outbound sentinels are replaced with a
    /// status message, everything else is returned unchanged.
    pub fn process<'a>(&self, buf: &'a [u8], direction: Direction) -> Cow<'a, [u8]> {
        let mut slot = self.file.lock();

        if let Some(trace) = slot.as_mut() {
            if let Err(e) = trace.append(buf, direction) {
                tracing::debug!("Failed to write trace log: {}", e);
            }
            if !contains(buf, DISABLE_SENTINEL) {
                return Cow::Borrowed(buf);
            }
            let path = slot.take().map(|t| t.path).unwrap_or_default();
            tracing::info!(path = %path.display(), "Trace log closed");
            if direction == Direction::Inbound {
                return Cow::Borrowed(buf);
            }
            let msg = format!("Closed trace log at {}", path.display());
            return Cow::Owned(replace_all(buf, DISABLE_SENTINEL, msg.as_bytes()));
        }

        if direction != Direction::Outbound || !contains(buf, ENABLE_SENTINEL) {
            return Cow::Borrowed(buf);
        }

        let msg = match TraceFile::create(&self.dir) {
            Ok(mut trace) => {
                if let Err(e) = trace.append(buf, direction) {
                    tracing::debug!("Failed to write trace log: {}", e);
                }
                let msg = format!("Writing trace log to {}", trace.path.display());
                tracing::info!(path = %trace.path.display(), "Trace log opened");
                *slot = Some(trace);
                msg
            }
            Err(e) => format!("Create log file error: {}", e),
        };
        Cow::Owned(replace_all(buf, ENABLE_SENTINEL, msg.as_bytes()))
    }
}

/// Decode one trace log line
pub fn decode_entry(line: &str) -> Option<(Direction, Vec<u8>)> {
    let (direction, payload) = if let Some(rest) = line.strip_prefix("[in]") {
        (Direction::Inbound, rest)
    } else if let Some(rest) = line.strip_prefix("[out]") {
        (Direction::Outbound, rest)
    } else {
        return None;
    };
    STANDARD
        .decode(payload.trim_end())
        .ok()
        .map(|bytes| (direction, bytes))
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn replace_all(haystack: &[u8], needle: &[u8], replacement: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(haystack.len() + replacement.len());
    let mut i = 0;
    while i < haystack.len() {
        if haystack[i..].starts_with(needle) {
            out.extend_from_slice(replacement);
            i += needle.len();
        } else {
            out.push(haystack[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn read_entries(path: &Path) -> Vec<(Direction, Vec<u8>)> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|l| decode_entry(l).unwrap())
            .collect()
    }

    #[test]
    fn test_disabled_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TraceLogger::new(dir.path().to_path_buf());
        let out = logger.process(b"hello", Direction::Outbound);
        assert_eq!(&*out, b"hello");
        assert!(!logger.is_enabled());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_inbound_enable_sentinel_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TraceLogger::new(dir.path().to_path_buf());
        logger.process(b"echo <ENABLE_TRZSZ_TRACE_LOG>", Direction::Inbound);
        assert!(!logger.is_enabled());
    }

    #[test]
    fn test_enable_replaces_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TraceLogger::new(dir.path().to_path_buf());
        let out = logger.process(b"<ENABLE_TRZSZ_TRACE_LOG>\r\n", Direction::Outbound);

        let path = logger.path().unwrap();
        assert!(path.starts_with(dir.path()));
        assert_eq!(
            String::from_utf8(out.into_owned()).unwrap(),
            format!("Writing trace log to {}\r\n", path.display())
        );
    }

    #[test]
    fn test_enable_failure_reports_error() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TraceLogger::new(dir.path().join("missing"));
        let out = logger.process(b"<ENABLE_TRZSZ_TRACE_LOG>", Direction::Outbound);
        assert!(out.starts_with(b"Create log file error: "));
        assert!(!logger.is_enabled());
    }

    #[test]
    fn test_entries_reconstruct_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TraceLogger::new(dir.path().to_path_buf());

        let chunks: Vec<(Direction, &[u8])> = vec![
            (Direction::Outbound, &b"$ <ENABLE_TRZSZ_TRACE_LOG>\r\n"[..]),
            (Direction::Inbound, &b"ls\r"[..]),
            (Direction::Outbound, &b"\x1b[0m\x00\xff binary\r\n"[..]),
            (Direction::Inbound, &b"echo <DISABLE_TRZSZ_TRACE_LOG>\r"[..]),
        ];
        for (direction, chunk) in &chunks {
            logger.process(chunk, *direction);
        }
        assert!(!logger.is_enabled());

        // Nothing after the toggle point is recorded
        logger.process(b"after", Direction::Outbound);

        let path = fs::read_dir(dir.path())
            .unwrap()
            .next()
            .unwrap()
            .unwrap()
            .path();
        let expected: Vec<(Direction, Vec<u8>)> =
            chunks.iter().map(|(d, c)| (*d, c.to_vec())).collect();
        assert_eq!(read_entries(&path), expected);
    }

    #[test]
    fn test_outbound_disable_replaces_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TraceLogger::new(dir.path().to_path_buf());
        logger.process(b"<ENABLE_TRZSZ_TRACE_LOG>", Direction::Outbound);
        let path = logger.path().unwrap();

        let out = logger.process(b"<DISABLE_TRZSZ_TRACE_LOG>\r\n", Direction::Outbound);
        assert_eq!(
            String::from_utf8(out.into_owned()).unwrap(),
            format!("Closed trace log at {}\r\n", path.display())
        );
        assert!(!logger.is_enabled());
    }

    #[test]
    fn test_inbound_disable_passes_through() {
        let dir = tempfile::tempdir().unwrap();
        let logger = TraceLogger::new(dir.path().to_path_buf());
        logger.process(b"<ENABLE_TRZSZ_TRACE_LOG>", Direction::Outbound);

        let out = logger.process(b"<DISABLE_TRZSZ_TRACE_LOG>", Direction::Inbound);
        assert_eq!(&*out, DISABLE_SENTINEL);
        assert!(!logger.is_enabled());
    }
}
