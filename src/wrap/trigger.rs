//! Detection of the in-band transfer signature in child output
//!
//! The remote `trz`/`tsz` announce a transfer by printing
//! `::TRZSZ:TRANSFER:<MODE>:<MAJOR>.<MINOR>.<PATCH>[:<SUFFIX>]`.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::bytes::Regex;

use crate::wrap::unique_id::UniqueIdCache;

/// Fixed prefix of the transfer signature
pub const SIGNATURE: &[u8] = b"::TRZSZ:TRANSFER:";

/// Chunks shorter than this cannot hold a complete signature
const MIN_CHUNK_LEN: usize = 24;

/// Suffixes at least this long are dedup ids
const UNIQUE_ID_MIN_LEN: usize = 8;

/// Suffix announcing a Windows remote
const WINDOWS_SUFFIX: &[u8] = b":1";

/// Marker written over the matched `TRZSZ` once this client consumed it
pub const CONSUMED_MARKER: &[u8] = b"TRZSZRS";

static SIGNATURE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^::TRZSZ:TRANSFER:([SRD]):(\d+\.\d+\.\d+)(:[0-9A-Za-z_]+)?").unwrap()
});

/// Direction of the announced transfer, from the local point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferMode {
    /// Remote sends (`S`); files are saved locally
    Download,
    /// Remote receives files (`R`)
    Upload,
    /// Remote receives directories (`D`)
    UploadDirectory,
}

impl TransferMode {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'S' => Some(Self::Download),
            b'R' => Some(Self::Upload),
            b'D' => Some(Self::UploadDirectory),
            _ => None,
        }
    }
}

/// Parsed trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerRecord {
    pub mode: TransferMode,
    pub remote_is_windows: bool,
}

/// A trigger found in a chunk, with the offset of its signature
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerMatch {
    pub record: TriggerRecord,
    pub offset: usize,
}

/// Finds transfer signatures and filters out repeats by unique id
#[derive(Default)]
pub struct TriggerDetector {
    unique_ids: Mutex<UniqueIdCache>,
}

impl TriggerDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Detect a trigger in one outbound chunk
    ///
    /// Only the last signature in the chunk is considered. A suffix of eight
    /// or more characters is a unique id: a repeated id yields `None`.
    pub fn detect(&self, chunk: &[u8]) -> Option<TriggerMatch> {
        if chunk.len() < MIN_CHUNK_LEN {
            return None;
        }
        let offset = rfind(chunk, SIGNATURE)?;
        let caps = SIGNATURE_PATTERN.captures(&chunk[offset..])?;
        let mode = TransferMode::from_byte(caps[1][0])?;

        let suffix = caps.get(3).map(|m| m.as_bytes()).unwrap_or_default();
        if suffix.len() >= UNIQUE_ID_MIN_LEN {
            let id = String::from_utf8_lossy(suffix);
            if !self.unique_ids.lock().insert(&id) {
                tracing::debug!(id = %id, "Ignoring repeated transfer trigger");
                return None;
            }
        }

        Some(TriggerMatch {
            record: TriggerRecord {
                mode,
                remote_is_windows: suffix == WINDOWS_SUFFIX,
            },
            offset,
        })
    }

    /// Number of remembered unique ids
    pub fn unique_id_count(&self) -> usize {
        self.unique_ids.lock().len()
    }
}

/// Copy of `chunk` with the signature at `offset` marked as consumed
pub fn mark_consumed(chunk: &[u8], offset: usize) -> Vec<u8> {
    // Skip the leading "::" to land on "TRZSZ"
    let start = offset + 2;
    let end = start + b"TRZSZ".len();
    let mut out = Vec::with_capacity(chunk.len() + CONSUMED_MARKER.len());
    out.extend_from_slice(&chunk[..start]);
    out.extend_from_slice(CONSUMED_MARKER);
    out.extend_from_slice(&chunk[end..]);
    out
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
