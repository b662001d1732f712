//! trzsz-relay: wraps a terminal session and intercepts in-band trz/tsz transfers
//!
//! The [`wrap`] module owns the interception layer (stream pumps, trigger
//! detection, transfer handoff, drag-upload automation, trace log and signal
//! bridge). The [`transfer`] module defines the collaborators the layer drives
//! and ships the built-in implementations used by the `trzsz` binary.

pub mod config;
pub mod terminal;
pub mod transfer;
pub mod wrap;

/// Version reported to the remote side and by `--version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
