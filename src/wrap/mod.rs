//! Transparent session wrapping
//!
//! Relays a child process through a PTY and hands the session over to a
//! local file transfer whenever the remote side prints a transfer trigger.

pub mod context;
pub mod drag;
pub mod handoff;
pub mod router;
pub mod runner;
pub mod signals;
pub mod trace_log;
pub mod trigger;
pub mod unique_id;

pub use context::{ChildInput, PublishedTransfer, ResizeSubscription, SessionContext};
pub use drag::{DragAutomator, DragBatch, DragTimings};
pub use handoff::{Collaborators, HandoffController};
pub use router::{RouterOptions, SessionRouter};
pub use runner::{PtyRunner, PtyRunnerConfig};
pub use signals::SignalBridge;
pub use trace_log::{Direction, TraceLogger};
pub use trigger::{TransferMode, TriggerDetector, TriggerMatch, TriggerRecord};
pub use unique_id::UniqueIdCache;
