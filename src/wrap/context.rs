//! Session-scoped shared state
//!
//! Everything both pumps, the handoff tasks and the signal bridge touch lives
//! here: the single active-transfer slot, the interrupt flags and the terminal
//! width with its resize subscriber.

use parking_lot::{Condvar, Mutex};
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use crate::transfer::Transfer;

/// Shared handle to the child's input stream
///
/// Written by the inbound pump, the drag automator and the active transfer.
/// Closing drops the underlying writer, which signals EOF to the child.
#[derive(Clone)]
pub struct ChildInput {
    inner: Arc<Mutex<Option<Box<dyn Write + Send>>>>,
}

impl ChildInput {
    pub fn new(writer: Box<dyn Write + Send>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(writer))),
        }
    }

    /// Write all bytes and flush
    pub fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut guard = self.inner.lock();
        let writer = guard
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "child input closed"))?;
        writer.write_all(buf)?;
        writer.flush()
    }

    /// Close the child's input
    pub fn close(&self) {
        self.inner.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().is_none()
    }
}

type ResizeCallback = Box<dyn Fn(u16) + Send + Sync>;

/// Session-scoped context shared by every task of one wrapped session
pub struct SessionContext {
    /// The single active-transfer slot
    active: Mutex<Option<Arc<dyn Transfer>>>,
    /// Signalled whenever the slot is retracted
    slot_freed: Condvar,
    /// Set while synthetic keystrokes are injected; suppresses terminal output
    interrupting: AtomicBool,
    /// Swallow the echo of the next injected command line
    skip_echoed_command: AtomicBool,
    /// Current terminal column count
    columns: AtomicU16,
    /// Live resize subscriber (progress indicator)
    on_resize: Mutex<Option<ResizeCallback>>,
}

impl SessionContext {
    pub fn new(columns: u16) -> Self {
        Self {
            active: Mutex::new(None),
            slot_freed: Condvar::new(),
            interrupting: AtomicBool::new(false),
            skip_echoed_command: AtomicBool::new(false),
            columns: AtomicU16::new(columns),
            on_resize: Mutex::new(None),
        }
    }

    /// Snapshot of the active transfer, if one is published
    pub fn active_transfer(&self) -> Option<Arc<dyn Transfer>> {
        self.active.lock().clone()
    }

    pub fn has_active_transfer(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Publish `transfer` if the slot is empty
    ///
    /// Returns a guard that retracts the transfer when dropped, or `None` if
    /// another transfer currently owns the slot.
    pub fn try_publish(self: &Arc<Self>, transfer: Arc<dyn Transfer>) -> Option<PublishedTransfer> {
        let mut slot = self.active.lock();
        if slot.is_some() {
            return None;
        }
        *slot = Some(transfer);
        Some(PublishedTransfer {
            ctx: Arc::clone(self),
        })
    }

    /// Block until the slot is free, then publish `transfer`
    pub fn publish_when_free(self: &Arc<Self>, transfer: Arc<dyn Transfer>) -> PublishedTransfer {
        let mut slot = self.active.lock();
        while slot.is_some() {
            self.slot_freed.wait(&mut slot);
        }
        *slot = Some(transfer);
        PublishedTransfer {
            ctx: Arc::clone(self),
        }
    }

    fn retract(&self) {
        let mut slot = self.active.lock();
        *slot = None;
        self.slot_freed.notify_all();
    }

    /// Cancel the active transfer, if any
    ///
    /// Returns true if a transfer was cancelled.
    pub fn cancel_active_transfer(&self) -> bool {
        match self.active_transfer() {
            Some(transfer) => {
                transfer.stop_transferring_files();
                true
            }
            None => false,
        }
    }

    pub fn is_interrupting(&self) -> bool {
        self.interrupting.load(Ordering::SeqCst)
    }

    pub fn set_interrupting(&self, value: bool) {
        self.interrupting.store(value, Ordering::SeqCst);
    }

    /// Arm the one-shot echo suppression for an injected command line
    pub fn arm_skip_echoed_command(&self) {
        self.skip_echoed_command.store(true, Ordering::SeqCst);
    }

    /// Consume the echo suppression flag; true if it was armed
    pub fn take_skip_echoed_command(&self) -> bool {
        self.skip_echoed_command.swap(false, Ordering::SeqCst)
    }

    pub fn columns(&self) -> u16 {
        self.columns.load(Ordering::Relaxed)
    }

    /// Record a new terminal width and notify the resize subscriber
    pub fn set_columns(&self, columns: u16) {
        self.columns.store(columns, Ordering::Relaxed);
        if let Some(callback) = self.on_resize.lock().as_ref() {
            callback(columns);
        }
    }

    /// Subscribe to width changes until the returned guard is dropped
    pub fn subscribe_resize(
        self: &Arc<Self>,
        callback: impl Fn(u16) + Send + Sync + 'static,
    ) -> ResizeSubscription {
        *self.on_resize.lock() = Some(Box::new(callback));
        ResizeSubscription {
            ctx: Arc::clone(self),
        }
    }
}

/// Retracts the published transfer on drop, including on unwind
pub struct PublishedTransfer {
    ctx: Arc<SessionContext>,
}

impl Drop for PublishedTransfer {
    fn drop(&mut self) {
        self.ctx.retract();
    }
}

/// Detaches the resize subscriber on drop
pub struct ResizeSubscription {
    ctx: Arc<SessionContext>,
}

impl Drop for ResizeSubscription {
    fn drop(&mut self) {
        self.ctx.on_resize.lock().take();
    }
}
