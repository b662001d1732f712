//! Process signal bridge
//!
//! SIGTERM is forwarded to the child. SIGINT never reaches the default
//! handler: it cancels the active transfer, if any, and is otherwise ignored
//! (in raw mode Ctrl+C arrives as a byte, not a signal).

use anyhow::{Context, Result};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::sync::Arc;
use tokio::signal::unix::{signal as listen, Signal as SignalStream, SignalKind};
use tokio::task::JoinHandle;

use crate::wrap::context::SessionContext;

/// Registered signal listeners, not yet running
pub struct SignalBridge {
    terminate: SignalStream,
    interrupt: SignalStream,
}

impl SignalBridge {
    /// Install the handlers; from here on neither signal kills the process
    pub fn register() -> Result<Self> {
        Ok(Self {
            terminate: listen(SignalKind::terminate()).context("Failed to listen for SIGTERM")?,
            interrupt: listen(SignalKind::interrupt()).context("Failed to listen for SIGINT")?,
        })
    }

    /// Spawn the listener tasks on the current runtime
    pub fn spawn(self, ctx: Arc<SessionContext>, child_pid: u32) -> Vec<JoinHandle<()>> {
        let Self {
            mut terminate,
            mut interrupt,
        } = self;

        let terminate_task = tokio::spawn(async move {
            if terminate.recv().await.is_some() {
                tracing::info!("SIGTERM received, terminating child");
                if let Err(e) = forward_signal_to_child(child_pid, Signal::SIGTERM) {
                    tracing::warn!("{:#}", e);
                }
            }
        });

        let interrupt_task = tokio::spawn(async move {
            while interrupt.recv().await.is_some() {
                if ctx.cancel_active_transfer() {
                    tracing::info!("SIGINT received, transfer cancelled");
                }
            }
        });

        vec![terminate_task, interrupt_task]
    }
}

/// Forward a signal to the child process
pub fn forward_signal_to_child(child_pid: u32, sig: Signal) -> Result<()> {
    if child_pid > 0 {
        signal::kill(Pid::from_raw(child_pid as i32), sig).context("Failed to forward signal")?;
    }
    Ok(())
}
