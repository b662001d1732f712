//! PTY runner for a wrapped session
//!
//! Spawns the command on a pseudo-terminal, starts both pumps of the
//! [`SessionRouter`] plus the resize poller and the signal bridge, and waits
//! for the child to exit.

use anyhow::{Context, Result};
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::terminal::get_terminal_size;
use crate::wrap::context::{ChildInput, SessionContext};
use crate::wrap::handoff::Collaborators;
use crate::wrap::router::{RouterOptions, SessionRouter};
use crate::wrap::signals::SignalBridge;

/// Interval of the terminal size poll
const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// PTY runner configuration
pub struct PtyRunnerConfig {
    /// Command to run
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
    /// PTY size used when the local terminal size is unknown
    pub rows: u16,
    pub cols: u16,
    pub router: RouterOptions,
}

impl Default for PtyRunnerConfig {
    fn default() -> Self {
        Self {
            command: String::new(),
            args: Vec::new(),
            rows: 24,
            cols: 80,
            router: RouterOptions::default(),
        }
    }
}

/// Runs one wrapped session
pub struct PtyRunner {
    config: PtyRunnerConfig,
    collaborators: Collaborators,
}

impl PtyRunner {
    pub fn new(config: PtyRunnerConfig, collaborators: Collaborators) -> Self {
        Self {
            config,
            collaborators,
        }
    }

    /// Run the wrapped command and return its exit code
    ///
    /// Fails only if the session cannot be set up, e.g. the command cannot be
    /// spawned.
    pub async fn run(self) -> Result<i32> {
        let (rows, cols) = get_terminal_size().unwrap_or((self.config.rows, self.config.cols));

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .context("Failed to open PTY")?;

        let mut cmd = CommandBuilder::new(&self.config.command);
        cmd.args(&self.config.args);
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }

        let mut child = pair
            .slave
            .spawn_command(cmd)
            .with_context(|| format!("Failed to spawn {}", self.config.command))?;
        let child_pid = child.process_id().unwrap_or(0);
        // The child holds its own copy of the slave side
        drop(pair.slave);

        tracing::debug!("Spawned {} with PID {}", self.config.command, child_pid);

        let master_reader = pair
            .master
            .try_clone_reader()
            .context("Failed to clone PTY reader")?;
        let master_writer = pair
            .master
            .take_writer()
            .context("Failed to take PTY writer")?;

        let ctx = Arc::new(SessionContext::new(cols));
        let router = Arc::new(SessionRouter::new(
            ctx.clone(),
            ChildInput::new(master_writer),
            self.collaborators,
            self.config.router,
        ));

        let signal_tasks = SignalBridge::register()?.spawn(ctx.clone(), child_pid);

        let running = Arc::new(AtomicBool::new(true));

        // Thread: child output -> terminal
        let router_out = router.clone();
        let output_thread = thread::spawn(move || {
            router_out.pump_output(master_reader, std::io::stdout());
        });

        // Thread: terminal input -> child. Left behind at exit if stdin blocks.
        let router_in = router.clone();
        thread::spawn(move || {
            router_in.pump_input(std::io::stdin());
        });

        // Thread: poll for terminal size changes instead of handling SIGWINCH
        let running_resize = running.clone();
        let ctx_resize = ctx.clone();
        let pty_master = pair.master;
        let resize_thread = thread::spawn(move || {
            let mut last_size: Option<(u16, u16)> = get_terminal_size();

            while running_resize.load(Ordering::Relaxed) {
                thread::sleep(RESIZE_POLL_INTERVAL);

                let current_size = get_terminal_size();
                if current_size != last_size {
                    if let Some((rows, cols)) = current_size {
                        if let Err(e) = pty_master.resize(PtySize {
                            rows,
                            cols,
                            pixel_width: 0,
                            pixel_height: 0,
                        }) {
                            tracing::debug!("Failed to resize PTY: {}", e);
                        }
                        ctx_resize.set_columns(cols);
                    }
                    last_size = current_size;
                }
            }
        });

        let exit_status = tokio::task::spawn_blocking(move || child.wait())
            .await
            .context("Child wait task failed")?
            .context("Failed to wait for child")?;
        tracing::debug!("Child exited with {:?}", exit_status);

        running.store(false, Ordering::Relaxed);
        for task in signal_tasks {
            task.abort();
        }

        tokio::task::spawn_blocking(move || {
            join_thread_with_timeout(output_thread, Duration::from_secs(1));
            join_thread_with_timeout(resize_thread, Duration::from_secs(1));
        })
        .await
        .context("Shutdown task failed")?;

        Ok(exit_status.exit_code() as i32)
    }
}

/// Join a thread with a timeout, abandoning it if it doesn't finish in time
fn join_thread_with_timeout<T>(handle: JoinHandle<T>, timeout: Duration) {
    let start = Instant::now();
    loop {
        if handle.is_finished() {
            let _ = handle.join();
            return;
        }
        if start.elapsed() >= timeout {
            tracing::debug!("Thread join timed out, abandoning thread");
            return;
        }
        thread::sleep(Duration::from_millis(10));
    }
}
