use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use trzsz_relay::config::{Config, Settings};
use trzsz_relay::terminal::RawModeGuard;
use trzsz_relay::transfer::{DialogPicker, StreamTransferFactory, TextProgressFactory};
use trzsz_relay::wrap::{Collaborators, PtyRunner, PtyRunnerConfig, RouterOptions};

/// Exit code when the session cannot be started
const SETUP_FAILURE_EXIT_CODE: i32 = 255;

/// Environment variable holding the log filter; logging is off when unset
const LOG_ENV: &str = "TRZSZ_LOG";

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Config::parse_args();

    // Setup logging
    setup_logging();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("trzsz: {:#}", e);
            SETUP_FAILURE_EXIT_CODE
        }
    };
    std::process::exit(code);
}

async fn run(cli: Config) -> Result<i32> {
    let (command, args) = cli
        .command_and_args()
        .context("Missing command line to wrap")?;

    // Load settings
    let settings = Settings::load();

    let collaborators = Collaborators {
        transfers: Arc::new(StreamTransferFactory::default()),
        picker: Arc::new(DialogPicker::new(settings)),
        progress: Arc::new(TextProgressFactory),
    };
    let runner = PtyRunner::new(
        PtyRunnerConfig {
            command,
            args,
            router: RouterOptions {
                trace_log: cli.tracelog,
                drag_files: cli.dragfile,
                ..RouterOptions::default()
            },
            ..PtyRunnerConfig::default()
        },
        collaborators,
    );

    // Restored when this function returns, before the process exits
    let _raw_mode = RawModeGuard::enable().context("Failed to enter raw mode")?;
    runner.run().await
}

fn setup_logging() {
    let Ok(directives) = std::env::var(LOG_ENV) else {
        return;
    };

    // The terminal belongs to the wrapped session, so logs go to a file
    let path = std::env::temp_dir().join("trzsz-relay.log");
    let file = match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("trzsz: cannot open log file {}: {}", path.display(), e);
            return;
        }
    };

    tracing_subscriber::registry()
        .with(EnvFilter::new(directives))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .init();
}
