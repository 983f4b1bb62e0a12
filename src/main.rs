//! Hamustro - Main entry point.
//!
//! This binary wires the pieces together: configuration, logging, the sink
//! selected by the configured dialect, the dispatcher with its worker pool,
//! and the HTTP server. SIGINT/SIGTERM trigger a graceful drain with a
//! 90-second hard-kill watchdog.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use hamustro::config::{Config, ConfigError};
use hamustro::server::{AppState, build_router};
use hamustro::sink::{self, SinkError};
use hamustro::worker::{Dispatcher, DispatcherConfig};

/// Deadline for a graceful drain before the process force-exits.
const HARD_KILL_AFTER: Duration = Duration::from_secs(90);

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(name = "hamustro", version, about = "HTTP event-ingestion gateway")]
struct Args {
    /// Configuration file for the dialect
    #[arg(short, long, value_name = "FILE")]
    config: PathBuf,

    /// Verbose mode for debugging
    #[arg(long)]
    verbose: bool,
}

/// Failures that abort startup with exit code 1.
#[derive(Debug, Error)]
enum StartupError {
    /// Configuration file missing, malformed or incomplete.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The selected sink could not be constructed.
    #[error("sink initialization failed: {0}")]
    Sink(#[from] SinkError),

    /// Binding or serving the listener failed, or the log file is unusable.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(error) = run(args).await {
        // Startup failures may precede logger initialization.
        eprintln!("hamustro-{}: {error}", hamustro::VERSION);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), StartupError> {
    let config = Config::load(&args.config)?;
    init_tracing(&config, args.verbose)?;

    info!(version = hamustro::VERSION, "Starting hamustro");

    // Construct the dialect's sink.
    let dialect = config.dialect_config()?;
    let sink = sink::build(&dialect).await?;

    // Create the background workers.
    let (job_tx, job_rx) = mpsc::channel(config.max_queue_size());
    let mut dispatcher = Dispatcher::new(
        DispatcherConfig {
            max_workers: config.max_worker_size(),
            buffer_size: config.buffer_size(),
            spread_buffer: config.spread_buffer,
            retry_attempt: config.retry_attempt(),
        },
        sink,
    );
    dispatcher.run(job_tx.clone(), job_rx);

    let state = AppState::new(
        config.shared_secret.clone(),
        args.verbose,
        config.time_mode(),
        job_tx,
    );
    let app = build_router(state.clone());

    let address = config.address();
    let listener = tokio::net::TcpListener::bind(&address).await?;
    info!("Listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(drain_on_signal(state, dispatcher))
        .await?;

    info!("Shutdown complete");
    Ok(())
}

/// Waits for SIGINT/SIGTERM, then drains the pipeline.
///
/// The listener keeps accepting while this runs; the draining flag makes
/// the track handler answer 503, so in-flight clients get a clean signal
/// instead of connection resets. The HTTP server itself is only stopped
/// (by this future resolving) once the workers have flushed.
async fn drain_on_signal(state: AppState, dispatcher: Dispatcher) {
    shutdown_signal().await;

    info!("Shutting down server ...");
    state.start_draining();

    // Force quit if the drain hangs on an unresponsive sink.
    tokio::spawn(async {
        tokio::time::sleep(HARD_KILL_AFTER).await;
        error!("Server shut down is taking too long, force quit immediately");
        std::process::exit(1);
    });

    dispatcher.stop().await;
}

/// Resolves on the first SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Initializes the process-wide subscriber, honoring `log_file`.
fn init_tracing(config: &Config, verbose: bool) -> Result<(), StartupError> {
    let default_filter = if verbose {
        "hamustro=debug"
    } else {
        "hamustro=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    match &config.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(Arc::new(file))
                        .with_ansi(false),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}
