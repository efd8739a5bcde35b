//! cross-send - Background daemon for scheduled posts
//!
//! Reconciles the scheduled post queue at a fixed interval, publishing
//! posts as they come due and rescheduling failed ones.

use chrono::Utc;
use clap::Parser;
use libcrosscast::logging::LoggingConfig;
use libcrosscast::{
    Config, Database, PublishDispatcher, ReconcileSummary, Reconciler, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "cross-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled posts")]
#[command(long_about = "\
cross-send - Background daemon for scheduled posts

DESCRIPTION:
    cross-send is a long-running daemon that reconciles the crosscast queue.
    Each pass publishes the pending posts that are due, marks them completed,
    or reschedules them with a fixed backoff until their retry budget is
    spent.

USAGE:
    # Run in foreground (logs to stderr)
    cross-send

    # Run with custom poll interval
    cross-send --poll-interval 30

    # One authenticated pass, printing the summary as JSON
    CROSSCAST_TRIGGER_SECRET=... cross-send --once

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current pass)

CONFIGURATION:
    [scheduling]
    poll_interval = 60      # seconds between passes
    max_retries = 3         # failed cycles before a post fails for good
    retry_delay = 300       # seconds a failed post is pushed back
    trigger_secret = \"...\"  # required by --once

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or authentication error
")]
struct Cli {
    /// Poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run one authenticated pass, print the summary and exit
    #[arg(long)]
    once: bool,

    /// Shared secret for --once
    #[arg(long, env = "CROSSCAST_TRIGGER_SECRET", hide_env_values = true)]
    secret: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!("cross-send failed: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Arc::new(Database::new(&config.database.path).await?);
    let dispatcher = Arc::new(PublishDispatcher::from_config(&config, db.clone())?);
    let reconciler = Reconciler::new(db, dispatcher, &config.scheduling);

    if cli.once {
        let secret = cli.secret.unwrap_or_default();
        let summary = reconciler.trigger(&secret, Utc::now()).await?;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    info!("cross-send daemon starting");

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    let poll_interval = cli.poll_interval.unwrap_or(config.scheduling.poll_interval).max(1);
    info!("Poll interval: {}s", poll_interval);

    run_daemon_loop(&reconciler, poll_interval, shutdown).await;

    info!("cross-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use libcrosscast::CrosscastError;
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| CrosscastError::InvalidInput(format!("Signal setup failed: {}", e)))?;

    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            info!("Received shutdown signal, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

/// Without unix signals the daemon runs until the process is killed
#[cfg(not(unix))]
fn setup_signal_handlers(_shutdown: Arc<AtomicBool>) -> Result<()> {
    tracing::warn!("Graceful shutdown signals are only handled on unix");
    Ok(())
}

async fn run_daemon_loop(reconciler: &Reconciler, poll_interval: u64, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Relaxed) {
            info!("Shutdown requested, stopping daemon loop");
            break;
        }

        match reconciler.run_once(Utc::now()).await {
            Ok(summary) => log_summary(&summary),
            Err(e) => error!("Error reconciling scheduled posts: {}", e),
        }

        // Sleep until next pass, checking for shutdown every second
        for _ in 0..poll_interval {
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            sleep(Duration::from_secs(1)).await;
        }
    }
}

fn log_summary(summary: &ReconcileSummary) {
    for report in &summary.results {
        let failed: Vec<_> = report
            .platforms
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.platform.as_str())
            .collect();
        info!(
            post_id = %report.post_id,
            status = %report.status,
            failed = ?failed,
            "Reconciled post"
        );
    }
}
