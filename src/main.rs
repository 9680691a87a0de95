// ABOUTME: Main entry point for the Symphony bot runtime
// ABOUTME: Initializes logging, config, and metrics, then runs the datafeed poller over a replay capture

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use symphony::config::Config;
use symphony::paths;
use symphony::replay::ReplayBackend;
use symphony::transcript::{TranscriptListener, TranscriptRecorder};
use symphony::{ChatService, DatafeedPoller, Dispatcher, PollerState, StaticIdentityResolver};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// ============================================================================
// CLI Types
// ============================================================================

/// Symphony bot runtime
#[derive(Parser, Debug)]
#[command(name = "symphony", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch a recorded datafeed capture through the chat directory
    Replay {
        /// JSONL file with one datafeed event per line
        #[arg(value_name = "EVENTS")]
        events: PathBuf,

        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Write per-stream JSONL transcripts to this directory
        #[arg(long)]
        transcript_dir: Option<PathBuf>,

        /// Keep polling after the capture is drained, until Ctrl-C
        #[arg(long)]
        follow: bool,

        /// Emit JSON log lines
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    // Log panics before they crash the process
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("PANIC! symphony crashed: {}", panic_info);
        eprintln!("{:?}", std::backtrace::Backtrace::force_capture());
    }));

    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay {
            events,
            config,
            transcript_dir,
            follow,
            json,
        } => {
            let config = match config {
                Some(path) => Config::load_from(&path)?,
                None => Config::load()?,
            };
            let _log_guard = init_logging(json || config.logging.json, config.logging.file)?;
            install_metrics_exporter(&config)?;
            replay(config, events, transcript_dir, follow).await
        }
    }
}

/// Returns the file writer guard; dropping it flushes pending log lines.
fn init_logging(
    json: bool,
    to_file: bool,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());

    let (file_layer, guard) = if to_file {
        let log_dir = paths::log_dir();
        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
        let appender = tracing_appender::rolling::daily(&log_dir, "symphony.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        (
            Some(fmt::layer().with_ansi(false).with_writer(writer)),
            Some(guard),
        )
    } else {
        (None, None)
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(guard)
}

fn install_metrics_exporter(config: &Config) -> Result<()> {
    let Some(addr) = config.metrics.prometheus_addr.as_deref() else {
        return Ok(());
    };
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("metrics.prometheus_addr is not a socket address: {}", addr))?;

    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    symphony::metrics::describe();

    tracing::info!(addr = %addr, "Prometheus exporter listening");
    Ok(())
}

async fn replay(
    config: Config,
    events: PathBuf,
    transcript_dir: Option<PathBuf>,
    follow: bool,
) -> Result<()> {
    let local_user = config.bot.chat_user();
    tracing::info!(
        user_id = %local_user.id,
        max_batch_size = config.datafeed.max_batch_size,
        read_timeout_secs = config.datafeed.read_timeout_secs,
        "Configuration loaded"
    );

    let chats = Arc::new(ChatService::new(local_user, Arc::new(StaticIdentityResolver)));
    let transcript = Arc::new(match transcript_dir {
        Some(dir) => TranscriptListener::with_dir(dir),
        None => TranscriptListener::new(),
    });
    chats.add_listener(Arc::new(TranscriptRecorder::new(transcript)));

    let backend = Arc::new(ReplayBackend::open(&events).await?);
    let mut drained = backend.drained();

    let poller = DatafeedPoller::new(
        backend,
        Arc::new(Dispatcher::new(Arc::clone(&chats))),
        config.datafeed.poller_config(),
    );
    let mut status = poller.status();
    poller.start().await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl-C, stopping datafeed");
        }
        _ = drained.wait_for(|drained| *drained), if !follow => {
            tracing::info!("Capture drained");
        }
        _ = status.wait_for(|state| matches!(state, PollerState::Failed { .. })) => {}
    }

    let result = poller.stop().await;
    tracing::info!(chats = chats.len(), "Replay finished");
    result.context("Datafeed poller failed")
}
