//! Kline traders - main entry point
//!
//! This binary provides two subcommands:
//! - poll: RSI threshold bot polling the latest candle on a fixed interval
//! - stream: indicator grid bot driven by the live kline WebSocket stream

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "kline-traders")]
#[command(about = "RSI polling and indicator-grid streaming bots for Binance spot", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the polling RSI bot
    Poll {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Paper trading mode (safe, no real money)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,
    },

    /// Run the streaming grid bot
    Stream {
        /// Path to configuration file (defaults apply when omitted)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Paper trading mode (safe, no real money)
        #[arg(long)]
        paper: bool,

        /// Live trading mode (CAUTION - REAL MONEY!)
        #[arg(long)]
        live: bool,
    },
}

/// Directory holding one log file per run
const LOG_DIR: &str = "logs";

/// Console plus per-run file logging; `RUST_LOG` overrides the level
fn setup_logging(verbose: bool, command_name: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all(LOG_DIR)?;

    // poll_2024-01-01_12-00-00.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from(LOG_DIR).join(&log_filename);

    // HTTP and WebSocket internals stay at warn
    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,h2=warn,tungstenite=warn,tokio_tungstenite=warn",
        level
    );
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::never(LOG_DIR, &log_filename));

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_line_number(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!(log_file = %log_path.display(), "Logging initialized");

    Ok(guard)
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Poll { .. } => "poll",
        Commands::Stream { .. } => "stream",
    };

    // dropping the guard flushes the file writer
    let _log_guard = setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Poll {
            config,
            paper,
            live,
        } => commands::poll::run(config, paper, live),

        Commands::Stream {
            config,
            paper,
            live,
        } => commands::stream::run(config, paper, live),
    }
}
