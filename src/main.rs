//! deriv_monitor - Main Entry Point
//!
//! Unattended market-data monitor: streams quotes, rebuilds minute candles,
//! classifies breakout setups and alerts a messaging channel.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use deriv_monitor::config;
use deriv_monitor::monitor::{Monitor, RunMode};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run mode: indefinite production run, or a fixed-duration test run
    /// that ends with a pass/fail summary
    #[arg(long, value_enum, default_value_t = Mode::Production)]
    mode: Mode,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    Production,
    Test,
}

impl From<Mode> for RunMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Production => RunMode::Production,
            Mode::Test => RunMode::Test,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    dotenvy::dotenv().ok();

    // Config file first, environment-only fallback second. Missing required
    // settings are fatal here and nowhere else.
    let config = match config::load_config(Some(&args.config)) {
        Ok(config) => config,
        Err(_) => match config::load_from_env() {
            Ok(config) => config,
            Err(e) => {
                error!("{e}");
                error!("set DERIV_APP_ID, TELEGRAM_BOT_TOKEN and TELEGRAM_CHAT_ID (or provide a config file)");
                std::process::exit(1);
            }
        },
    };

    info!("starting deriv_monitor ({:?} mode)", args.mode);

    let monitor = match Monitor::new(config) {
        Ok(monitor) => monitor,
        Err(e) => {
            error!("monitor startup failed: {e}");
            std::process::exit(1);
        }
    };

    let summary = monitor.run(args.mode.into()).await?;

    if let Some(passed) = summary.test_passed {
        if !passed {
            std::process::exit(1);
        }
    }

    Ok(())
}
