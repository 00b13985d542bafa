use std::fs::OpenOptions;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use clap::{Parser, Subcommand};
use mumblegate::config::{BridgeConfig, DEFAULT_CONFIG_FILE};
use mumblegate::{Bridge, BridgeError, healthcheck};
use tracing::{error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(version, about = "External authenticator bridge for Mumble servers")]
struct Args {
    /// Configuration file. Missing is fine; defaults and
    /// MUMBLEGATE_* environment variables still apply.
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Log at debug level (ignored when RUST_LOG is set).
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Log errors only (ignored when RUST_LOG is set).
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Command {
    /// Attach to the chat server and serve authentication requests.
    #[default]
    Run,
    /// Verify the healthcheck credentials on every allowed server.
    Healthcheck,
}

fn init_logging(args: &Args, config: &BridgeConfig) -> Result<(), BridgeError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = if args.verbose {
                "debug"
            } else if args.quiet {
                "error"
            } else {
                config.log.level.as_deref().unwrap_or("info")
            };
            EnvFilter::try_new(level).map_err(|e| BridgeError::Logging(e.to_string()))?
        }
    };

    let file_layer = match &config.log.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| BridgeError::Logging(format!("{}: {e}", path.display())))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().compact().with_target(false))
        .with(file_layer)
        .with(filter)
        .try_init()
        .map_err(|e| BridgeError::Logging(e.to_string()))
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("interrupted"),
                    _ = term.recv() => info!("terminated"),
                }
            }
            Err(e) => {
                warn!(error = %e, "could not listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("interrupted");
    }
}

async fn run(config: BridgeConfig) -> Result<(), BridgeError> {
    let bridge = Bridge::builder(config).build()?;
    bridge.run_until(shutdown_signal()).await
}

async fn check(config: BridgeConfig) -> Result<bool, BridgeError> {
    let report = healthcheck(&config).await?;
    if report.results.is_empty() {
        warn!("no allowed servers are booted");
    }
    Ok(report.is_healthy())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match BridgeConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mumblegate: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = init_logging(&args, &config) {
        eprintln!("mumblegate: {e}");
        return ExitCode::FAILURE;
    }

    match args.command.unwrap_or_default() {
        Command::Run => match run(config).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!(error = %e, "fatal");
                ExitCode::FAILURE
            }
        },
        Command::Healthcheck => match check(config).await {
            Ok(true) => {
                info!("healthy");
                ExitCode::SUCCESS
            }
            Ok(false) => {
                error!("unhealthy");
                ExitCode::FAILURE
            }
            Err(e) => {
                error!(error = %e, "healthcheck failed");
                ExitCode::FAILURE
            }
        },
    }
}
