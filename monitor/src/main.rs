//! DAO platform monitor entry point
//!
//! Runs the monitoring engine against the platform's HTTP metrics endpoint
//! until SIGINT or SIGTERM, then drains and persists.

use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use dao_monitor::{logging, MetricPath, MonitorConfig, MonitoringEngine};

/// DAO platform usage monitor command line interface
#[derive(Parser)]
#[command(name = "dao-monitor")]
#[command(about = "Usage monitoring and alerting for the DAO platform")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level, overrides the configuration file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Run the monitor until interrupted
    Run,

    /// Validate configuration
    Validate {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },

    /// List every metric path thresholds and anomaly tracking can name
    MetricsCatalogue,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {:#}", e);
            process::exit(1);
        }
    };

    let result = match &cli.command {
        Some(Commands::Validate { show }) => handle_config(&config, *show),
        Some(Commands::MetricsCatalogue) => {
            for path in MetricPath::catalogue() {
                println!("{}", path);
            }
            Ok(())
        }
        Some(Commands::Run) | None => run(config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

/// Load configuration from file or defaults, then apply CLI overrides
fn load_configuration(cli: &Cli) -> Result<MonitorConfig> {
    let path = match &cli.config {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("configuration file not found: {}", path.display());
            }
            Some(path.clone())
        }
        None => MonitorConfig::default_config_path().ok(),
    };

    let mut config = MonitorConfig::load_with_fallback(path.as_ref())?;

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.format = "json".to_string();
    }

    Ok(config)
}

fn handle_config(config: &MonitorConfig, show: bool) -> Result<()> {
    config.validate()?;
    if show {
        println!("{}", toml::to_string_pretty(config).context("failed to render configuration")?);
    } else {
        println!("Configuration is valid");
    }
    Ok(())
}

/// Run the engine until a shutdown signal arrives
async fn run(config: MonitorConfig) -> Result<()> {
    let _log_guard = logging::init_logging(&config.logging)?;

    info!("Starting DAO platform monitor");

    let metrics_enabled = config.metrics.enabled;
    let export_format = config.metrics.export_format.clone();

    let engine = MonitoringEngine::initialize_http(config).await?;
    engine.start().await?;

    wait_for_shutdown().await?;

    info!("Initiating graceful shutdown");
    let report = engine.stop().await?;
    if let Some(report) = report {
        if !report.is_clean() {
            warn!(abandoned = ?report.abandoned, "Some tasks were abandoned at shutdown");
        }
    }

    if metrics_enabled {
        match engine.export_metrics(&export_format) {
            Ok(output) => println!("{}", output),
            Err(e) => warn!("Failed to export metrics: {}", e),
        }
    }

    info!("DAO platform monitor stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("Received ctrl-c");
    Ok(())
}
