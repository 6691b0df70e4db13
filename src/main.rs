//! hostwatch daemon main entry point
//!
//! Samples host metrics on a schedule, evaluates alert thresholds, and
//! runs the analysis, cleanup, and prediction jobs until shutdown.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hostwatch::{
    config::MonitorConfig,
    error::{MonitorError, Result},
    service::MonitorService,
};

/// hostwatch command line interface
#[derive(Parser)]
#[command(name = "hostwatch")]
#[command(about = "Host monitoring daemon with threshold alerting and trend analysis")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

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
    /// Start the monitoring daemon
    Start,

    /// Run a single collection cycle and print the snapshot
    Collect,

    /// Show the latest service state after one collection cycle
    Status,

    /// Validate configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,
    },

    /// Health check: one sampling cycle, failing on degraded probes
    Health,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = initialize_logging(&cli) {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match &cli.command {
        Some(Commands::Start) | None => start_daemon(config).await,
        Some(Commands::Collect) => collect_once(config).await,
        Some(Commands::Status) => show_status(config).await,
        Some(Commands::Config { show }) => handle_config(config, *show),
        Some(Commands::Health) => health_check(config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

/// Initialize logging based on CLI flags
fn initialize_logging(cli: &Cli) -> Result<()> {
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(parse_directive(&format!("hostwatch={log_level}"))?)
        .add_directive(parse_directive("tokio=warn")?)
        .add_directive(parse_directive("mio=warn")?);

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .init();
    }

    Ok(())
}

fn parse_directive(directive: &str) -> Result<tracing_subscriber::filter::Directive> {
    directive
        .parse()
        .map_err(|e| MonitorError::Generic(format!("invalid log directive '{directive}': {e}")))
}

/// Load configuration from file, env, or defaults
fn load_configuration(cli: &Cli) -> Result<MonitorConfig> {
    let path = match &cli.config {
        Some(path) => Some(path.clone()),
        None => MonitorConfig::default_config_path().ok().filter(|p| p.exists()),
    };
    if let Some(path) = &path {
        info!("Loading configuration from: {}", path.display());
    } else {
        info!("Using default configuration");
    }

    let config = MonitorConfig::load_with_fallback(path)?;
    Ok(config)
}

/// Run the daemon until SIGTERM/SIGINT
async fn start_daemon(config: MonitorConfig) -> Result<()> {
    let mut service = MonitorService::new(config)?;
    service.start()?;

    service.wait_for_shutdown().await?;

    info!("Initiating graceful shutdown");
    service.stop().await;
    Ok(())
}

/// One manual collection cycle, snapshot printed as JSON
async fn collect_once(config: MonitorConfig) -> Result<()> {
    let service = MonitorService::new(config)?;
    service.trigger_collection().await?;

    let snapshot = service
        .latest_snapshot()
        .ok_or_else(|| MonitorError::Generic("collection produced no snapshot".to_string()))?;
    println!("{}", serde_json::to_string_pretty(snapshot.as_ref())?);
    Ok(())
}

/// Service state after one collection cycle
async fn show_status(config: MonitorConfig) -> Result<()> {
    let service = MonitorService::new(config)?;
    service.trigger_collection().await?;
    println!("{}", serde_json::to_string_pretty(&service.state())?);
    Ok(())
}

/// Validate (and optionally print) the effective configuration
fn handle_config(config: MonitorConfig, show: bool) -> Result<()> {
    config.validate()?;
    info!("Configuration is valid");
    if show {
        let content = toml::to_string_pretty(&config)
            .map_err(|e| MonitorError::Generic(e.to_string()))?;
        println!("{content}");
    }
    Ok(())
}

/// Exit non-zero when any probe is degraded
async fn health_check(config: MonitorConfig) -> Result<()> {
    let service = MonitorService::new(config)?;
    service.trigger_collection().await?;

    let snapshot = service
        .latest_snapshot()
        .ok_or_else(|| MonitorError::Generic("collection produced no snapshot".to_string()))?;
    if snapshot.degraded_probes.is_empty() {
        info!("All probes healthy");
        Ok(())
    } else {
        Err(MonitorError::Generic(format!(
            "degraded probes: {}",
            snapshot.degraded_probes.join(", ")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directives_parse() {
        assert!(parse_directive("hostwatch=debug").is_ok());
        assert!(parse_directive("tokio=warn").is_ok());
        assert!(parse_directive("not a directive!").is_err());
    }
}
