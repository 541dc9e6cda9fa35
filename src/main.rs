use anyhow::Context;
use clap::{Parser, Subcommand};
use loadscale::config::{Config, ConfigError};
use loadscale::scaling::SimulatedFleet;
use loadscale::{HttpHealthProbe, LoadScale};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loadscale")]
#[command(about = "Traffic distribution and metric-driven capacity control for backend pools")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the distributor and capacity controller until interrupted
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/loadscale.toml")]
        config: PathBuf,
    },
    /// Generate an example configuration file
    Config {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config).await?,
        Commands::Config { output } => generate_config(output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;

    init_logging(&config)?;

    info!(version = env!("CARGO_PKG_VERSION"), "Starting loadscale");
    info!(path = ?config_path, "Configuration loaded");

    let probe = Arc::new(HttpHealthProbe::new(
        config.health.path.clone(),
        config.health.expected_status,
    ));
    let fleet = Arc::new(SimulatedFleet::new(config.scaling.initial_instances));

    let loadscale = LoadScale::new(config, probe, fleet, None)
        .await
        .context("failed to initialize loadscale")?;
    loadscale.start().await;

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    loadscale.shutdown().await;
    Ok(())
}

fn generate_config(output: PathBuf) -> anyhow::Result<()> {
    println!("Generating configuration file: {:?}", output);

    Config::create_example_config(&output).context("failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  loadscale run --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Default strategy: {}", config.default_strategy());
            println!("  Sticky sessions: {}", config.sessions.sticky);
            println!(
                "  Health checks: every {}s, timeout {}s, GET {}",
                config.health.interval_sec, config.health.timeout_sec, config.health.path
            );
            println!("  Backends: {}", config.backends.len());
            for (i, backend) in config.backends.iter().enumerate() {
                println!(
                    "    {}: {}:{} (weight {})",
                    i + 1,
                    backend.host,
                    backend.port,
                    backend.weight
                );
            }
            println!(
                "  Scaling: {} ({} policies)",
                if config.scaling.enabled { "enabled" } else { "disabled" },
                config.scaling.policies.len()
            );
            for policy in &config.scaling.policies {
                println!(
                    "    {}: {} up>{} down<{} [{}..{}]",
                    policy.name,
                    policy.metric,
                    policy.scale_up_threshold,
                    policy.scale_down_threshold,
                    policy.min_instances,
                    policy.max_instances
                );
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("loadscale v{}", env!("CARGO_PKG_VERSION"));
    println!("Traffic distribution and metric-driven capacity control");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Six backend selection strategies with connection accounting");
    println!("  • Sticky sessions with TTL expiry");
    println!("  • Per-backend HTTP health checks with bounded timeouts");
    println!("  • Threshold scaling policies with cooldowns and history");
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))?;

    info!(level = %config.logging.level, format = %config.logging.format, "Logging initialized");
    Ok(())
}
