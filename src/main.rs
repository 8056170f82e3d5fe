mod analytics;
mod config;
mod engine;
mod error;
mod ml;
mod notifications;
mod risk;
mod types;
mod web;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use analytics::{AnalyticsSource, HealthCache, HttpAnalyticsClient};
use config::{ServiceSettings, TradingConfigManager};
use engine::{CommandTrainer, RetrainingController, RetrainingScheduler, Trainer, UnconfiguredTrainer};
use error::ConnectivityError;
use ml::registry::scan_directory;
use ml::{ModelRegistry, PredictionEngine};
use notifications::NotificationManager;
use risk::RiskManager;
use web::{start_server, AppState};

#[derive(Parser)]
#[command(name = "trade-model-server")]
#[command(author = "Trading Bot")]
#[command(version = "0.1.0")]
#[command(about = "Serves trade-direction models and retrains them when drift is reported", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, default_value = "model_server.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the prediction API and the retraining controller
    Serve {
        /// Listen port (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Scan a model directory and report what would load
    Models {
        /// Directory to scan (defaults to models.directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
    /// Print the effective configuration as TOML
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.json_logs)?;

    let settings = ServiceSettings::load(&cli.config)?;

    match cli.command {
        Commands::Serve { port } => {
            run_server(settings, port).await?;
        }
        Commands::Models { dir } => {
            let dir = dir.unwrap_or_else(|| settings.models.directory.clone());
            list_models(&dir)?;
        }
        Commands::CheckConfig => {
            println!("{}", toml::to_string_pretty(&settings)?);
        }
    }

    Ok(())
}

fn init_logging(verbose: bool, json: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);

    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.map_err(|e| anyhow!("Failed to initialize logging: {}", e))
}

async fn run_server(settings: ServiceSettings, port_override: Option<u16>) -> Result<()> {
    info!("Trade model server v0.1.0");

    let notifications = NotificationManager::new();
    let health = Arc::new(HealthCache::new());
    let config_manager = TradingConfigManager::new(settings.trading.clone());
    notifications.watch_config(config_manager.subscribe());

    // Initial load; an empty or missing directory only degrades the service
    let registry = Arc::new(ModelRegistry::new(settings.models.directory.clone()));
    match registry.reload().await {
        Ok(report) => info!(
            "Loaded {} models from {} ({} reconciled, {} skipped)",
            report.loaded.len(),
            settings.models.directory.display(),
            report.reconciled.len(),
            report.failures.len()
        ),
        Err(e) if settings.models.fail_on_empty => {
            return Err(anyhow!("Refusing to start without models: {}", e));
        }
        Err(e) => warn!("Starting in degraded mode with no models: {}", e),
    }

    let engine = Arc::new(PredictionEngine::new(
        registry,
        Arc::clone(&health),
        RiskManager::new(config_manager.clone()),
        notifications.clone(),
    ));

    let trainer: Arc<dyn Trainer> = match CommandTrainer::from_settings(&settings.retraining) {
        Some(trainer) => Arc::new(trainer),
        None => {
            warn!("No trainer command configured; retraining jobs will fail and escalate");
            Arc::new(UnconfiguredTrainer)
        }
    };

    let analytics: Option<Arc<dyn AnalyticsSource>> = match HttpAnalyticsClient::new(&settings.analytics) {
        Ok(client) => {
            info!("Monitoring analytics service at {}", client.base_url());
            Some(Arc::new(client))
        }
        Err(ConnectivityError::NotConfigured) => {
            warn!("analytics.base_url not set; drift monitoring disabled");
            None
        }
        Err(e) => {
            warn!("Analytics client unavailable, drift monitoring disabled: {}", e);
            None
        }
    };

    let scheduler = Arc::new(RetrainingScheduler::new(
        settings.retraining.clone(),
        trainer,
        engine.clone(),
        analytics,
        health,
        notifications.clone(),
    ));
    let controller = Arc::new(RetrainingController::new(
        scheduler,
        notifications.clone(),
        settings.retraining.check_interval(),
    ));

    if settings.retraining.enabled {
        controller.start().await.map_err(|e| anyhow!(e))?;
        Arc::clone(&controller).spawn();
    } else {
        info!("Retraining disabled; check cycles run only on request");
    }

    let state = AppState {
        engine,
        controller: Arc::clone(&controller),
        config_manager,
        notifications,
    };

    let port = port_override.unwrap_or(settings.server.port);
    start_server(state, &settings.server.host, port).await?;

    if controller.stop().await.is_ok() {
        info!("Retraining controller shut down");
    }
    Ok(())
}

fn list_models(dir: &Path) -> Result<()> {
    let (_, report) = scan_directory(dir)?;

    println!("Model directory: {}", dir.display());
    println!("Loaded ({}):", report.loaded.len());
    for key in &report.loaded {
        println!("  {}", key);
    }

    if !report.reconciled.is_empty() {
        println!("Feature lists reconciled ({}):", report.reconciled.len());
        for (key, reconciliation) in &report.reconciled {
            println!("  {}: {:?}", key, reconciliation);
        }
    }

    if !report.failures.is_empty() {
        println!("Skipped ({}):", report.failures.len());
        for failure in &report.failures {
            println!("  {}: {}", failure.name, failure.reason);
        }
    }

    Ok(())
}
