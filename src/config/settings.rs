use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::runtime::TradingSettings;

/// Prefix for environment overrides, e.g. `MODEL_SERVER__SERVER__PORT=8080`
pub const ENV_PREFIX: &str = "MODEL_SERVER";

/// Process-wide settings, layered defaults → TOML file → environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceSettings {
    pub server: ServerSettings,
    pub models: ModelSettings,
    pub retraining: RetrainingSettings,
    pub analytics: AnalyticsSettings,
    pub trading: TradingSettings,
}

impl ServiceSettings {
    /// Load settings from an optional file plus `MODEL_SERVER__*` environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let built = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read configuration from {}", path.display()))?;

        let mut settings: ServiceSettings = built
            .try_deserialize()
            .context("Invalid configuration")?;
        settings.trading = settings.trading.normalized();

        settings
            .validate()
            .map_err(|errors| anyhow!("Invalid configuration: {}", errors.join(", ")))?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be > 0".to_string());
        }
        if self.retraining.max_concurrent_jobs == 0 {
            errors.push("retraining.max_concurrent_jobs must be > 0".to_string());
        }
        if self.retraining.max_attempts == 0 {
            errors.push("retraining.max_attempts must be > 0".to_string());
        }
        if self.retraining.check_interval_secs == 0 {
            errors.push("retraining.check_interval_secs must be > 0".to_string());
        }
        if self.retraining.job_timeout_secs == 0 {
            errors.push("retraining.job_timeout_secs must be > 0".to_string());
        }
        if let Err(mut e) = self.trading.validate() {
            errors.append(&mut e);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub directory: PathBuf,
    /// Refuse to start with zero loaded models instead of serving degraded
    pub fail_on_empty: bool,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("models"),
            fail_on_empty: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrainingSettings {
    pub enabled: bool,
    pub check_interval_secs: u64,
    pub max_concurrent_jobs: usize,
    /// Failed attempts allowed per key before the alert is escalated
    pub max_attempts: u32,
    pub job_timeout_secs: u64,
    /// Program run once per job; `{model_key}`, `{type}`, `{symbol}`, `{timeframe}`
    /// in the arguments are substituted.
    pub trainer_command: Option<String>,
    pub trainer_args: Vec<String>,
}

impl Default for RetrainingSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_secs: 3600,
            max_concurrent_jobs: 2,
            max_attempts: 3,
            job_timeout_secs: 7200,
            trainer_command: None,
            trainer_args: vec!["--model-key".to_string(), "{model_key}".to_string()],
        }
    }
}

impl RetrainingSettings {
    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    /// Base URL of the analytics service; monitoring is disabled when unset
    pub base_url: Option<String>,
    pub alerts_path: String,
    pub health_path: String,
    pub timeout_secs: u64,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            alerts_path: "/alerts/by-model".to_string(),
            health_path: "/health/by-model".to_string(),
            timeout_secs: 10,
        }
    }
}
