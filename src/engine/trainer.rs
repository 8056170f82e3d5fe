use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::RetrainingSettings;
use crate::error::RetrainError;
use crate::types::ModelKey;

/// Produces fresh artifacts for one model key in the model directory.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Trainer: Send + Sync {
    async fn train(&self, key: &ModelKey) -> Result<(), RetrainError>;
}

/// Runs an external training program once per job.
///
/// The child is killed if the job future is dropped, which is how deadlines
/// abandon a run.
pub struct CommandTrainer {
    program: String,
    args: Vec<String>,
}

impl CommandTrainer {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn from_settings(settings: &RetrainingSettings) -> Option<Self> {
        settings
            .trainer_command
            .as_ref()
            .filter(|c| !c.trim().is_empty())
            .map(|program| Self::new(program.clone(), settings.trainer_args.clone()))
    }

    fn render_args(&self, key: &ModelKey) -> Vec<String> {
        let model_key = key.as_string();
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{model_key}", &model_key)
                    .replace("{type}", key.model_type.as_str())
                    .replace("{symbol}", &key.symbol)
                    .replace("{timeframe}", key.timeframe.as_str())
            })
            .collect()
    }
}

#[async_trait]
impl Trainer for CommandTrainer {
    async fn train(&self, key: &ModelKey) -> Result<(), RetrainError> {
        let args = self.render_args(key);
        info!("Starting trainer for {}: {} {}", key, self.program, args.join(" "));

        let output = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| RetrainError::Spawn(format!("{}: {}", self.program, e)))?;

        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("Trainer stderr for {}: {}", key, stderr.trim());
        }

        if output.status.success() {
            Ok(())
        } else {
            let tail: String = stderr.lines().last().unwrap_or_default().chars().take(200).collect();
            Err(RetrainError::ExitStatus(format!("{} {}", output.status, tail).trim().to_string()))
        }
    }
}

/// Stand-in when no trainer command is configured; every job fails fast.
pub struct UnconfiguredTrainer;

#[async_trait]
impl Trainer for UnconfiguredTrainer {
    async fn train(&self, _key: &ModelKey) -> Result<(), RetrainError> {
        Err(RetrainError::NotConfigured)
    }
}
