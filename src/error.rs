use std::path::PathBuf;
use thiserror::Error;

use crate::types::{Direction, ModelKey, TimeFrame};

/// Errors parsing model keys and their components
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyParseError {
    #[error("Unknown model type: {0}")]
    ModelType(String),

    #[error("Unknown direction: {0}")]
    Direction(String),

    #[error("Unknown timeframe: {0}")]
    TimeFrame(String),

    #[error("Malformed model key: {0}")]
    Key(String),
}

/// Errors loading a single artifact; only the affected key becomes unavailable
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Missing {kind} file for {key}")]
    Missing { key: ModelKey, kind: &'static str },

    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Shape mismatch for {key}: {component} expects {expected} inputs, schema has {actual}")]
    ShapeMismatch {
        key: ModelKey,
        component: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Corrupted artifact: {reason}")]
    Corrupt { reason: String },
}

/// Registry-level failures
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("No model for {symbol} {timeframe} ({direction})")]
    NotFound {
        symbol: String,
        timeframe: TimeFrame,
        direction: Direction,
    },

    #[error("Model directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("Scan of {directory} produced no valid models ({failures} failed); keeping previous snapshot")]
    EmptyScan { directory: PathBuf, failures: usize },

    #[error("Failed to scan {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Reload task aborted: {0}")]
    Aborted(String),
}

/// Failures inside a single prediction
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Feature shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    #[error("Model produced a non-finite output")]
    NonFinite,
}

/// Analytics collaborator unreachable or returned garbage
#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("Analytics service not configured")]
    NotConfigured,

    #[error("Analytics request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("Analytics response from {url} could not be decoded: {reason}")]
    Decode { url: String, reason: String },
}

/// Failures of a retraining job
#[derive(Debug, Clone, Error)]
pub enum RetrainError {
    #[error("Trainer not configured")]
    NotConfigured,

    #[error("Failed to start trainer: {0}")]
    Spawn(String),

    #[error("Trainer exited with status {0}")]
    ExitStatus(String),

    #[error("Job exceeded deadline of {0}s")]
    Timeout(u64),

    #[error("Reload after retraining failed: {0}")]
    Reload(String),
}
