use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{ArtifactError, KeyParseError, RegistryError};
use crate::ml::features::{reconcile_schema, Reconciliation};
use crate::ml::model::{Classifier, StandardScaler};
use crate::types::ModelKey;

/// Files making up one model slot on disk, named `{key}{suffix}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFile {
    Model,
    Scaler,
    Features,
    Meta,
}

impl ArtifactFile {
    pub fn all() -> [ArtifactFile; 4] {
        [ArtifactFile::Model, ArtifactFile::Scaler, ArtifactFile::Features, ArtifactFile::Meta]
    }

    pub fn suffix(&self) -> &'static str {
        match self {
            ArtifactFile::Model => "_model.json",
            ArtifactFile::Scaler => "_scaler.json",
            ArtifactFile::Features => "_features.json",
            ArtifactFile::Meta => "_meta.json",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ArtifactFile::Model => "classifier",
            ArtifactFile::Scaler => "scaler",
            ArtifactFile::Features => "feature list",
            ArtifactFile::Meta => "metadata",
        }
    }
}

pub fn artifact_path(dir: &Path, key: &ModelKey, file: ArtifactFile) -> PathBuf {
    dir.join(format!("{}{}", key.as_string(), file.suffix()))
}

/// Semantic version for models
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModelVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ModelVersion {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self { major, minor, patch }
    }

    pub fn initial() -> Self {
        Self::new(1, 0, 0)
    }
}

impl FromStr for ModelVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().trim_start_matches('v').split('.').collect();
        if parts.len() != 3 {
            return Err(format!("Invalid version format: {}", s));
        }
        let num = |p: &str| p.parse::<u32>().map_err(|e| format!("Invalid version {}: {}", s, e));

        Ok(Self {
            major: num(parts[0])?,
            minor: num(parts[1])?,
            patch: num(parts[2])?,
        })
    }
}

impl std::fmt::Display for ModelVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for ModelVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ModelVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ModelVersion::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

/// Evaluation numbers written by the training pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelMetrics {
    pub accuracy: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub f1_score: Option<f64>,
    pub auc_roc: Option<f64>,
    pub train_samples: Option<usize>,
    pub test_samples: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactMetadata {
    pub version: ModelVersion,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metrics: ModelMetrics,
}

impl Default for ArtifactMetadata {
    fn default() -> Self {
        Self {
            version: ModelVersion::initial(),
            trained_at: None,
            metrics: ModelMetrics::default(),
        }
    }
}

/// A fully loaded, immutable model slot.
#[derive(Debug, Clone)]
pub struct ModelArtifact {
    pub key: ModelKey,
    pub classifier: Classifier,
    pub scaler: Option<StandardScaler>,
    /// Reconciled; always the canonical width
    pub feature_schema: Vec<String>,
    pub reconciliation: Reconciliation,
    pub metadata: ArtifactMetadata,
    pub loaded_at: DateTime<Utc>,
}

/// Result of listing a model directory: keys seen, plus file names that
/// looked like artifacts but did not parse as a key.
#[derive(Debug, Default)]
pub struct DirectoryListing {
    pub keys: BTreeSet<ModelKey>,
    pub unrecognized: Vec<(String, KeyParseError)>,
}

pub fn list_artifacts(dir: &Path) -> Result<DirectoryListing, RegistryError> {
    if !dir.is_dir() {
        return Err(RegistryError::MissingDirectory(dir.to_path_buf()));
    }
    let entries = std::fs::read_dir(dir).map_err(|source| RegistryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut listing = DirectoryListing::default();
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(stem) = ArtifactFile::all()
            .iter()
            .find_map(|f| name.strip_suffix(f.suffix()))
        else {
            continue;
        };

        match ModelKey::from_str(stem) {
            Ok(key) => {
                listing.keys.insert(key);
            }
            Err(e) => {
                debug!("Skipping {}: {}", name, e);
                listing.unrecognized.push((name, e));
            }
        }
    }
    Ok(listing)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let text = std::fs::read_to_string(path).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| ArtifactError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ArtifactError> {
    if path.exists() {
        read_json(path).map(Some)
    } else {
        Ok(None)
    }
}

/// Load and validate one key's files. Blocking; run off the async workers.
pub fn load_artifact(dir: &Path, key: &ModelKey) -> Result<ModelArtifact, ArtifactError> {
    let model_path = artifact_path(dir, key, ArtifactFile::Model);
    let features_path = artifact_path(dir, key, ArtifactFile::Features);
    for (path, file) in [(&model_path, ArtifactFile::Model), (&features_path, ArtifactFile::Features)] {
        if !path.exists() {
            return Err(ArtifactError::Missing { key: key.clone(), kind: file.label() });
        }
    }

    let classifier: Classifier = read_json(&model_path)?;
    classifier.validate()?;

    let scaler: Option<StandardScaler> = read_optional(&artifact_path(dir, key, ArtifactFile::Scaler))?;
    if let Some(scaler) = &scaler {
        scaler.validate()?;
    }

    let names: Vec<String> = read_json(&features_path)?;
    let (feature_schema, reconciliation) = reconcile_schema(names);
    if reconciliation != Reconciliation::Unchanged {
        info!("Reconciled feature list for {}: {:?}", key, reconciliation);
    }

    if classifier.n_features() != feature_schema.len() {
        return Err(ArtifactError::ShapeMismatch {
            key: key.clone(),
            component: "classifier",
            expected: classifier.n_features(),
            actual: feature_schema.len(),
        });
    }
    if let Some(scaler) = &scaler {
        if scaler.n_features() != feature_schema.len() {
            return Err(ArtifactError::ShapeMismatch {
                key: key.clone(),
                component: "scaler",
                expected: scaler.n_features(),
                actual: feature_schema.len(),
            });
        }
    }

    let metadata = read_optional(&artifact_path(dir, key, ArtifactFile::Meta))?.unwrap_or_default();

    Ok(ModelArtifact {
        key: key.clone(),
        classifier,
        scaler,
        feature_schema,
        reconciliation,
        metadata,
        loaded_at: Utc::now(),
    })
}
