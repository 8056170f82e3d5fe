use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::RegistryError;
use crate::ml::features::Reconciliation;
use crate::ml::persistence::{list_artifacts, load_artifact, ModelArtifact};
use crate::types::{normalize_symbol, Direction, ModelKey, ModelType, TimeFrame};

/// Immutable set of loaded models. Replaced wholesale on reload, never edited.
#[derive(Debug, Default)]
pub struct ModelSnapshot {
    pub generation: u64,
    pub models: HashMap<ModelKey, Arc<ModelArtifact>>,
    pub published_at: Option<DateTime<Utc>>,
}

impl ModelSnapshot {
    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    pub fn keys(&self) -> Vec<ModelKey> {
        let mut keys: Vec<ModelKey> = self.models.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Exact direction model first, then the combined model for the same market.
    pub fn lookup(
        &self,
        symbol: &str,
        timeframe: TimeFrame,
        direction: Direction,
    ) -> Result<Arc<ModelArtifact>, RegistryError> {
        let symbol = normalize_symbol(symbol);
        let candidates = [direction.preferred_model(), ModelType::Combined];

        candidates
            .iter()
            .find_map(|model_type| self.models.get(&ModelKey::new(*model_type, &symbol, timeframe)))
            .cloned()
            .ok_or(RegistryError::NotFound {
                symbol,
                timeframe,
                direction,
            })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadFailure {
    pub name: String,
    pub reason: String,
}

/// What one directory scan found.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanReport {
    pub loaded: Vec<ModelKey>,
    pub reconciled: Vec<(ModelKey, Reconciliation)>,
    pub failures: Vec<LoadFailure>,
}

/// Load every key in `dir`. A bad key is recorded and skipped; only an
/// unreadable directory fails the whole scan.
pub fn scan_directory(
    dir: &Path,
) -> Result<(HashMap<ModelKey, Arc<ModelArtifact>>, ScanReport), RegistryError> {
    let listing = list_artifacts(dir)?;
    let mut models = HashMap::new();
    let mut report = ScanReport::default();

    for (name, err) in listing.unrecognized {
        report.failures.push(LoadFailure { name, reason: err.to_string() });
    }

    for key in listing.keys {
        match load_artifact(dir, &key) {
            Ok(artifact) => {
                if artifact.reconciliation != Reconciliation::Unchanged {
                    report.reconciled.push((key.clone(), artifact.reconciliation));
                }
                report.loaded.push(key.clone());
                models.insert(key, Arc::new(artifact));
            }
            Err(e) => {
                warn!("Skipping model {}: {}", key, e);
                report.failures.push(LoadFailure {
                    name: key.as_string(),
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok((models, report))
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub generation: u64,
    pub models_loaded: usize,
    pub reload_count: u64,
    pub failed_reloads: u64,
    pub reconciled_total: u64,
    pub last_reload_at: Option<DateTime<Utc>>,
    /// When the active snapshot went live
    pub published_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_failures: Vec<LoadFailure>,
}

#[derive(Debug, Default)]
struct ReloadHistory {
    last_reload_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    last_failures: Vec<LoadFailure>,
}

/// Owner of the active model set.
///
/// Readers take an `Arc` to the current snapshot and keep it for the whole
/// request, so a concurrent reload never shows them a half-built map.
pub struct ModelRegistry {
    directory: PathBuf,
    active: RwLock<Arc<ModelSnapshot>>,
    reload_lock: Mutex<()>,
    reload_count: AtomicU64,
    failed_reloads: AtomicU64,
    reconciled_total: AtomicU64,
    history: RwLock<ReloadHistory>,
}

impl ModelRegistry {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            active: RwLock::new(Arc::new(ModelSnapshot::default())),
            reload_lock: Mutex::new(()),
            reload_count: AtomicU64::new(0),
            failed_reloads: AtomicU64::new(0),
            reconciled_total: AtomicU64::new(0),
            history: RwLock::new(ReloadHistory::default()),
        }
    }

    pub fn snapshot(&self) -> Arc<ModelSnapshot> {
        self.active.read().clone()
    }

    /// Rescan the model directory and publish the result if it holds at least
    /// one model. On any failure the previous snapshot stays active.
    pub async fn reload(&self) -> Result<ScanReport, RegistryError> {
        let _guard = self.reload_lock.lock().await;

        let dir = self.directory.clone();
        let scanned = tokio::task::spawn_blocking(move || scan_directory(&dir))
            .await
            .map_err(|e| RegistryError::Aborted(e.to_string()))
            .and_then(|result| result);

        let (models, report) = match scanned {
            Ok((models, report)) if !models.is_empty() => (models, report),
            Ok((_, report)) => {
                let err = RegistryError::EmptyScan {
                    directory: self.directory.clone(),
                    failures: report.failures.len(),
                };
                return Err(self.record_failure(err, report.failures));
            }
            Err(err) => return Err(self.record_failure(err, Vec::new())),
        };

        let generation = {
            let mut active = self.active.write();
            let generation = active.generation + 1;
            *active = Arc::new(ModelSnapshot {
                generation,
                models,
                published_at: Some(Utc::now()),
            });
            generation
        };

        self.reload_count.fetch_add(1, Ordering::Relaxed);
        self.reconciled_total
            .fetch_add(report.reconciled.len() as u64, Ordering::Relaxed);
        {
            let mut history = self.history.write();
            history.last_reload_at = Some(Utc::now());
            history.last_error = None;
            history.last_failures = report.failures.clone();
        }

        info!(
            "Published model generation {} from {}: {} loaded, {} reconciled, {} failed",
            generation,
            self.directory.display(),
            report.loaded.len(),
            report.reconciled.len(),
            report.failures.len()
        );
        Ok(report)
    }

    fn record_failure(&self, err: RegistryError, failures: Vec<LoadFailure>) -> RegistryError {
        warn!("Model reload failed: {}", err);
        self.failed_reloads.fetch_add(1, Ordering::Relaxed);
        let mut history = self.history.write();
        history.last_error = Some(err.to_string());
        history.last_failures = failures;
        err
    }

    pub fn stats(&self) -> RegistryStats {
        let snapshot = self.snapshot();
        let history = self.history.read();
        RegistryStats {
            generation: snapshot.generation,
            models_loaded: snapshot.len(),
            reload_count: self.reload_count.load(Ordering::Relaxed),
            failed_reloads: self.failed_reloads.load(Ordering::Relaxed),
            reconciled_total: self.reconciled_total.load(Ordering::Relaxed),
            last_reload_at: history.last_reload_at,
            published_at: snapshot.published_at,
            last_error: history.last_error.clone(),
            last_failures: history.last_failures.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::{canonical_schema, CANONICAL_WIDTH};
    use crate::ml::model::{Classifier, DecisionTree};
    use crate::ml::persistence::fixtures::{save_artifact, write_canonical};
    use std::str::FromStr;

    #[tokio::test]
    async fn test_reload_publishes_new_generation() {
        let dir = tempfile::tempdir().unwrap();
        write_canonical(dir.path(), "buy_EURUSD_PERIOD_M5", 0.0);
        write_canonical(dir.path(), "sell_EURUSD_PERIOD_M5", 0.0);

        let registry = ModelRegistry::new(dir.path());
        assert!(registry.snapshot().is_empty());

        let report = registry.reload().await.unwrap();
        assert_eq!(report.loaded.len(), 2);

        let stats = registry.stats();
        assert_eq!(stats.generation, 1);
        assert_eq!(stats.models_loaded, 2);
        assert_eq!(stats.reload_count, 1);
        assert!(stats.last_reload_at.is_some());
        assert_eq!(stats.published_at, registry.snapshot().published_at);
        assert!(stats.published_at.is_some());
    }

    #[tokio::test]
    async fn test_empty_scan_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        write_canonical(dir.path(), "buy_EURUSD_PERIOD_M5", 0.0);
        let registry = ModelRegistry::new(dir.path());
        registry.reload().await.unwrap();

        for entry in std::fs::read_dir(dir.path()).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }

        let err = registry.reload().await.unwrap_err();
        assert!(matches!(err, RegistryError::EmptyScan { .. }));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.generation, 1);
        assert_eq!(snapshot.len(), 1);
        let stats = registry.stats();
        assert_eq!(stats.failed_reloads, 1);
        assert_eq!(stats.published_at, snapshot.published_at);
        assert!(stats.last_error.is_some());
    }

    #[tokio::test]
    async fn test_missing_directory_is_reported() {
        let registry = ModelRegistry::new("/nonexistent/models");
        let err = registry.reload().await.unwrap_err();
        assert!(matches!(err, RegistryError::MissingDirectory(_)));
        assert!(registry.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_bad_key_does_not_block_others() {
        let dir = tempfile::tempdir().unwrap();
        write_canonical(dir.path(), "buy_EURUSD_PERIOD_M5", 0.0);
        let bad = ModelKey::from_str("sell_EURUSD_PERIOD_M5").unwrap();
        std::fs::write(
            crate::ml::persistence::artifact_path(dir.path(), &bad, crate::ml::persistence::ArtifactFile::Model),
            "{}",
        )
        .unwrap();

        let registry = ModelRegistry::new(dir.path());
        let report = registry.reload().await.unwrap();
        assert_eq!(report.loaded.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "sell_EURUSD_PERIOD_M5");
    }

    #[tokio::test]
    async fn test_corrupt_tree_links_only_drop_that_key() {
        let dir = tempfile::tempdir().unwrap();
        write_canonical(dir.path(), "buy_EURUSD_PERIOD_M5", 0.0);
        let corrupt = ModelKey::from_str("sell_EURUSD_PERIOD_M5").unwrap();
        let classifier = Classifier::TreeEnsemble {
            n_features: CANONICAL_WIDTH,
            base_score: 0.0,
            trees: vec![DecisionTree {
                split_features: vec![0],
                thresholds: vec![50.0],
                left_child: vec![i32::MIN],
                right_child: vec![-1],
                leaf_values: vec![0.5],
                shrinkage: 1.0,
            }],
        };
        save_artifact(dir.path(), &corrupt, &classifier, None, &canonical_schema(), None).unwrap();

        let registry = ModelRegistry::new(dir.path());
        let report = registry.reload().await.unwrap();
        assert_eq!(report.loaded.len(), 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].name, "sell_EURUSD_PERIOD_M5");
        assert!(registry.snapshot().lookup("EURUSD", TimeFrame::M5, Direction::Sell).is_err());
    }

    #[tokio::test]
    async fn test_lookup_falls_back_to_combined() {
        let dir = tempfile::tempdir().unwrap();
        write_canonical(dir.path(), "combined_GBPUSD_PERIOD_H1", 0.0);
        write_canonical(dir.path(), "buy_GBPUSD_PERIOD_H1", 0.0);
        let registry = ModelRegistry::new(dir.path());
        registry.reload().await.unwrap();

        let snapshot = registry.snapshot();
        let buy = snapshot.lookup("gbpusd", TimeFrame::H1, Direction::Buy).unwrap();
        assert_eq!(buy.key.model_type, ModelType::Buy);
        let sell = snapshot.lookup("GBPUSD", TimeFrame::H1, Direction::Sell).unwrap();
        assert_eq!(sell.key.model_type, ModelType::Combined);

        let missing = snapshot.lookup("GBPUSD", TimeFrame::M1, Direction::Buy);
        assert!(matches!(missing, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_always_see_complete_key_sets_during_reload() {
        let dir = tempfile::tempdir().unwrap();
        for symbol in ["EURUSD", "GBPUSD", "USDJPY", "XAUUSD"] {
            write_canonical(dir.path(), &format!("buy_{}_PERIOD_M5", symbol), 0.0);
        }
        let registry = Arc::new(ModelRegistry::new(dir.path()));
        registry.reload().await.unwrap();

        let reader = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..500 {
                    let snapshot = registry.snapshot();
                    // Every published generation holds all four keys.
                    assert_eq!(snapshot.len(), 4);
                    for artifact in snapshot.models.values() {
                        assert_eq!(artifact.feature_schema.len(), 28);
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..10 {
            registry.reload().await.unwrap();
        }
        reader.await.unwrap();
        assert_eq!(registry.stats().generation, 11);
    }
}
