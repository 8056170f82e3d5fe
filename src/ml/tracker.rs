use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;

use crate::types::{Direction, ModelKey};

/// Per-model prediction tally
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelUsage {
    pub predictions: u64,
    pub buy_signals: u64,
    pub sell_signals: u64,
    pub hold_signals: u64,
    pub avg_confidence: f64,
    pub last_prediction_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub prediction_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub uptime_seconds: u64,
    pub started_at: DateTime<Utc>,
}

/// Process-lifetime counters for the prediction path.
pub struct ServiceMetrics {
    started: Instant,
    started_at: DateTime<Utc>,
    predictions: AtomicU64,
    errors: AtomicU64,
    per_model: Mutex<BTreeMap<ModelKey, ModelUsage>>,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            predictions: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            per_model: Mutex::new(BTreeMap::new()),
        }
    }

    /// Record a successful prediction
    pub fn record_success(&self, key: &ModelKey, direction: Direction, confidence: f64) {
        self.predictions.fetch_add(1, Ordering::Relaxed);

        let mut per_model = self.per_model.lock();
        let usage = per_model.entry(key.clone()).or_default();
        usage.predictions += 1;
        match direction {
            Direction::Buy => usage.buy_signals += 1,
            Direction::Sell => usage.sell_signals += 1,
            Direction::Hold => usage.hold_signals += 1,
        }
        // Running mean
        usage.avg_confidence += (confidence - usage.avg_confidence) / usage.predictions as f64;
        usage.last_prediction_at = Some(Utc::now());
    }

    pub fn record_error(&self, reason: &str) {
        self.predictions.fetch_add(1, Ordering::Relaxed);
        self.errors.fetch_add(1, Ordering::Relaxed);
        debug!("Prediction failed: {}", reason);
    }

    pub fn summary(&self) -> MetricsSummary {
        // The two counters are read separately, so a concurrent failure can
        // land between the loads and leave errors ahead of predictions.
        let predictions = self.predictions.load(Ordering::Relaxed);
        let errors = self.errors.load(Ordering::Relaxed).min(predictions);
        let success_rate = success_rate(predictions, errors);

        MetricsSummary {
            prediction_count: predictions,
            error_count: errors,
            success_rate,
            uptime_seconds: self.started.elapsed().as_secs(),
            started_at: self.started_at,
        }
    }

    pub fn per_model(&self) -> BTreeMap<ModelKey, ModelUsage> {
        self.per_model.lock().clone()
    }
}

fn success_rate(predictions: u64, errors: u64) -> f64 {
    if predictions == 0 {
        return 1.0;
    }
    let rate = predictions.saturating_sub(errors) as f64 / predictions as f64;
    rate.clamp(0.0, 1.0)
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self::new()
    }
}
