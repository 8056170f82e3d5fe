pub mod client;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

use crate::error::ConnectivityError;
use crate::types::ModelKey;

pub use client::HttpAnalyticsClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Critical,
    Warning,
    #[serde(other)]
    Info,
}

/// Drift or performance alert raised by the analytics service against one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub model_key: String,
    pub severity: AlertSeverity,
    #[serde(default)]
    pub metric: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default = "Utc::now", alias = "timestamp")]
    pub detected_at: DateTime<Utc>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Alert {
    pub fn key(&self) -> Option<ModelKey> {
        ModelKey::from_str(&self.model_key).ok()
    }

    pub fn is_critical(&self) -> bool {
        self.severity == AlertSeverity::Critical
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
    #[serde(other)]
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }

    pub fn allows_trading(&self) -> bool {
        *self != HealthStatus::Critical
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub model_key: String,
    pub status: HealthStatus,
    #[serde(default)]
    pub last_trained_at: Option<DateTime<Utc>>,
    /// Rolling performance figures (accuracy, precision, ...), as reported
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

#[derive(Debug, Deserialize)]
pub struct AlertsResponse {
    #[serde(default)]
    pub alerts: Vec<Alert>,
}

#[derive(Debug, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub models: Vec<HealthRecord>,
}

/// The external analytics collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    async fn fetch_alerts(&self) -> Result<Vec<Alert>, ConnectivityError>;
    async fn fetch_health(&self) -> Result<Vec<HealthRecord>, ConnectivityError>;
}

/// Last known health per model plus the monitor's connectivity flag.
///
/// While the analytics service is unreachable the cached records stay
/// authoritative; nothing is expired until a fresh poll replaces them.
#[derive(Default)]
pub struct HealthCache {
    records: RwLock<HashMap<ModelKey, HealthRecord>>,
    last_success: RwLock<Option<DateTime<Utc>>>,
    degraded: AtomicBool,
}

impl HealthCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, records: Vec<HealthRecord>) {
        let mut parsed = HashMap::with_capacity(records.len());
        for record in records {
            match ModelKey::from_str(&record.model_key) {
                Ok(key) => {
                    parsed.insert(key, record);
                }
                Err(e) => debug!("Ignoring health record for {}: {}", record.model_key, e),
            }
        }
        *self.records.write() = parsed;
        *self.last_success.write() = Some(Utc::now());
    }

    pub fn status_for(&self, key: &ModelKey) -> HealthStatus {
        self.records
            .read()
            .get(key)
            .map(|r| r.status)
            .unwrap_or(HealthStatus::Unknown)
    }

    pub fn records(&self) -> Vec<HealthRecord> {
        let mut records: Vec<HealthRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| a.model_key.cmp(&b.model_key));
        records
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.read()
    }

    /// Returns the previous value so callers can notify on transitions.
    pub fn set_degraded(&self, degraded: bool) -> bool {
        self.degraded.swap(degraded, Ordering::SeqCst)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_payload_parsing() {
        let body = r#"{"alerts":[
            {"model_key":"buy_EURUSD_PERIOD_M5","severity":"critical","metric":"accuracy","value":0.41,"detected_at":"2024-03-15T10:00:00Z"},
            {"model_key":"sell_EURUSD_PERIOD_M5","severity":"notice","timestamp":"2024-03-15T11:00:00Z"}
        ]}"#;
        let parsed: AlertsResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.alerts.len(), 2);
        assert!(parsed.alerts[0].is_critical());
        assert_eq!(parsed.alerts[0].key().unwrap().symbol, "EURUSD");
        assert_eq!(parsed.alerts[1].severity, AlertSeverity::Info);
    }

    #[test]
    fn test_health_cache_defaults_to_unknown() {
        let cache = HealthCache::new();
        let key = ModelKey::from_str("buy_EURUSD_PERIOD_M5").unwrap();
        assert_eq!(cache.status_for(&key), HealthStatus::Unknown);
        assert!(cache.status_for(&key).allows_trading());

        cache.update(vec![HealthRecord {
            model_key: "buy_EURUSD_PERIOD_M5".to_string(),
            status: HealthStatus::Critical,
            last_trained_at: None,
            metrics: BTreeMap::new(),
        }]);
        assert_eq!(cache.status_for(&key), HealthStatus::Critical);
        assert!(!cache.status_for(&key).allows_trading());
        assert!(cache.last_success().is_some());
    }

    #[test]
    fn test_degraded_flag_reports_transitions() {
        let cache = HealthCache::new();
        assert!(!cache.set_degraded(true));
        assert!(cache.set_degraded(true));
        assert!(cache.is_degraded());
        assert!(cache.set_degraded(false));
    }

    #[test]
    fn test_unknown_health_status_string() {
        let record: HealthRecord =
            serde_json::from_str(r#"{"model_key":"buy_EURUSD_PERIOD_M5","status":"stale"}"#).unwrap();
        assert_eq!(record.status, HealthStatus::Unknown);
    }
}
