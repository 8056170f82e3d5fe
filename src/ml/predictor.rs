use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ndarray::Array1;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use crate::analytics::{HealthCache, HealthRecord, HealthStatus};
use crate::error::{PredictionError, RegistryError};
use crate::ml::features::{normalize, RawFeatures, Reconciliation};
use crate::ml::persistence::{ModelArtifact, ModelMetrics};
use crate::ml::registry::{ModelRegistry, RegistryStats, ScanReport};
use crate::ml::tracker::{MetricsSummary, ModelUsage, ServiceMetrics};
use crate::notifications::{AlertType, NotificationManager};
use crate::risk::{RiskManager, SizingRequest, TradeParameters};
use crate::types::{Direction, ModelKey, ModelType, TimeFrame};

/// Probability at or above which a model's positive class wins.
const DECISION_BOUNDARY: f64 = 0.5;

fn default_direction() -> String {
    "buy".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionRequest {
    #[serde(default)]
    pub strategy: String,
    pub symbol: String,
    pub timeframe: String,
    #[serde(default = "default_direction")]
    pub direction: String,
    #[serde(default)]
    pub features: serde_json::Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeDecisionRequest {
    #[serde(flatten)]
    pub prediction: PredictionRequest,
    pub entry_price: Decimal,
    #[serde(default)]
    pub atr: Option<Decimal>,
    #[serde(default)]
    pub account_balance: Option<Decimal>,
    #[serde(default)]
    pub risk_per_pip: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResult {
    pub direction: Direction,
    pub probability: f64,
    pub confidence: f64,
    pub model_key: ModelKey,
    pub model_version: String,
    pub generation: u64,
    pub timestamp: DateTime<Utc>,
}

/// Coarse failure class, used to pick an HTTP status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    BadRequest,
    NotFound,
    Internal,
}

impl From<&PredictionError> for FailureKind {
    fn from(err: &PredictionError) -> Self {
        match err {
            PredictionError::InvalidRequest(_) => FailureKind::BadRequest,
            PredictionError::Registry(RegistryError::NotFound { .. }) => FailureKind::NotFound,
            _ => FailureKind::Internal,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PredictionResponse {
    pub status: ResponseStatus,
    #[serde(skip)]
    pub failure: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub strategy: String,
    pub symbol: String,
    pub timeframe: String,
}

impl PredictionResponse {
    fn failure(kind: FailureKind, strategy: &str, symbol: &str, timeframe: &str, reason: String) -> Self {
        Self {
            status: ResponseStatus::Error,
            failure: Some(kind),
            prediction: None,
            error: Some(reason),
            strategy: strategy.to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TradeDecision {
    pub status: ResponseStatus,
    #[serde(skip)]
    pub failure: Option<FailureKind>,
    pub should_trade: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trade_parameters: Option<TradeParameters>,
    pub confidence_threshold: f64,
    pub model_health: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prediction: Option<PredictionResult>,
    /// Why the trade was declined, when it was
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub status: &'static str,
    pub models_loaded: usize,
    pub available_models: Vec<ModelKey>,
    pub prediction_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub uptime_seconds: u64,
    pub generation: u64,
    pub reload_count: u64,
    pub last_reload_at: Option<DateTime<Utc>>,
    pub analytics_degraded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub models_loaded: usize,
    pub generation: u64,
    pub report: ScanReport,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelVersionInfo {
    pub model_key: ModelKey,
    pub version: String,
    pub classifier: &'static str,
    pub trained_at: Option<DateTime<Utc>>,
    pub loaded_at: DateTime<Utc>,
    pub feature_count: usize,
    pub has_scaler: bool,
    pub reconciliation: Reconciliation,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceReport {
    pub summary: MetricsSummary,
    pub per_model: BTreeMap<ModelKey, ModelUsage>,
    pub registry: RegistryStats,
    pub health: Vec<HealthRecord>,
}

/// Something that can republish the active model set.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelReloader: Send + Sync {
    async fn reload_models(&self) -> Result<ReloadSummary, RegistryError>;
}

/// Serves predictions and trade decisions against the registry's current snapshot.
pub struct PredictionEngine {
    registry: Arc<ModelRegistry>,
    metrics: ServiceMetrics,
    health: Arc<HealthCache>,
    risk: RiskManager,
    notifications: NotificationManager,
}

impl PredictionEngine {
    pub fn new(
        registry: Arc<ModelRegistry>,
        health: Arc<HealthCache>,
        risk: RiskManager,
        notifications: NotificationManager,
    ) -> Self {
        Self {
            registry,
            metrics: ServiceMetrics::new(),
            health,
            risk,
            notifications,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    /// Never fails: every error becomes a `status: error` response and is counted.
    pub fn get_prediction(&self, request: &PredictionRequest) -> PredictionResponse {
        match self.predict(request) {
            Ok(result) => {
                self.metrics
                    .record_success(&result.model_key, result.direction, result.confidence);
                debug!(
                    "{} {} {} -> {} p={:.4} conf={:.4} [{}]",
                    request.strategy,
                    request.symbol,
                    request.timeframe,
                    result.direction,
                    result.probability,
                    result.confidence,
                    result.model_key
                );
                PredictionResponse {
                    status: ResponseStatus::Success,
                    failure: None,
                    prediction: Some(result),
                    error: None,
                    strategy: request.strategy.clone(),
                    symbol: request.symbol.clone(),
                    timeframe: request.timeframe.clone(),
                }
            }
            Err(e) => {
                let reason = e.to_string();
                self.metrics.record_error(&reason);
                PredictionResponse::failure(
                    FailureKind::from(&e),
                    &request.strategy,
                    &request.symbol,
                    &request.timeframe,
                    reason,
                )
            }
        }
    }

    fn predict(&self, request: &PredictionRequest) -> Result<PredictionResult, PredictionError> {
        if request.symbol.trim().is_empty() {
            return Err(PredictionError::InvalidRequest("symbol is required".to_string()));
        }
        let timeframe = TimeFrame::from_str(&request.timeframe)
            .map_err(|e| PredictionError::InvalidRequest(e.to_string()))?;
        let direction = Direction::from_str(&request.direction)
            .map_err(|e| PredictionError::InvalidRequest(e.to_string()))?;

        // One snapshot for the whole request.
        let snapshot = self.registry.snapshot();
        let artifact = snapshot.lookup(&request.symbol, timeframe, direction)?;

        let raw = RawFeatures::from_json_map(&request.features);
        let probability = run_model(&artifact, &raw)?;
        let confidence = probability.max(1.0 - probability);

        Ok(PredictionResult {
            direction: predicted_direction(artifact.key.model_type, probability),
            probability,
            confidence,
            model_key: artifact.key.clone(),
            model_version: artifact.metadata.version.to_string(),
            generation: snapshot.generation,
            timestamp: Utc::now(),
        })
    }

    /// Prediction plus policy: trade only on a directional call whose confidence
    /// clears the symbol's threshold while the model is not critical.
    pub async fn trade_decision(&self, request: &TradeDecisionRequest) -> TradeDecision {
        let thresholds = self
            .risk
            .config()
            .thresholds_for(&request.prediction.symbol)
            .await;
        let response = self.get_prediction(&request.prediction);

        let prediction = match response.prediction {
            Some(prediction) => prediction,
            None => {
                return TradeDecision {
                    status: ResponseStatus::Error,
                    failure: response.failure,
                    should_trade: false,
                    trade_parameters: None,
                    confidence_threshold: thresholds.min_confidence,
                    model_health: HealthStatus::Unknown,
                    prediction: None,
                    reason: None,
                    error: response.error,
                }
            }
        };

        let model_health = self.health.status_for(&prediction.model_key);
        let decline = if prediction.direction == Direction::Hold {
            Some("model predicts hold".to_string())
        } else if prediction.confidence < thresholds.min_confidence {
            Some(format!(
                "confidence {:.3} below threshold {:.3}",
                prediction.confidence, thresholds.min_confidence
            ))
        } else if !model_health.allows_trading() {
            Some(format!("model health is {}", model_health.as_str()))
        } else {
            None
        };

        let (trade_parameters, reason) = match decline {
            Some(reason) => (None, Some(reason)),
            None => {
                let sizing = SizingRequest {
                    symbol: request.prediction.symbol.clone(),
                    direction: prediction.direction,
                    entry_price: request.entry_price,
                    atr: request.atr,
                    account_balance: request.account_balance,
                    risk_per_pip: request.risk_per_pip,
                };
                match self.risk.plan_trade(&sizing).await {
                    Ok(params) => (Some(params), None),
                    Err(reason) => (None, Some(reason)),
                }
            }
        };

        if let Some(params) = &trade_parameters {
            info!(
                "Trade approved: {} {} conf={:.3} entry={} sl={} tp={} lots={}",
                prediction.model_key,
                prediction.direction,
                prediction.confidence,
                params.entry_price,
                params.stop_loss,
                params.take_profit,
                params.lot_size
            );
        }

        TradeDecision {
            status: ResponseStatus::Success,
            failure: None,
            should_trade: trade_parameters.is_some(),
            trade_parameters,
            confidence_threshold: thresholds.min_confidence,
            model_health,
            prediction: Some(prediction),
            reason,
            error: None,
        }
    }

    /// One result per item, in order. A malformed item fails alone.
    pub fn bulk_predict(&self, items: Vec<Value>) -> Vec<PredictionResponse> {
        items
            .into_iter()
            .map(|item| match serde_json::from_value::<PredictionRequest>(item.clone()) {
                Ok(request) => self.get_prediction(&request),
                Err(e) => {
                    let reason = format!("Invalid request: {}", e);
                    self.metrics.record_error(&reason);
                    let field = |name: &str| item.get(name).and_then(Value::as_str).unwrap_or_default().to_string();
                    PredictionResponse::failure(
                        FailureKind::BadRequest,
                        &field("strategy"),
                        &field("symbol"),
                        &field("timeframe"),
                        reason,
                    )
                }
            })
            .collect()
    }

    /// Count a request body that never reached the engine.
    pub fn record_rejected(&self, reason: &str) {
        self.metrics.record_error(reason);
    }

    pub fn status(&self) -> ServiceStatus {
        let snapshot = self.registry.snapshot();
        let stats = self.registry.stats();
        let summary = self.metrics.summary();
        let analytics_degraded = self.health.is_degraded();

        ServiceStatus {
            status: if snapshot.is_empty() || analytics_degraded { "degraded" } else { "healthy" },
            models_loaded: snapshot.len(),
            available_models: snapshot.keys(),
            prediction_count: summary.prediction_count,
            error_count: summary.error_count,
            success_rate: summary.success_rate,
            uptime_seconds: summary.uptime_seconds,
            generation: snapshot.generation,
            reload_count: stats.reload_count,
            last_reload_at: stats.last_reload_at,
            analytics_degraded,
        }
    }

    pub fn model_versions(&self) -> Vec<ModelVersionInfo> {
        let snapshot = self.registry.snapshot();
        let mut versions: Vec<ModelVersionInfo> = snapshot
            .models
            .values()
            .map(|a| ModelVersionInfo {
                model_key: a.key.clone(),
                version: a.metadata.version.to_string(),
                classifier: a.classifier.kind(),
                trained_at: a.metadata.trained_at,
                loaded_at: a.loaded_at,
                feature_count: a.feature_schema.len(),
                has_scaler: a.scaler.is_some(),
                reconciliation: a.reconciliation,
                metrics: a.metadata.metrics.clone(),
            })
            .collect();
        versions.sort_by(|a, b| a.model_key.cmp(&b.model_key));
        versions
    }

    pub fn performance(&self) -> PerformanceReport {
        PerformanceReport {
            summary: self.metrics.summary(),
            per_model: self.metrics.per_model(),
            registry: self.registry.stats(),
            health: self.health.records(),
        }
    }
}

#[async_trait]
impl ModelReloader for PredictionEngine {
    async fn reload_models(&self) -> Result<ReloadSummary, RegistryError> {
        match self.registry.reload().await {
            Ok(report) => {
                let snapshot = self.registry.snapshot();
                self.notifications
                    .notify(AlertType::ModelsReloaded {
                        generation: snapshot.generation,
                        models_loaded: snapshot.len(),
                    })
                    .await;
                Ok(ReloadSummary {
                    models_loaded: snapshot.len(),
                    generation: snapshot.generation,
                    report,
                })
            }
            Err(e) => {
                self.notifications
                    .notify(AlertType::ReloadFailed { reason: e.to_string() })
                    .await;
                Err(e)
            }
        }
    }
}

fn run_model(artifact: &ModelArtifact, raw: &RawFeatures) -> Result<f64, PredictionError> {
    let vector = Array1::from(normalize(raw, &artifact.feature_schema));
    let input = match &artifact.scaler {
        Some(scaler) => scaler.transform(&vector)?,
        None => vector,
    };
    artifact.classifier.predict_probability(input.view())
}

fn predicted_direction(model_type: ModelType, probability: f64) -> Direction {
    let positive = probability >= DECISION_BOUNDARY;
    match (model_type, positive) {
        (ModelType::Buy, true) => Direction::Buy,
        (ModelType::Sell, true) => Direction::Sell,
        (ModelType::Combined, true) => Direction::Buy,
        (ModelType::Combined, false) => Direction::Sell,
        (_, false) => Direction::Hold,
    }
}
