use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::AppState;
use crate::config::{RiskSettings, SymbolThresholds, TradingSettings};
use crate::error::RegistryError;
use crate::ml::predictor::FailureKind;
use crate::ml::{ModelReloader, PredictionRequest, TradeDecisionRequest};

const DEFAULT_NOTIFICATION_LIMIT: usize = 50;

fn error_response(code: StatusCode, message: impl Into<String>) -> Response {
    (code, Json(json!({"status": "error", "error": message.into()}))).into_response()
}

fn failure_status(kind: Option<FailureKind>) -> StatusCode {
    match kind {
        Some(FailureKind::BadRequest) => StatusCode::BAD_REQUEST,
        Some(FailureKind::NotFound) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Unwrap a JSON body, counting bodies that fail to parse against the engine.
fn parse_body<T>(state: &AppState, payload: Result<Json<T>, JsonRejection>) -> Result<T, Response> {
    match payload {
        Ok(Json(body)) => Ok(body),
        Err(rejection) => {
            let reason = format!("Invalid request: {}", rejection.body_text());
            debug!("{}", reason);
            state.engine.record_rejected(&reason);
            Err(error_response(rejection.status(), reason))
        }
    }
}

// === Service ===

pub async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.engine.status())
}

// === Prediction ===

pub async fn post_predict(
    State(state): State<AppState>,
    payload: Result<Json<PredictionRequest>, JsonRejection>,
) -> Response {
    let request = match parse_body(&state, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let response = state.engine.get_prediction(&request);
    let code = if response.is_success() {
        StatusCode::OK
    } else {
        failure_status(response.failure)
    };
    (code, Json(response)).into_response()
}

pub async fn post_trade_decision(
    State(state): State<AppState>,
    payload: Result<Json<TradeDecisionRequest>, JsonRejection>,
) -> Response {
    let request = match parse_body(&state, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let decision = state.engine.trade_decision(&request).await;
    let code = match decision.failure {
        None => StatusCode::OK,
        kind => failure_status(kind),
    };
    (code, Json(decision)).into_response()
}

#[derive(Deserialize)]
pub struct BulkPredictRequest {
    pub requests: Vec<Value>,
}

pub async fn post_bulk_predict(
    State(state): State<AppState>,
    payload: Result<Json<BulkPredictRequest>, JsonRejection>,
) -> Response {
    let request = match parse_body(&state, payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let results = state.engine.bulk_predict(request.requests);
    let succeeded = results.iter().filter(|r| r.is_success()).count();
    (
        StatusCode::OK,
        Json(json!({
            "status": "success",
            "count": results.len(),
            "succeeded": succeeded,
            "results": results,
        })),
    )
        .into_response()
}

// === Models ===

pub async fn post_reload_models(State(state): State<AppState>) -> Response {
    match state.engine.reload_models().await {
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "models_loaded": summary.models_loaded,
                "generation": summary.generation,
                "report": summary.report,
            })),
        )
            .into_response(),
        Err(e) => {
            warn!("Manual reload failed: {}", e);
            let code = match e {
                RegistryError::EmptyScan { .. } | RegistryError::MissingDirectory(_) => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            let snapshot = state.engine.registry().snapshot();
            (
                code,
                Json(json!({
                    "status": "error",
                    "error": e.to_string(),
                    "models_loaded": snapshot.len(),
                    "generation": snapshot.generation,
                })),
            )
                .into_response()
        }
    }
}

pub async fn get_model_versions(State(state): State<AppState>) -> impl IntoResponse {
    let models = state.engine.model_versions();
    Json(json!({
        "status": "success",
        "count": models.len(),
        "models": models,
    }))
}

pub async fn get_performance(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "success",
        "performance": state.engine.performance(),
    }))
}

// === Retraining ===

pub async fn get_retraining_status(State(state): State<AppState>) -> impl IntoResponse {
    let controller = state.controller.get_state().await;
    Json(json!({
        "status": "success",
        "monitoring_enabled": state.controller.scheduler().monitoring_enabled(),
        "controller": controller,
    }))
}

pub async fn post_retraining_check(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.controller.run_once().await;
    Json(json!({"status": "success", "report": report}))
}

pub async fn post_retraining_pause(State(state): State<AppState>) -> Response {
    match state.controller.pause().await {
        Ok(()) => {
            let controller = state.controller.get_state().await;
            (StatusCode::OK, Json(json!({"status": "success", "controller": controller}))).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

pub async fn post_retraining_resume(State(state): State<AppState>) -> Response {
    match state.controller.resume().await {
        Ok(()) => {
            let controller = state.controller.get_state().await;
            (StatusCode::OK, Json(json!({"status": "success", "controller": controller}))).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

// === Configuration ===

pub async fn get_trading_config(State(state): State<AppState>) -> impl IntoResponse {
    let config = state.config_manager.get_config().await;
    Json(json!({"status": "success", "config": config}))
}

/// Replaces the whole trading section; omitted fields take their defaults.
pub async fn put_trading_config(
    State(state): State<AppState>,
    payload: Result<Json<TradingSettings>, JsonRejection>,
) -> Response {
    let settings = match payload {
        Ok(Json(settings)) => settings.normalized(),
        Err(rejection) => return error_response(rejection.status(), rejection.body_text()),
    };

    let result = state.config_manager.update_full(settings).await;
    config_update_response(&state, result).await
}

pub async fn put_default_thresholds(
    State(state): State<AppState>,
    payload: Result<Json<SymbolThresholds>, JsonRejection>,
) -> Response {
    let thresholds = match payload {
        Ok(Json(thresholds)) => thresholds,
        Err(rejection) => return error_response(rejection.status(), rejection.body_text()),
    };
    let result = state.config_manager.update_default(thresholds).await;
    config_update_response(&state, result).await
}

pub async fn put_symbol_thresholds(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    payload: Result<Json<SymbolThresholds>, JsonRejection>,
) -> Response {
    let thresholds = match payload {
        Ok(Json(thresholds)) => thresholds,
        Err(rejection) => return error_response(rejection.status(), rejection.body_text()),
    };
    let result = state.config_manager.update_symbol(&symbol, thresholds).await;
    config_update_response(&state, result).await
}

pub async fn put_risk_settings(
    State(state): State<AppState>,
    payload: Result<Json<RiskSettings>, JsonRejection>,
) -> Response {
    let settings = match payload {
        Ok(Json(settings)) => settings,
        Err(rejection) => return error_response(rejection.status(), rejection.body_text()),
    };
    let result = state.config_manager.update_risk(settings).await;
    config_update_response(&state, result).await
}

async fn config_update_response(state: &AppState, result: Result<(), String>) -> Response {
    match result {
        Ok(()) => {
            let config = state.config_manager.get_config().await;
            (StatusCode::OK, Json(json!({"status": "success", "config": config}))).into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, e),
    }
}

// === Notifications ===

#[derive(Deserialize)]
pub struct NotificationQuery {
    pub limit: Option<usize>,
    #[serde(default)]
    pub critical: bool,
}

pub async fn get_notifications(
    State(state): State<AppState>,
    Query(query): Query<NotificationQuery>,
) -> impl IntoResponse {
    let notifications = if query.critical {
        state.notifications.get_critical_unacknowledged().await
    } else {
        state
            .notifications
            .get_recent(query.limit.unwrap_or(DEFAULT_NOTIFICATION_LIMIT))
            .await
    };
    Json(json!({"status": "success", "notifications": notifications}))
}

#[derive(Deserialize)]
pub struct AcknowledgeRequest {
    pub id: String,
}

pub async fn post_acknowledge_notification(
    State(state): State<AppState>,
    payload: Result<Json<AcknowledgeRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(rejection.status(), rejection.body_text()),
    };

    if state.notifications.acknowledge(&request.id).await {
        (StatusCode::OK, Json(json!({"status": "success"}))).into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, format!("Notification {} not found", request.id))
    }
}

pub async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}
