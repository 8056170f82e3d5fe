use axum::{
    routing::{get, post, put},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use super::{api, AppState};

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Service
        .route("/api/health", get(api::get_health))
        // Prediction
        .route("/api/predict", post(api::post_predict))
        .route("/api/trade_decision", post(api::post_trade_decision))
        .route("/api/bulk_predict", post(api::post_bulk_predict))
        // Models
        .route("/api/reload_models", post(api::post_reload_models))
        .route("/api/model_versions", get(api::get_model_versions))
        .route("/api/performance", get(api::get_performance))
        // Retraining
        .route("/api/retraining/status", get(api::get_retraining_status))
        .route("/api/retraining/check", post(api::post_retraining_check))
        .route("/api/retraining/pause", post(api::post_retraining_pause))
        .route("/api/retraining/resume", post(api::post_retraining_resume))
        // Config
        .route(
            "/api/config/trading",
            get(api::get_trading_config).put(api::put_trading_config),
        )
        .route("/api/config/trading/default", put(api::put_default_thresholds))
        .route("/api/config/trading/risk", put(api::put_risk_settings))
        .route("/api/config/trading/symbols/:symbol", put(api::put_symbol_thresholds))
        // Notifications
        .route("/api/notifications", get(api::get_notifications))
        .route("/api/notifications/acknowledge", post(api::post_acknowledge_notification))
        .fallback(api::not_found)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);

    let ip: std::net::IpAddr = host.parse()?;
    let addr = SocketAddr::new(ip, port);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Model server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Model server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::HealthCache;
    use crate::config::{RetrainingSettings, TradingConfigManager, TradingSettings};
    use crate::engine::{RetrainingController, RetrainingScheduler, UnconfiguredTrainer};
    use crate::ml::persistence::fixtures::write_canonical;
    use crate::ml::{ModelRegistry, PredictionEngine};
    use crate::notifications::NotificationManager;
    use crate::risk::RiskManager;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn test_app() -> (TempDir, AppState, Router) {
        let dir = tempfile::tempdir().unwrap();
        write_canonical(dir.path(), "buy_EURUSD_PERIOD_M5", 1.0);
        let registry = Arc::new(ModelRegistry::new(dir.path()));
        registry.reload().await.unwrap();

        let config_manager = TradingConfigManager::new(TradingSettings::default());
        let notifications = NotificationManager::new();
        notifications.watch_config(config_manager.subscribe());
        let health = Arc::new(HealthCache::new());
        let engine = Arc::new(PredictionEngine::new(
            registry,
            Arc::clone(&health),
            RiskManager::new(config_manager.clone()),
            notifications.clone(),
        ));
        let scheduler = Arc::new(RetrainingScheduler::new(
            RetrainingSettings::default(),
            Arc::new(UnconfiguredTrainer),
            engine.clone(),
            None,
            health,
            notifications.clone(),
        ));
        let controller = Arc::new(RetrainingController::new(
            scheduler,
            notifications.clone(),
            Duration::from_secs(3600),
        ));

        let state = AppState {
            engine,
            controller,
            config_manager,
            notifications,
        };
        let router = build_router(state.clone());
        (dir, state, router)
    }

    async fn send(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_loaded_models() {
        let (_dir, _state, router) = test_app().await;
        let (status, body) = send(&router, "GET", "/api/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["models_loaded"], 1);
        assert_eq!(body["available_models"][0], "buy_EURUSD_PERIOD_M5");
    }

    #[tokio::test]
    async fn test_predict_success_and_not_found() {
        let (_dir, _state, router) = test_app().await;
        let request = json!({
            "strategy": "scalper",
            "symbol": "eurusd",
            "timeframe": "PERIOD_M5",
            "direction": "buy",
            "features": {"rsi": 55.0}
        });
        let (status, body) = send(&router, "POST", "/api/predict", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["prediction"]["direction"], "buy");
        assert_eq!(body["prediction"]["model_key"], "buy_EURUSD_PERIOD_M5");

        let missing = json!({"symbol": "NZDCAD", "timeframe": "M5", "features": {}});
        let (status, body) = send(&router, "POST", "/api/predict", Some(missing)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");
    }

    #[tokio::test]
    async fn test_unparseable_body_is_counted() {
        let (_dir, state, router) = test_app().await;
        let request = Request::builder()
            .method("POST")
            .uri("/api/predict")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();

        let response = router.clone().oneshot(request).await.unwrap();
        assert!(response.status().is_client_error());
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(state.engine.status().error_count, 1);
    }

    #[tokio::test]
    async fn test_bulk_predict_keeps_order() {
        let (_dir, _state, router) = test_app().await;
        let request = json!({"requests": [
            {"symbol": "EURUSD", "timeframe": "M5", "features": {}},
            {"symbol": "EURUSD", "timeframe": "M9", "features": {}},
            {"symbol": "EURUSD", "timeframe": "M5", "direction": "sell", "features": {}}
        ]});
        let (status, body) = send(&router, "POST", "/api/bulk_predict", Some(request)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 3);
        assert_eq!(body["results"][0]["status"], "success");
        assert_eq!(body["results"][1]["status"], "error");
        // no sell or combined model for EURUSD
        assert_eq!(body["results"][2]["status"], "error");
        assert_eq!(body["succeeded"], 1);
    }

    #[tokio::test]
    async fn test_trade_decision_route() {
        let (_dir, _state, router) = test_app().await;
        let request = json!({
            "symbol": "EURUSD",
            "timeframe": "M5",
            "direction": "buy",
            "features": {"rsi": 55.0},
            "entry_price": "1.1000",
            "atr": "0.0010",
            "account_balance": "10000"
        });
        let (status, body) = send(&router, "POST", "/api/trade_decision", Some(request)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["should_trade"], true);
        assert_eq!(body["model_health"], "unknown");
        assert!(body["trade_parameters"]["lot_size"].is_string());
    }

    #[tokio::test]
    async fn test_reload_bumps_generation() {
        let (dir, _state, router) = test_app().await;
        write_canonical(dir.path(), "combined_GBPUSD_PERIOD_H1", 0.0);

        let (status, body) = send(&router, "POST", "/api/reload_models", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["models_loaded"], 2);
        assert_eq!(body["generation"], 2);

        let (_, versions) = send(&router, "GET", "/api/model_versions", None).await;
        assert_eq!(versions["count"], 2);
    }

    #[tokio::test]
    async fn test_retraining_controls() {
        let (_dir, state, router) = test_app().await;

        let (status, body) = send(&router, "POST", "/api/retraining/pause", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        state.controller.start().await.unwrap();
        let (status, body) = send(&router, "POST", "/api/retraining/pause", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["controller"]["status"], "Paused");

        let (status, _) = send(&router, "POST", "/api/retraining/resume", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&router, "POST", "/api/retraining/check", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["report"]["monitoring_enabled"], false);

        let (_, body) = send(&router, "GET", "/api/retraining/status", None).await;
        assert_eq!(body["controller"]["status"], "Running");
        assert_eq!(body["controller"]["cycles_run"], 1);
    }

    #[tokio::test]
    async fn test_trading_config_update_and_rejection() {
        let (_dir, state, router) = test_app().await;

        let (_, body) = send(&router, "GET", "/api/config/trading", None).await;
        let mut config = body["config"].clone();
        config["default"]["min_confidence"] = json!(0.7);

        let (status, _) = send(&router, "PUT", "/api/config/trading", Some(config.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(state.config_manager.thresholds_for("NZDCAD").await.min_confidence, 0.7);

        config["default"]["min_confidence"] = json!(1.5);
        let (status, body) = send(&router, "PUT", "/api/config/trading", Some(config)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("min_confidence"));
        assert_eq!(state.config_manager.thresholds_for("NZDCAD").await.min_confidence, 0.7);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let (_, feed) = send(&router, "GET", "/api/notifications", None).await;
        assert_eq!(feed["notifications"][0]["title"], "Config Changed: trading");
    }

    #[tokio::test]
    async fn test_symbol_and_risk_updates() {
        let (_dir, state, router) = test_app().await;

        let thresholds = json!({"min_confidence": 0.75, "pip_size": "0.0001", "max_lot": "2"});
        let (status, body) =
            send(&router, "PUT", "/api/config/trading/symbols/eurusd", Some(thresholds)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["config"]["symbols"]["EURUSD"]["min_confidence"], 0.75);
        assert_eq!(state.config_manager.thresholds_for("EURUSD").await.min_confidence, 0.75);

        let risk = json!({"lot_step": "0"});
        let (status, _) = send(&router, "PUT", "/api/config/trading/risk", Some(risk)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_notification() {
        let (_dir, _state, router) = test_app().await;
        let (status, body) = send(
            &router,
            "POST",
            "/api/notifications/acknowledge",
            Some(json!({"id": "nope"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["status"], "error");

        let (status, _) = send(&router, "GET", "/api/unknown", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
