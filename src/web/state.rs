use std::sync::Arc;

use crate::config::TradingConfigManager;
use crate::engine::RetrainingController;
use crate::ml::PredictionEngine;
use crate::notifications::NotificationManager;

/// Shared handles for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PredictionEngine>,
    pub controller: Arc<RetrainingController>,
    pub config_manager: TradingConfigManager,
    pub notifications: NotificationManager,
}
