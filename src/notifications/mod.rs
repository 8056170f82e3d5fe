use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::ConfigChangeEvent;
use crate::types::ModelKey;

const MAX_NOTIFICATIONS: usize = 500;

/// Notification severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Types of notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AlertType {
    // Retraining
    RetrainingQueued {
        model_key: ModelKey,
        metric: String,
        value: f64,
    },
    RetrainingCompleted {
        model_key: ModelKey,
        duration_secs: u64,
    },
    RetrainingFailed {
        model_key: ModelKey,
        attempt: u32,
        reason: String,
    },
    RetrainingEscalated {
        model_key: ModelKey,
        attempts: u32,
        reason: String,
    },
    WarningAlertRecorded {
        model_key: String,
        metric: String,
        value: f64,
    },

    // Registry
    ModelsReloaded {
        generation: u64,
        models_loaded: usize,
    },
    ReloadFailed {
        reason: String,
    },

    // System
    ConnectionLost {
        service: String,
        reason: String,
    },
    ConnectionRestored {
        service: String,
    },
    ControllerStarted,
    ControllerStopped,
    ControllerPaused,
    ControllerResumed,
    ConfigurationChanged {
        setting: String,
    },
}

impl AlertType {
    /// Get default severity for this alert type
    pub fn default_severity(&self) -> Severity {
        match self {
            AlertType::RetrainingEscalated { .. } => Severity::Critical,
            AlertType::ReloadFailed { .. } => Severity::Critical,

            AlertType::RetrainingFailed { .. } => Severity::Warning,
            AlertType::WarningAlertRecorded { .. } => Severity::Warning,
            AlertType::ConnectionLost { .. } => Severity::Warning,

            _ => Severity::Info,
        }
    }

    /// Get a human-readable title for this alert
    pub fn title(&self) -> String {
        match self {
            AlertType::RetrainingQueued { model_key, .. } => format!("Retraining Queued: {}", model_key),
            AlertType::RetrainingCompleted { model_key, .. } => format!("Retraining Completed: {}", model_key),
            AlertType::RetrainingFailed { model_key, attempt, .. } => {
                format!("Retraining Failed: {} (attempt {})", model_key, attempt)
            }
            AlertType::RetrainingEscalated { model_key, .. } => {
                format!("RETRAINING ESCALATED: {} needs manual review", model_key)
            }
            AlertType::WarningAlertRecorded { model_key, metric, .. } => {
                format!("Warning for {}: {}", model_key, metric)
            }

            AlertType::ModelsReloaded { generation, models_loaded } => {
                format!("Models Reloaded: generation {} ({} models)", generation, models_loaded)
            }
            AlertType::ReloadFailed { .. } => "MODEL RELOAD FAILED".to_string(),

            AlertType::ConnectionLost { service, .. } => format!("Connection Lost: {}", service),
            AlertType::ConnectionRestored { service } => format!("Connection Restored: {}", service),
            AlertType::ControllerStarted => "Retraining Controller Started".to_string(),
            AlertType::ControllerStopped => "Retraining Controller Stopped".to_string(),
            AlertType::ControllerPaused => "Retraining Controller Paused".to_string(),
            AlertType::ControllerResumed => "Retraining Controller Resumed".to_string(),
            AlertType::ConfigurationChanged { setting } => format!("Config Changed: {}", setting),
        }
    }
}

/// A notification/alert
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub title: String,
    pub alert_type: AlertType,
    pub acknowledged: bool,
}

impl Notification {
    pub fn new(alert_type: AlertType) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            severity: alert_type.default_severity(),
            title: alert_type.title(),
            alert_type,
            acknowledged: false,
        }
    }
}

/// In-memory notification feed, newest first
#[derive(Clone)]
pub struct NotificationManager {
    notifications: Arc<RwLock<Vec<Notification>>>,
    max_notifications: usize,
}

impl NotificationManager {
    pub fn new() -> Self {
        Self {
            notifications: Arc::new(RwLock::new(Vec::new())),
            max_notifications: MAX_NOTIFICATIONS,
        }
    }

    pub async fn notify(&self, alert_type: AlertType) {
        let notification = Notification::new(alert_type);

        match notification.severity {
            Severity::Critical => error!("{} - {:?}", notification.title, notification.alert_type),
            Severity::Warning => warn!("{} - {:?}", notification.title, notification.alert_type),
            Severity::Info => info!("{}", notification.title),
        }

        let mut notifications = self.notifications.write().await;
        notifications.insert(0, notification);
        if notifications.len() > self.max_notifications {
            notifications.truncate(self.max_notifications);
        }
    }

    pub async fn get_recent(&self, limit: usize) -> Vec<Notification> {
        let notifications = self.notifications.read().await;
        notifications.iter().take(limit).cloned().collect()
    }

    pub async fn get_critical_unacknowledged(&self) -> Vec<Notification> {
        let notifications = self.notifications.read().await;
        notifications
            .iter()
            .filter(|n| n.severity == Severity::Critical && !n.acknowledged)
            .cloned()
            .collect()
    }

    /// Returns false when no notification has that id.
    pub async fn acknowledge(&self, id: &str) -> bool {
        let mut notifications = self.notifications.write().await;
        match notifications.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.acknowledged = true;
                true
            }
            None => false,
        }
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.notifications.read().await.len()
    }

    /// Turn runtime config changes into feed entries until the sender goes away.
    pub fn watch_config(&self, mut changes: broadcast::Receiver<ConfigChangeEvent>) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(event) => {
                        manager
                            .notify(AlertType::ConfigurationChanged {
                                setting: event.setting(),
                            })
                            .await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {} configuration change events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}
