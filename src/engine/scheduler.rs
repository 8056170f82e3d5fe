use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::analytics::{Alert, AnalyticsSource, HealthCache};
use crate::config::RetrainingSettings;
use crate::error::RetrainError;
use crate::ml::ModelReloader;
use crate::notifications::{AlertType, NotificationManager};
use crate::types::ModelKey;

use super::trainer::Trainer;

const JOB_HISTORY: usize = 100;
const ALERT_HISTORY: usize = 100;

/// Retraining lifecycle of one model key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelState {
    Healthy,
    Queued,
    Running,
    Failed,
    /// Attempt cap reached; waits for the alert to clear or manual action
    Escalated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Done,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrainingJob {
    pub model_key: ModelKey,
    pub state: JobState,
    pub attempt: u32,
    pub trigger_metric: String,
    pub detected_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyStatus {
    pub state: ModelState,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    pub alerts_seen: usize,
    pub critical_alerts: usize,
    pub enqueued: Vec<ModelKey>,
    pub analytics_degraded: bool,
    pub monitoring_enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub models: BTreeMap<ModelKey, KeyStatus>,
    pub queue: Vec<ModelKey>,
    pub running: usize,
    pub max_concurrent_jobs: usize,
    pub jobs: Vec<RetrainingJob>,
    pub recent_alerts: Vec<Alert>,
    pub analytics_degraded: bool,
    pub last_health_update: Option<DateTime<Utc>>,
}

struct KeyEntry {
    state: ModelState,
    attempts: u32,
    last_error: Option<String>,
}

impl KeyEntry {
    fn healthy() -> Self {
        Self {
            state: ModelState::Healthy,
            attempts: 0,
            last_error: None,
        }
    }
}

#[derive(Default)]
struct SchedulerState {
    entries: HashMap<ModelKey, KeyEntry>,
    /// Pending jobs ordered by alert detection time
    queue: VecDeque<RetrainingJob>,
    history: VecDeque<RetrainingJob>,
    recent_alerts: VecDeque<Alert>,
    warned: HashSet<String>,
}

impl SchedulerState {
    fn entry(&mut self, key: &ModelKey) -> &mut KeyEntry {
        self.entries.entry(key.clone()).or_insert_with(KeyEntry::healthy)
    }

    fn push_history(&mut self, job: RetrainingJob) {
        self.history.push_front(job);
        self.history.truncate(JOB_HISTORY);
    }

    fn record_alert(&mut self, alert: &Alert) {
        self.recent_alerts.push_front(alert.clone());
        self.recent_alerts.truncate(ALERT_HISTORY);
    }
}

/// Turns critical alerts into retraining jobs and runs them, at most
/// `max_concurrent_jobs` at a time.
pub struct RetrainingScheduler {
    settings: RetrainingSettings,
    state: Mutex<SchedulerState>,
    permits: Arc<Semaphore>,
    running: AtomicUsize,
    trainer: Arc<dyn Trainer>,
    reloader: Arc<dyn ModelReloader>,
    analytics: Option<Arc<dyn AnalyticsSource>>,
    health: Arc<HealthCache>,
    notifications: NotificationManager,
}

impl RetrainingScheduler {
    pub fn new(
        settings: RetrainingSettings,
        trainer: Arc<dyn Trainer>,
        reloader: Arc<dyn ModelReloader>,
        analytics: Option<Arc<dyn AnalyticsSource>>,
        health: Arc<HealthCache>,
        notifications: NotificationManager,
    ) -> Self {
        let cap = settings.max_concurrent_jobs.max(1);
        Self {
            settings,
            state: Mutex::new(SchedulerState::default()),
            permits: Arc::new(Semaphore::new(cap)),
            running: AtomicUsize::new(0),
            trainer,
            reloader,
            analytics,
            health,
            notifications,
        }
    }

    pub fn max_concurrent_jobs(&self) -> usize {
        self.settings.max_concurrent_jobs.max(1)
    }

    pub fn running_jobs(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub fn queued_jobs(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.analytics.is_some()
    }

    /// One monitoring pass: poll analytics, enqueue for critical alerts, start workers.
    pub async fn run_cycle(self: &Arc<Self>) -> CycleReport {
        let Some(analytics) = self.analytics.clone() else {
            debug!("Analytics not configured; skipping retraining check");
            return CycleReport::default();
        };

        let (alerts, health) = tokio::join!(analytics.fetch_alerts(), analytics.fetch_health());

        let mut failure = None;
        match health {
            Ok(records) => self.health.update(records),
            Err(e) => failure = Some(e.to_string()),
        }
        let alerts = match alerts {
            Ok(alerts) => Some(alerts),
            Err(e) => {
                failure = Some(e.to_string());
                None
            }
        };
        self.set_connectivity(failure).await;

        let mut report = CycleReport {
            monitoring_enabled: true,
            analytics_degraded: self.health.is_degraded(),
            ..CycleReport::default()
        };

        // Without a fresh alert list nothing is enqueued or reset.
        if let Some(alerts) = alerts {
            report.alerts_seen = alerts.len();
            report.critical_alerts = alerts.iter().filter(|a| a.is_critical()).count();
            report.enqueued = self.ingest_alerts(&alerts).await;
        }

        self.dispatch();
        report
    }

    async fn set_connectivity(&self, failure: Option<String>) {
        match failure {
            Some(reason) => {
                warn!("Analytics unavailable, monitoring degraded: {}", reason);
                if !self.health.set_degraded(true) {
                    self.notifications
                        .notify(AlertType::ConnectionLost {
                            service: "analytics".to_string(),
                            reason,
                        })
                        .await;
                }
            }
            None => {
                if self.health.set_degraded(false) {
                    self.notifications
                        .notify(AlertType::ConnectionRestored {
                            service: "analytics".to_string(),
                        })
                        .await;
                }
            }
        }
    }

    /// Apply one cycle's alert list to the per-key state machine.
    ///
    /// Returns the keys enqueued by this call.
    pub async fn ingest_alerts(&self, alerts: &[Alert]) -> Vec<ModelKey> {
        let mut enqueued = Vec::new();
        let mut notices = Vec::new();

        {
            let mut state = self.state.lock();
            let mut critical_keys = HashSet::new();
            let mut warned_now = HashSet::new();

            for alert in alerts {
                state.record_alert(alert);
                let Some(key) = alert.key() else {
                    debug!("Ignoring alert for unparseable model key {}", alert.model_key);
                    continue;
                };

                if !alert.is_critical() {
                    // Warnings are for manual review; never auto-retrained.
                    warned_now.insert(alert.model_key.clone());
                    if !state.warned.contains(&alert.model_key) {
                        notices.push(AlertType::WarningAlertRecorded {
                            model_key: alert.model_key.clone(),
                            metric: alert.metric.clone(),
                            value: alert.value,
                        });
                    }
                    continue;
                }

                // Several alerts may name the same key in one cycle.
                if !critical_keys.insert(key.clone()) {
                    continue;
                }

                let entry = state.entry(&key);
                match entry.state {
                    ModelState::Queued | ModelState::Running | ModelState::Escalated => continue,
                    ModelState::Healthy | ModelState::Failed => {}
                }
                entry.state = ModelState::Queued;
                let attempt = entry.attempts + 1;

                let job = RetrainingJob {
                    model_key: key.clone(),
                    state: JobState::Queued,
                    attempt,
                    trigger_metric: alert.metric.clone(),
                    detected_at: alert.detected_at,
                    started_at: None,
                    finished_at: None,
                    error: None,
                };
                let pos = state.queue.partition_point(|j| j.detected_at <= job.detected_at);
                state.queue.insert(pos, job);

                info!("Queued retraining for {} (attempt {}, {}={})", key, attempt, alert.metric, alert.value);
                notices.push(AlertType::RetrainingQueued {
                    model_key: key.clone(),
                    metric: alert.metric.clone(),
                    value: alert.value,
                });
                enqueued.push(key);
            }

            state.warned = warned_now;

            // A failed or escalated key whose alert has cleared starts over.
            for (key, entry) in state.entries.iter_mut() {
                if matches!(entry.state, ModelState::Failed | ModelState::Escalated)
                    && !critical_keys.contains(key)
                {
                    info!("Alert for {} cleared; resetting retraining state", key);
                    *entry = KeyEntry::healthy();
                }
            }
        }

        for notice in notices {
            self.notifications.notify(notice).await;
        }
        enqueued
    }

    /// Start queued jobs while worker slots are free.
    pub fn dispatch(self: &Arc<Self>) {
        loop {
            let Ok(permit) = Arc::clone(&self.permits).try_acquire_owned() else {
                return;
            };

            let job = {
                let mut state = self.state.lock();
                let Some(mut job) = state.queue.pop_front() else {
                    return;
                };
                job.state = JobState::Running;
                job.started_at = Some(Utc::now());
                state.entry(&job.model_key).state = ModelState::Running;
                self.running.fetch_add(1, Ordering::SeqCst);
                job
            };

            let this = Arc::clone(self);
            tokio::spawn(async move {
                this.run_job(job, permit).await;
            });
        }
    }

    async fn run_job(self: Arc<Self>, mut job: RetrainingJob, permit: OwnedSemaphorePermit) {
        let started = Instant::now();
        let key = job.model_key.clone();
        info!("Retraining {} (attempt {})", key, job.attempt);

        let outcome = match tokio::time::timeout(self.settings.job_timeout(), self.trainer.train(&key)).await {
            Ok(Ok(())) => self
                .reloader
                .reload_models()
                .await
                .map(|_| ())
                .map_err(|e| RetrainError::Reload(e.to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RetrainError::Timeout(self.settings.job_timeout_secs)),
        };

        job.finished_at = Some(Utc::now());
        let notice = {
            let mut state = self.state.lock();
            let max_attempts = self.settings.max_attempts;
            let entry = state.entry(&key);
            match &outcome {
                Ok(()) => {
                    *entry = KeyEntry::healthy();
                    job.state = JobState::Done;
                    AlertType::RetrainingCompleted {
                        model_key: key.clone(),
                        duration_secs: started.elapsed().as_secs(),
                    }
                }
                Err(e) => {
                    entry.attempts = job.attempt;
                    entry.last_error = Some(e.to_string());
                    job.state = JobState::Failed;
                    job.error = Some(e.to_string());
                    if entry.attempts >= max_attempts {
                        entry.state = ModelState::Escalated;
                        AlertType::RetrainingEscalated {
                            model_key: key.clone(),
                            attempts: entry.attempts,
                            reason: e.to_string(),
                        }
                    } else {
                        entry.state = ModelState::Failed;
                        AlertType::RetrainingFailed {
                            model_key: key.clone(),
                            attempt: job.attempt,
                            reason: e.to_string(),
                        }
                    }
                }
            }
        };
        self.state.lock().push_history(job);
        self.notifications.notify(notice).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        drop(permit);
        self.dispatch();
    }

    #[cfg(test)]
    pub fn state_of(&self, key: &ModelKey) -> ModelState {
        self.state
            .lock()
            .entries
            .get(key)
            .map(|e| e.state)
            .unwrap_or(ModelState::Healthy)
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock();
        SchedulerStatus {
            models: state
                .entries
                .iter()
                .map(|(k, e)| {
                    (
                        k.clone(),
                        KeyStatus {
                            state: e.state,
                            attempts: e.attempts,
                            last_error: e.last_error.clone(),
                        },
                    )
                })
                .collect(),
            queue: state.queue.iter().map(|j| j.model_key.clone()).collect(),
            running: self.running_jobs(),
            max_concurrent_jobs: self.max_concurrent_jobs(),
            jobs: state.history.iter().cloned().collect(),
            recent_alerts: state.recent_alerts.iter().cloned().collect(),
            analytics_degraded: self.health.is_degraded(),
            last_health_update: self.health.last_success(),
        }
    }

    /// Wait until the queue is drained and no job is running.
    #[cfg(test)]
    pub async fn wait_idle(&self) {
        loop {
            if self.running_jobs() == 0 && self.queued_jobs() == 0 {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}
