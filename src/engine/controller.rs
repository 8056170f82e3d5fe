use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::scheduler::{CycleReport, RetrainingScheduler, SchedulerStatus};
use crate::notifications::{AlertType, NotificationManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControllerStatus {
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for ControllerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControllerStatus::Running => write!(f, "Running"),
            ControllerStatus::Paused => write!(f, "Paused"),
            ControllerStatus::Stopped => write!(f, "Stopped"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerState {
    pub status: ControllerStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub uptime_seconds: u64,
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub check_interval_secs: u64,
    pub scheduler: SchedulerStatus,
}

/// Drives the retraining scheduler on a fixed interval.
///
/// Pausing skips check cycles; jobs already running finish normally.
pub struct RetrainingController {
    scheduler: Arc<RetrainingScheduler>,
    notifications: NotificationManager,
    check_interval: std::time::Duration,
    is_running: AtomicBool,
    is_paused: AtomicBool,
    started_at: RwLock<Option<DateTime<Utc>>>,
    paused_at: RwLock<Option<DateTime<Utc>>>,
    last_cycle_at: RwLock<Option<DateTime<Utc>>>,
    cycles_run: AtomicU64,
    cycles_skipped: AtomicU64,
}

impl RetrainingController {
    pub fn new(
        scheduler: Arc<RetrainingScheduler>,
        notifications: NotificationManager,
        check_interval: std::time::Duration,
    ) -> Self {
        Self {
            scheduler,
            notifications,
            check_interval,
            is_running: AtomicBool::new(false),
            is_paused: AtomicBool::new(false),
            started_at: RwLock::new(None),
            paused_at: RwLock::new(None),
            last_cycle_at: RwLock::new(None),
            cycles_run: AtomicU64::new(0),
            cycles_skipped: AtomicU64::new(0),
        }
    }

    pub fn scheduler(&self) -> &Arc<RetrainingScheduler> {
        &self.scheduler
    }

    pub async fn start(&self) -> Result<(), String> {
        if self.is_running.load(Ordering::Acquire) {
            return Err("Controller is already running".to_string());
        }

        self.is_running.store(true, Ordering::Release);
        self.is_paused.store(false, Ordering::Release);
        *self.started_at.write().await = Some(Utc::now());
        *self.paused_at.write().await = None;

        info!("Retraining controller started (interval {}s)", self.check_interval.as_secs());
        self.notifications.notify(AlertType::ControllerStarted).await;
        Ok(())
    }

    pub async fn stop(&self) -> Result<(), String> {
        if !self.is_running.load(Ordering::Acquire) {
            return Err("Controller is not running".to_string());
        }

        self.is_running.store(false, Ordering::Release);
        self.is_paused.store(false, Ordering::Release);
        *self.paused_at.write().await = None;

        info!("Retraining controller stopped");
        self.notifications.notify(AlertType::ControllerStopped).await;
        Ok(())
    }

    pub async fn pause(&self) -> Result<(), String> {
        if !self.is_running.load(Ordering::Acquire) {
            return Err("Controller is not running".to_string());
        }
        if self.is_paused.load(Ordering::Acquire) {
            return Err("Controller is already paused".to_string());
        }

        self.is_paused.store(true, Ordering::Release);
        *self.paused_at.write().await = Some(Utc::now());

        info!("Retraining controller paused");
        self.notifications.notify(AlertType::ControllerPaused).await;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), String> {
        if !self.is_running.load(Ordering::Acquire) {
            return Err("Controller is not running".to_string());
        }
        if !self.is_paused.load(Ordering::Acquire) {
            return Err("Controller is not paused".to_string());
        }

        self.is_paused.store(false, Ordering::Release);
        *self.paused_at.write().await = None;

        info!("Retraining controller resumed");
        self.notifications.notify(AlertType::ControllerResumed).await;
        Ok(())
    }

    pub fn status(&self) -> ControllerStatus {
        if !self.is_running.load(Ordering::Acquire) {
            ControllerStatus::Stopped
        } else if self.is_paused.load(Ordering::Acquire) {
            ControllerStatus::Paused
        } else {
            ControllerStatus::Running
        }
    }

    /// Run one check cycle now, regardless of the timer.
    pub async fn run_once(&self) -> CycleReport {
        let report = self.scheduler.run_cycle().await;
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
        *self.last_cycle_at.write().await = Some(Utc::now());
        debug!(
            "Retraining check: {} alerts ({} critical), {} enqueued",
            report.alerts_seen,
            report.critical_alerts,
            report.enqueued.len()
        );
        report
    }

    /// Timer-driven check loop; exits once the controller is stopped.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if !self.is_running.load(Ordering::Acquire) {
                    break;
                }
                if self.is_paused.load(Ordering::Acquire) {
                    self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                self.run_once().await;
            }
            info!("Retraining check loop exited");
        })
    }

    pub async fn get_state(&self) -> ControllerState {
        let started_at = *self.started_at.read().await;
        let paused_at = *self.paused_at.read().await;

        let uptime_seconds = started_at
            .map(|start| (Utc::now() - start).num_seconds().max(0) as u64)
            .unwrap_or(0);

        ControllerState {
            status: self.status(),
            started_at,
            paused_at,
            uptime_seconds,
            cycles_run: self.cycles_run.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            last_cycle_at: *self.last_cycle_at.read().await,
            check_interval_secs: self.check_interval.as_secs(),
            scheduler: self.scheduler.status(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::{HealthCache, MockAnalyticsSource};
    use crate::config::RetrainingSettings;
    use crate::engine::trainer::UnconfiguredTrainer;
    use crate::ml::predictor::MockModelReloader;
    use std::time::Duration;

    fn controller(interval: Duration) -> (Arc<RetrainingController>, Arc<std::sync::atomic::AtomicUsize>) {
        let polls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&polls);
        let mut analytics = MockAnalyticsSource::new();
        analytics.expect_fetch_alerts().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        });
        analytics.expect_fetch_health().returning(|| Ok(Vec::new()));

        let notifications = NotificationManager::new();
        let scheduler = Arc::new(RetrainingScheduler::new(
            RetrainingSettings::default(),
            Arc::new(UnconfiguredTrainer),
            Arc::new(MockModelReloader::new()),
            Some(Arc::new(analytics)),
            Arc::new(HealthCache::new()),
            notifications.clone(),
        ));
        (Arc::new(RetrainingController::new(scheduler, notifications, interval)), polls)
    }

    #[tokio::test]
    async fn test_lifecycle_transitions() {
        let (controller, _) = controller(Duration::from_secs(3600));
        assert_eq!(controller.status(), ControllerStatus::Stopped);
        assert!(controller.pause().await.is_err());

        controller.start().await.unwrap();
        assert!(controller.start().await.is_err());
        assert_eq!(controller.status(), ControllerStatus::Running);

        controller.pause().await.unwrap();
        assert_eq!(controller.status(), ControllerStatus::Paused);
        assert!(controller.pause().await.is_err());
        assert!(controller.get_state().await.paused_at.is_some());

        controller.resume().await.unwrap();
        assert!(controller.resume().await.is_err());

        controller.stop().await.unwrap();
        assert_eq!(controller.status(), ControllerStatus::Stopped);
    }

    #[tokio::test]
    async fn test_run_once_counts_cycles() {
        let (controller, polls) = controller(Duration::from_secs(3600));
        controller.run_once().await;
        controller.run_once().await;

        let state = controller.get_state().await;
        assert_eq!(state.cycles_run, 2);
        assert!(state.last_cycle_at.is_some());
        assert_eq!(polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_paused_loop_skips_cycles() {
        let (controller, polls) = controller(Duration::from_millis(20));
        controller.start().await.unwrap();
        controller.pause().await.unwrap();

        let handle = Arc::clone(&controller).spawn();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(polls.load(Ordering::SeqCst), 0);
        assert!(controller.get_state().await.cycles_skipped > 0);

        controller.resume().await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(polls.load(Ordering::SeqCst) > 0);

        controller.stop().await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
