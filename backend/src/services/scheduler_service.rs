//! Automatic backup scheduler.
//!
//! Owns one cron timer that asks the backup service for a snapshot at every
//! occurrence of the configured expression, evaluated in the configured
//! timezone. Each run ends with exactly one outcome notification.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use serde::Serialize;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{AppError, Result};
use crate::models::backup::{BackupRecord, BackupTrigger};
use crate::services::backup_service::BackupService;
use crate::services::notification_service::BackupNotifier;

/// Whether a timer is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleState {
    Disabled,
    Armed,
}

/// Snapshot of scheduler configuration and state.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ScheduleStatus {
    /// Automatic backups enabled in configuration
    pub enabled: bool,
    pub state: ScheduleState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    pub timezone: String,
    /// Next fire time computed by the running timer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
}

/// Parse a cron expression. Five-field expressions get a zero seconds field.
pub fn parse_schedule(expr: &str) -> Result<Schedule> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr)
    } else {
        expr.to_string()
    };

    Schedule::from_str(&normalized)
        .map_err(|e| AppError::Config(format!("Invalid cron expression '{}': {}", expr, e)))
}

/// Parse an IANA timezone name.
pub fn parse_timezone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| AppError::Config(format!("Invalid timezone '{}': {}", name, e)))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Backup scheduler
pub struct BackupScheduler {
    config: SchedulerConfig,
    backups: Arc<BackupService>,
    notifier: Arc<BackupNotifier>,
    timer: Mutex<Option<JoinHandle<()>>>,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    runs: Arc<Mutex<JoinSet<()>>>,
}

impl BackupScheduler {
    pub fn new(
        config: SchedulerConfig,
        backups: Arc<BackupService>,
        notifier: Arc<BackupNotifier>,
    ) -> Self {
        Self {
            config,
            backups,
            notifier,
            timer: Mutex::new(None),
            next_run: Arc::new(Mutex::new(None)),
            runs: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn state(&self) -> ScheduleState {
        match lock(&self.timer).as_ref() {
            Some(handle) if !handle.is_finished() => ScheduleState::Armed,
            _ => ScheduleState::Disabled,
        }
    }

    /// Arm the timer if automatic backups are enabled and the configuration
    /// is valid. Starting an armed scheduler does nothing.
    pub fn start(&self) -> ScheduleState {
        let mut timer = lock(&self.timer);
        if timer.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Backup scheduler already armed");
            return ScheduleState::Armed;
        }

        if !self.config.enabled {
            info!("Automatic backups disabled");
            return ScheduleState::Disabled;
        }

        let schedule = match parse_schedule(&self.config.cron_expression) {
            Ok(s) => s,
            Err(e) => {
                error!("Automatic backups not scheduled: {}", e);
                return ScheduleState::Disabled;
            }
        };
        let tz = match parse_timezone(&self.config.timezone) {
            Ok(tz) => tz,
            Err(e) => {
                error!("Automatic backups not scheduled: {}", e);
                return ScheduleState::Disabled;
            }
        };

        *timer = Some(tokio::spawn(run_timer(
            schedule,
            tz,
            self.backups.clone(),
            self.notifier.clone(),
            self.next_run.clone(),
            self.runs.clone(),
        )));

        info!(
            cron = %self.config.cron_expression,
            timezone = %self.config.timezone,
            "Automatic backups scheduled"
        );
        ScheduleState::Armed
    }

    /// Disarm the timer. Runs already in flight continue.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.timer).take() {
            handle.abort();
            info!("Automatic backups stopped");
        }
        *lock(&self.next_run) = None;
    }

    /// Wait for `signal`, then disarm the timer so no new run starts while
    /// the server drains.
    pub async fn stop_on(&self, signal: impl std::future::Future<Output = ()>) {
        signal.await;
        self.stop();
    }

    /// Disarm and re-arm with the same configuration.
    pub fn restart(&self) -> ScheduleState {
        self.stop();
        self.start()
    }

    pub fn status(&self) -> ScheduleStatus {
        let state = self.state();
        ScheduleStatus {
            enabled: self.config.enabled,
            state,
            cron_expression: self
                .config
                .enabled
                .then(|| self.config.cron_expression.clone()),
            timezone: self.config.timezone.clone(),
            next_run: match state {
                ScheduleState::Armed => *lock(&self.next_run),
                ScheduleState::Disabled => None,
            },
        }
    }

    /// Run one backup now, notify, and return the outcome to the caller.
    pub async fn test_backup(&self, operator_id: Option<Uuid>) -> Result<BackupRecord> {
        info!("Running test backup");
        let trigger = operator_id
            .map(BackupTrigger::manual)
            .unwrap_or_else(BackupTrigger::automatic);
        run_backup(&self.backups, &self.notifier, trigger).await
    }

    /// Disarm the timer and wait for in-flight automatic runs to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let mut runs = std::mem::take(&mut *lock(&self.runs));
        if !runs.is_empty() {
            info!(in_flight = runs.len(), "Waiting for running backups to finish");
        }
        while let Some(result) = runs.join_next().await {
            if let Err(e) = result {
                warn!("Scheduled backup task ended abnormally: {}", e);
            }
        }
    }
}

async fn run_backup(
    backups: &BackupService,
    notifier: &BackupNotifier,
    trigger: BackupTrigger,
) -> Result<BackupRecord> {
    let outcome = backups.create_backup(trigger).await;
    match &outcome {
        Ok(record) => info!(
            "Backup run completed: {} ({:.2} MB)",
            record.filename,
            record.size_bytes as f64 / (1024.0 * 1024.0)
        ),
        Err(e) => error!("Backup run failed: {}", e),
    }
    notifier.notify(&outcome).await;
    outcome
}

async fn run_timer(
    schedule: Schedule,
    tz: Tz,
    backups: Arc<BackupService>,
    notifier: Arc<BackupNotifier>,
    next_run: Arc<Mutex<Option<DateTime<Utc>>>>,
    runs: Arc<Mutex<JoinSet<()>>>,
) {
    let mut last: Option<DateTime<Tz>> = None;
    loop {
        let now = Utc::now().with_timezone(&tz);
        let from = last.map_or(now, |l| l.max(now));
        let Some(next) = schedule.after(&from).next() else {
            warn!("Cron schedule has no further occurrences, timer exiting");
            *lock(&next_run) = None;
            return;
        };
        let next_utc = next.with_timezone(&Utc);
        *lock(&next_run) = Some(next_utc);
        debug!(next_run = %next_utc, "Next automatic backup scheduled");

        let wait = (next_utc - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        last = Some(next);

        info!("Starting scheduled backup");
        let backups = backups.clone();
        let notifier = notifier.clone();
        let mut in_flight = lock(&runs);
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move {
            let _ = run_backup(&backups, &notifier, BackupTrigger::automatic()).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackupConfig, NotificationConfig};
    use crate::services::audit_service::MemoryAuditSink;
    use crate::services::dump_tool::{ConnectionInfo, DumpTool};
    use crate::services::entity_store::EntityStore;
    use crate::services::notification_service::RecordingSink;
    use async_trait::async_trait;
    use std::path::Path;

    struct MissingDumpTool;

    #[async_trait]
    impl DumpTool for MissingDumpTool {
        fn name(&self) -> &str {
            "pg_dump"
        }
        async fn is_available(&self) -> bool {
            false
        }
        async fn dump(&self, _conn: &ConnectionInfo, _target: &Path) -> Result<()> {
            Err(AppError::DumpTool("not installed".into()))
        }
        async fn restore(&self, _conn: &ConnectionInfo, _source: &Path) -> Result<()> {
            Err(AppError::DumpTool("not installed".into()))
        }
    }

    struct EmptyStore;

    #[async_trait]
    impl EntityStore for EmptyStore {
        async fn export_entity(&self, _entity: &str) -> Result<Vec<serde_json::Value>> {
            Ok(Vec::new())
        }
        async fn import_entities(&self, _data: &[(String, Vec<serde_json::Value>)]) -> Result<()> {
            Ok(())
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        backups: Arc<BackupService>,
        sink: Arc<RecordingSink>,
        scheduler: BackupScheduler,
    }

    fn harness(cron: &str, enabled: bool, connection_url: Option<&str>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let backups = Arc::new(BackupService::new(
            BackupConfig::new(dir.path(), connection_url.map(String::from)),
            Arc::new(MissingDumpTool),
            Arc::new(EmptyStore),
            Arc::new(MemoryAuditSink::new()),
        ));
        let sink = Arc::new(RecordingSink::default());
        let notifier = Arc::new(BackupNotifier::new(
            sink.clone(),
            NotificationConfig {
                enabled: true,
                recipient: Some("ops@example.com".into()),
            },
        ));
        let scheduler = BackupScheduler::new(
            SchedulerConfig {
                enabled,
                cron_expression: cron.to_string(),
                timezone: "Europe/Rome".to_string(),
            },
            backups.clone(),
            notifier,
        );
        Harness {
            _dir: dir,
            backups,
            sink,
            scheduler,
        }
    }

    const DB_URL: Option<&str> = Some("postgres://cal@localhost/calendar");

    fn sent(h: &Harness) -> Vec<String> {
        h.sink
            .sent
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.subject.clone())
            .collect()
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
        for _ in 0..100 {
            if condition() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        condition()
    }

    #[test]
    fn test_parse_schedule_accepts_five_and_six_fields() {
        assert!(parse_schedule("0 2 * * *").is_ok());
        assert!(parse_schedule("*/30 * * * * *").is_ok());
    }

    #[test]
    fn test_parse_schedule_rejects_garbage() {
        assert!(matches!(parse_schedule("not a cron"), Err(AppError::Config(_))));
        assert!(parse_schedule("61 * * * *").is_err());
    }

    #[test]
    fn test_five_field_schedule_fires_at_minute_zero_seconds() {
        let schedule = parse_schedule("30 2 * * *").unwrap();
        let tz = parse_timezone("Europe/Rome").unwrap();
        let next = schedule.upcoming(tz).next().unwrap();
        assert_eq!(next.format("%H:%M:%S").to_string(), "02:30:00");
    }

    #[test]
    fn test_parse_timezone() {
        assert!(parse_timezone("Europe/Rome").is_ok());
        assert!(matches!(parse_timezone("Mars/Olympus"), Err(AppError::Config(_))));
    }

    #[tokio::test]
    async fn test_disabled_config_never_arms() {
        let h = harness("0 2 * * *", false, DB_URL);
        assert_eq!(h.scheduler.start(), ScheduleState::Disabled);

        let status = h.scheduler.status();
        assert!(!status.enabled);
        assert_eq!(status.state, ScheduleState::Disabled);
        assert!(status.cron_expression.is_none());
        assert!(status.next_run.is_none());
    }

    #[tokio::test]
    async fn test_invalid_cron_leaves_scheduler_disabled() {
        let h = harness("every day at two", true, DB_URL);
        assert_eq!(h.scheduler.start(), ScheduleState::Disabled);
        assert_eq!(h.scheduler.state(), ScheduleState::Disabled);
    }

    #[tokio::test]
    async fn test_start_stop_restart() {
        let h = harness("0 2 * * *", true, DB_URL);
        assert_eq!(h.scheduler.start(), ScheduleState::Armed);
        assert_eq!(h.scheduler.start(), ScheduleState::Armed);

        assert!(wait_for(|| h.scheduler.status().next_run.is_some()).await);
        let status = h.scheduler.status();
        assert_eq!(status.cron_expression.as_deref(), Some("0 2 * * *"));
        assert!(status.next_run.unwrap() > Utc::now());

        h.scheduler.stop();
        assert_eq!(h.scheduler.state(), ScheduleState::Disabled);
        assert!(h.scheduler.status().next_run.is_none());

        assert_eq!(h.scheduler.restart(), ScheduleState::Armed);
        h.scheduler.shutdown().await;
        assert_eq!(h.scheduler.state(), ScheduleState::Disabled);
    }

    #[tokio::test]
    async fn test_stop_on_signal_disarms_before_shutdown() {
        let h = harness("0 2 * * *", true, DB_URL);
        assert_eq!(h.scheduler.start(), ScheduleState::Armed);

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let waiting = h.scheduler.stop_on(async {
            let _ = rx.await;
        });
        tokio::pin!(waiting);

        assert!(tokio::time::timeout(Duration::from_millis(50), waiting.as_mut())
            .await
            .is_err());
        assert_eq!(h.scheduler.state(), ScheduleState::Armed);

        tx.send(()).unwrap();
        waiting.await;
        assert_eq!(h.scheduler.state(), ScheduleState::Disabled);
        assert!(h.scheduler.status().next_run.is_none());
    }

    #[tokio::test]
    async fn test_test_backup_notifies_once_on_success() {
        let h = harness("0 2 * * *", false, DB_URL);
        let record = h.scheduler.test_backup(None).await.unwrap();

        assert_eq!(sent(&h), vec!["Database backup completed".to_string()]);
        assert_eq!(h.backups.list_backups().await[0].id, record.id);
    }

    #[tokio::test]
    async fn test_test_backup_propagates_failure_after_notifying() {
        let h = harness("0 2 * * *", false, None);
        let err = h.scheduler.test_backup(None).await.unwrap_err();

        assert!(matches!(err, AppError::Config(_)));
        assert_eq!(sent(&h), vec!["Database backup failed".to_string()]);
    }

    #[tokio::test]
    async fn test_timer_fires_and_shutdown_waits() {
        let h = harness("* * * * * *", true, DB_URL);
        assert_eq!(h.scheduler.start(), ScheduleState::Armed);

        assert!(wait_for(|| !h.sink.sent.lock().unwrap().is_empty()).await);
        h.scheduler.shutdown().await;

        assert_eq!(h.scheduler.state(), ScheduleState::Disabled);
        assert!(!h.backups.list_backups().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_automatic_run_keeps_timer_armed() {
        let h = harness("* * * * * *", true, None);
        assert_eq!(h.scheduler.start(), ScheduleState::Armed);

        assert!(wait_for(|| !h.sink.sent.lock().unwrap().is_empty()).await);
        assert_eq!(h.scheduler.state(), ScheduleState::Armed);
        assert!(sent(&h).iter().all(|s| s == "Database backup failed"));

        h.scheduler.shutdown().await;
    }
}
