//! API module - HTTP handlers and middleware.

pub mod handlers;
pub mod middleware;
pub mod openapi;
pub mod routes;

use crate::services::auth_service::AuthService;
use crate::services::backup_service::BackupService;
use crate::services::notification_service::BackupNotifier;
use crate::services::scheduler_service::BackupScheduler;
use metrics_exporter_prometheus::PrometheusHandle;
use sqlx::PgPool;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub backups: Arc<BackupService>,
    pub scheduler: Arc<BackupScheduler>,
    pub notifier: Arc<BackupNotifier>,
    pub auth: Arc<AuthService>,
    pub metrics_handle: Option<Arc<PrometheusHandle>>,
}

impl AppState {
    pub fn new(
        db: PgPool,
        backups: Arc<BackupService>,
        scheduler: Arc<BackupScheduler>,
        notifier: Arc<BackupNotifier>,
        auth: Arc<AuthService>,
    ) -> Self {
        Self {
            db,
            backups,
            scheduler,
            notifier,
            auth,
            metrics_handle: None,
        }
    }

    /// Set the Prometheus metrics handle for rendering /metrics output.
    pub fn set_metrics_handle(&mut self, handle: PrometheusHandle) {
        self.metrics_handle = Some(Arc::new(handle));
    }
}

pub type SharedState = Arc<AppState>;
