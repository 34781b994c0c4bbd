//! Prometheus metrics collection and HTTP request instrumentation.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Instant;

use axum::{
    body::Body,
    http::{Request, Response},
    middleware::Next,
};

use crate::error::{AppError, Result};
use crate::models::backup::BackupStats;

/// Initialize the Prometheus metrics recorder and return the handle for rendering.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| AppError::Internal(format!("failed to install Prometheus recorder: {}", e)))
}

/// Axum middleware that records HTTP request metrics.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().clone().to_string();
    let path = request.uri().path().to_string();
    let normalized = normalize_path(&path);

    let start = Instant::now();
    counter!("calendar_http_requests_total", "method" => method.clone(), "path" => normalized.clone())
        .increment(1);

    let response = next.run(request).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    histogram!("calendar_http_request_duration_seconds", "method" => method.clone(), "path" => normalized.clone(), "status" => status.clone()).record(duration);
    counter!("calendar_http_responses_total", "method" => method, "path" => normalized, "status" => status).increment(1);

    response
}

/// Normalize URL paths to reduce label cardinality.
/// Backup identifiers (`backup_<millis>`) and numeric IDs become `:id`.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|seg| {
            let is_backup_id = seg
                .strip_prefix("backup_")
                .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()));
            if is_backup_id || (!seg.is_empty() && seg.parse::<i64>().is_ok()) {
                ":id".to_string()
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Record a backup attempt.
pub fn record_backup(format: &str, success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "failure" };
    counter!("calendar_backup_operations_total", "format" => format.to_string(), "status" => status.to_string()).increment(1);
    histogram!("calendar_backup_duration_seconds", "format" => format.to_string())
        .record(duration_secs);
}

/// Record a restore attempt.
pub fn record_restore(success: bool, duration_secs: f64) {
    let status = if success { "success" } else { "failure" };
    counter!("calendar_restore_operations_total", "status" => status.to_string()).increment(1);
    histogram!("calendar_restore_duration_seconds").record(duration_secs);
}

/// Record a cleanup operation.
pub fn record_cleanup(items_removed: u64) {
    counter!("calendar_backup_cleanup_removed_total").increment(items_removed);
}

/// Update backup inventory gauges.
pub fn set_backup_gauges(stats: &BackupStats) {
    gauge!("calendar_backups_total").set(stats.total_count as f64);
    gauge!("calendar_backups_size_bytes").set(stats.total_size_bytes as f64);
    if let Some(newest) = stats.newest {
        gauge!("calendar_backup_last_success_timestamp_seconds").set(newest.timestamp() as f64);
    }
}

/// Update database connection pool gauge metrics.
pub fn set_db_pool_gauges(pool: &sqlx::PgPool) {
    let size = pool.size() as f64;
    let idle = pool.num_idle() as f64;
    gauge!("calendar_db_pool_connections_active").set(size - idle);
    gauge!("calendar_db_pool_connections_idle").set(idle);
    gauge!("calendar_db_pool_connections_max").set(pool.options().get_max_connections() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_backup_id() {
        let path = "/api/v1/backups/backup_1760493600123/verify";
        assert_eq!(normalize_path(path), "/api/v1/backups/:id/verify");
    }

    #[test]
    fn test_normalize_path_numeric() {
        assert_eq!(normalize_path("/api/v1/users/123"), "/api/v1/users/:id");
    }

    #[test]
    fn test_normalize_path_no_change() {
        assert_eq!(normalize_path("/api/v1/backups/list"), "/api/v1/backups/list");
        assert_eq!(normalize_path("/api/v1/backups/backup_"), "/api/v1/backups/backup_");
    }
}
