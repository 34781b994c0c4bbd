//! Health check endpoints.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};

use crate::api::SharedState;
use crate::services::metrics_service;
use crate::services::scheduler_service::ScheduleState;

#[derive(OpenApi)]
#[openapi(
    paths(health_check, readiness_check),
    components(schemas(HealthResponse, HealthChecks, CheckStatus))
)]
pub struct HealthApiDoc;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub checks: HealthChecks,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthChecks {
    pub database: CheckStatus,
    pub backup_storage: CheckStatus,
    pub scheduler: CheckStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CheckStatus {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CheckStatus {
    fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
            message: None,
        }
    }
}

/// Health check endpoint - basic liveness check
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    operation_id = "health_check",
    responses(
        (status = 200, description = "Service healthy", body = HealthResponse),
        (status = 503, description = "Database unreachable", body = HealthResponse),
    ),
)]
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let db_check = match sqlx::query("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => CheckStatus::healthy(),
        Err(e) => CheckStatus {
            status: "unhealthy".to_string(),
            message: Some(format!("Database connection failed: {}", e)),
        },
    };

    // A missing directory is created on the next backup, so it only degrades.
    let backup_dir = &state.backups.config().backup_dir;
    let storage_check = match tokio::fs::metadata(backup_dir).await {
        Ok(meta) if meta.is_dir() => CheckStatus::healthy(),
        Ok(_) => CheckStatus {
            status: "degraded".to_string(),
            message: Some(format!("{} is not a directory", backup_dir.display())),
        },
        Err(e) => CheckStatus {
            status: "degraded".to_string(),
            message: Some(format!("Backup directory unavailable: {}", e)),
        },
    };

    let scheduler_check = match (state.scheduler.config().enabled, state.scheduler.state()) {
        (true, ScheduleState::Disabled) => CheckStatus {
            status: "degraded".to_string(),
            message: Some("Automatic backups enabled but no timer is armed".to_string()),
        },
        _ => CheckStatus::healthy(),
    };

    let overall_status = if db_check.status == "healthy" {
        "healthy"
    } else {
        "unhealthy"
    };

    let response = HealthResponse {
        status: overall_status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database: db_check,
            backup_storage: storage_check,
            scheduler: scheduler_check,
        },
    };

    let status_code = if overall_status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(response))
}

/// Readiness check endpoint - is the service ready to accept traffic?
#[utoipa::path(
    get,
    path = "/ready",
    tag = "health",
    operation_id = "readiness_check",
    responses(
        (status = 200, description = "Ready"),
        (status = 503, description = "Database unreachable"),
    ),
)]
pub async fn readiness_check(State(state): State<SharedState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").fetch_one(&state.db).await {
        Ok(_) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<SharedState>) -> impl IntoResponse {
    let Some(ref handle) = state.metrics_handle else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics recorder not installed\n".to_string(),
        );
    };

    metrics_service::set_backup_gauges(&state.backups.get_stats().await);
    metrics_service::set_db_pool_gauges(&state.db);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        handle.render(),
    )
}
