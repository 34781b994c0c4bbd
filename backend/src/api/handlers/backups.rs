//! Database backup administration handlers.

use axum::extract::{Extension, Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{OpenApi, ToSchema};

use crate::api::middleware::auth::AuthExtension;
use crate::api::SharedState;
use crate::error::{AppError, Result};
use crate::models::backup::{
    BackupFormat, BackupOrigin, BackupOutcome, BackupRecord, BackupStats, BackupTrigger,
    CleanupResult, RetentionPolicy, VerifyResult,
};
use crate::services::scheduler_service::{ScheduleState, ScheduleStatus};

#[derive(OpenApi)]
#[openapi(
    paths(
        create_backup,
        list_backups,
        backup_stats,
        backup_config,
        test_backup,
        cleanup_backups,
        verify_backup,
        delete_backup,
        restore_backup,
    ),
    components(schemas(
        BackupRecord,
        BackupOrigin,
        BackupOutcome,
        BackupFormat,
        BackupStats,
        CleanupResult,
        RetentionPolicy,
        VerifyResult,
        ScheduleState,
        ScheduleStatus,
        BackupListResponse,
        BackupStatsResponse,
        BackupConfigResponse,
        NotificationSettings,
        RestoreRequest,
        RestoreResponse,
        DeleteResponse,
    ))
)]
pub struct BackupsApiDoc;

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/create", post(create_backup))
        .route("/list", get(list_backups))
        .route("/stats", get(backup_stats))
        .route("/config", get(backup_config))
        .route("/test", post(test_backup))
        .route("/cleanup", post(cleanup_backups))
        .route("/:id/verify", get(verify_backup))
        .route("/:id/restore", post(restore_backup))
        .route("/:id", delete(delete_backup))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackupListResponse {
    pub items: Vec<BackupRecord>,
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackupStatsResponse {
    pub stats: BackupStats,
    pub schedule: ScheduleStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationSettings {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BackupConfigResponse {
    pub backup_dir: String,
    pub retention: RetentionPolicy,
    pub schedule: ScheduleStatus,
    pub notifications: NotificationSettings,
    pub export_entities: Vec<String>,
    pub dump_timeout_secs: u64,
    pub restore_timeout_secs: u64,
}

/// Restore request. The operator must acknowledge that current data is replaced.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RestoreRequest {
    #[serde(default)]
    pub confirm_restore: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RestoreResponse {
    pub restored: String,
    pub format: BackupFormat,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub deleted: String,
}

/// POST /api/v1/backups/create
#[utoipa::path(
    post,
    path = "/create",
    context_path = "/api/v1/backups",
    tag = "backups",
    operation_id = "create_backup",
    responses(
        (status = 201, description = "Backup created", body = BackupRecord),
        (status = 409, description = "Another backup operation is running", body = crate::api::openapi::ErrorResponse),
        (status = 500, description = "Backup failed", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn create_backup(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
) -> Result<(StatusCode, Json<BackupRecord>)> {
    tracing::info!(operator = %auth.email, "Manual backup requested");
    let record = state
        .backups
        .create_backup(BackupTrigger::manual(auth.user_id))
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/v1/backups/list
#[utoipa::path(
    get,
    path = "/list",
    context_path = "/api/v1/backups",
    tag = "backups",
    operation_id = "list_backups",
    responses(
        (status = 200, description = "Backups, newest first", body = BackupListResponse),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn list_backups(State(state): State<SharedState>) -> Json<BackupListResponse> {
    let items = state.backups.list_backups().await;
    let total = items.len();
    Json(BackupListResponse { items, total })
}

/// GET /api/v1/backups/stats
#[utoipa::path(
    get,
    path = "/stats",
    context_path = "/api/v1/backups",
    tag = "backups",
    operation_id = "backup_stats",
    responses(
        (status = 200, description = "Aggregate backup statistics", body = BackupStatsResponse),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn backup_stats(State(state): State<SharedState>) -> Json<BackupStatsResponse> {
    Json(BackupStatsResponse {
        stats: state.backups.get_stats().await,
        schedule: state.scheduler.status(),
    })
}

/// GET /api/v1/backups/config
#[utoipa::path(
    get,
    path = "/config",
    context_path = "/api/v1/backups",
    tag = "backups",
    operation_id = "backup_config",
    responses(
        (status = 200, description = "Effective backup configuration", body = BackupConfigResponse),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn backup_config(State(state): State<SharedState>) -> Json<BackupConfigResponse> {
    let backup = state.backups.config();
    let notifications = state.notifier.config();
    Json(BackupConfigResponse {
        backup_dir: backup.backup_dir.display().to_string(),
        retention: backup.retention,
        schedule: state.scheduler.status(),
        notifications: NotificationSettings {
            enabled: notifications.enabled,
            recipient: notifications.recipient.clone(),
        },
        export_entities: backup.export_entities.clone(),
        dump_timeout_secs: backup.dump_timeout.as_secs(),
        restore_timeout_secs: backup.restore_timeout.as_secs(),
    })
}

/// POST /api/v1/backups/test
#[utoipa::path(
    post,
    path = "/test",
    context_path = "/api/v1/backups",
    tag = "backups",
    operation_id = "test_backup",
    responses(
        (status = 201, description = "Test backup created and notification sent", body = BackupRecord),
        (status = 409, description = "Another backup operation is running", body = crate::api::openapi::ErrorResponse),
        (status = 500, description = "Backup failed", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn test_backup(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
) -> Result<(StatusCode, Json<BackupRecord>)> {
    let record = state.scheduler.test_backup(Some(auth.user_id)).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// POST /api/v1/backups/cleanup
#[utoipa::path(
    post,
    path = "/cleanup",
    context_path = "/api/v1/backups",
    tag = "backups",
    operation_id = "cleanup_backups",
    responses(
        (status = 200, description = "Retention applied", body = CleanupResult),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn cleanup_backups(State(state): State<SharedState>) -> Json<CleanupResult> {
    Json(state.backups.cleanup_old_backups().await)
}

/// GET /api/v1/backups/{id}/verify
#[utoipa::path(
    get,
    path = "/{id}/verify",
    context_path = "/api/v1/backups",
    tag = "backups",
    operation_id = "verify_backup",
    params(("id" = String, Path, description = "Backup identifier")),
    responses(
        (status = 200, description = "Verification result", body = VerifyResult),
        (status = 404, description = "Backup not found", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn verify_backup(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<VerifyResult>> {
    let record = state.backups.find_backup(&id).await?;
    Ok(Json(state.backups.verify_backup(&record).await))
}

/// DELETE /api/v1/backups/{id}
#[utoipa::path(
    delete,
    path = "/{id}",
    context_path = "/api/v1/backups",
    tag = "backups",
    operation_id = "delete_backup",
    params(("id" = String, Path, description = "Backup identifier")),
    responses(
        (status = 200, description = "Backup deleted", body = DeleteResponse),
        (status = 404, description = "Backup not found", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn delete_backup(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>> {
    state.backups.delete_backup(&id, auth.user_id).await?;
    Ok(Json(DeleteResponse { deleted: id }))
}

/// POST /api/v1/backups/{id}/restore
#[utoipa::path(
    post,
    path = "/{id}/restore",
    context_path = "/api/v1/backups",
    tag = "backups",
    operation_id = "restore_backup",
    params(("id" = String, Path, description = "Backup identifier")),
    request_body = RestoreRequest,
    responses(
        (status = 200, description = "Database restored", body = RestoreResponse),
        (status = 400, description = "Restore not confirmed", body = crate::api::openapi::ErrorResponse),
        (status = 404, description = "Backup not found", body = crate::api::openapi::ErrorResponse),
        (status = 409, description = "Another backup operation is running", body = crate::api::openapi::ErrorResponse),
        (status = 422, description = "Backup failed verification", body = crate::api::openapi::ErrorResponse),
    ),
    security(("bearer_auth" = [])),
)]
pub async fn restore_backup(
    State(state): State<SharedState>,
    Extension(auth): Extension<AuthExtension>,
    Path(id): Path<String>,
    payload: Option<Json<RestoreRequest>>,
) -> Result<Json<RestoreResponse>> {
    // A missing or unreadable body counts as unconfirmed
    let confirmed = payload.is_some_and(|Json(request)| request.confirm_restore);
    if !confirmed {
        return Err(AppError::Validation(
            "Restore replaces all current data; set confirm_restore to true to proceed"
                .to_string(),
        ));
    }

    let record = state.backups.find_backup(&id).await?;
    tracing::warn!(operator = %auth.email, backup = %record.id, "Restoring database from backup");
    state
        .backups
        .restore_from_backup(&record, auth.user_id)
        .await?;

    Ok(Json(RestoreResponse {
        restored: record.id,
        format: record.format,
    }))
}
