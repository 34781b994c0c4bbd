//! Application error types and result alias.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application result type alias
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed configuration (e.g. database connection string)
    #[error("Configuration error: {0}")]
    Config(String),

    /// External dump/restore tool exited non-zero or timed out
    #[error("Dump tool error: {0}")]
    DumpTool(String),

    /// Restore exceeded its time ceiling
    #[error("Restore timed out: {0}")]
    RestoreTimeout(String),

    /// Backup storage directory unreadable/unwritable or artifact missing
    #[error("Storage error: {0}")]
    Storage(String),

    /// Application-level export failed while reading an entity
    #[error("Fallback export failed on '{entity}': {message}")]
    FallbackExport { entity: String, message: String },

    /// Backup failed structural verification
    #[error("Invalid backup: {0}")]
    InvalidBackup(String),

    /// Not found error
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Another create/restore operation holds the backup lock
    #[error("Backup operation in progress: {0}")]
    BackupInProgress(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Authentication error
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Authorization error
    #[error("Access denied: {0}")]
    Authorization(String),

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Notification delivery error
    #[error("Notification error: {0}")]
    Notification(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Address parse error
    #[error("Address parse error: {0}")]
    AddrParse(#[from] std::net::AddrParseError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// JWT error
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Actionable hint shown to operators alongside the error message.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            AppError::DumpTool(_) => Some(
                "Verify that pg_dump is installed and reachable, and that DATABASE_URL is configured correctly",
            ),
            AppError::Config(_) => Some("Check the DATABASE_URL and BACKUP_* environment variables"),
            AppError::RestoreTimeout(_) => {
                Some("Check database load and increase BACKUP_RESTORE_TIMEOUT_SECS if the dump is large")
            }
            AppError::BackupInProgress(_) => Some("Wait for the running operation to finish and retry"),
            AppError::Storage(_) => Some("Check that BACKUP_DIR exists and is writable"),
            _ => None,
        }
    }

    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            AppError::DumpTool(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DUMP_TOOL_ERROR"),
            AppError::RestoreTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "RESTORE_TIMEOUT"),
            AppError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            AppError::FallbackExport { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "FALLBACK_EXPORT_ERROR")
            }
            AppError::InvalidBackup(_) => (StatusCode::UNPROCESSABLE_ENTITY, "INVALID_BACKUP"),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            AppError::BackupInProgress(_) => (StatusCode::CONFLICT, "BACKUP_IN_PROGRESS"),
            AppError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            AppError::Authentication(_) => (StatusCode::UNAUTHORIZED, "AUTH_ERROR"),
            AppError::Authorization(_) => (StatusCode::FORBIDDEN, "FORBIDDEN"),
            AppError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
            AppError::Migration(_) => (StatusCode::INTERNAL_SERVER_ERROR, "MIGRATION_ERROR"),
            AppError::Notification(_) => (StatusCode::BAD_GATEWAY, "NOTIFICATION_ERROR"),
            AppError::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR"),
            AppError::AddrParse(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ADDR_PARSE_ERROR"),
            AppError::Json(_) => (StatusCode::BAD_REQUEST, "JSON_ERROR"),
            AppError::Jwt(_) => (StatusCode::UNAUTHORIZED, "JWT_ERROR"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        let message = match &self {
            AppError::Database(_) => "Database operation failed".to_string(),
            AppError::Migration(_) => "Database migration failed".to_string(),
            AppError::Io(_) => "IO operation failed".to_string(),
            AppError::AddrParse(_) => "Invalid address".to_string(),
            AppError::Json(_) => "Invalid JSON".to_string(),
            AppError::Jwt(_) => "Invalid token".to_string(),
            other => other.to_string(),
        };

        // Log the error
        tracing::error!(error = %self, code = code, "Request error");

        let mut body = json!({
            "code": code,
            "message": message,
        });
        if let Some(suggestion) = self.suggestion() {
            body["suggestion"] = json!(suggestion);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_in_progress_maps_to_conflict() {
        let err = AppError::BackupInProgress("create".into());
        assert_eq!(err.status_and_code().0, StatusCode::CONFLICT);
        assert!(err.suggestion().is_some());
    }

    #[test]
    fn test_dump_tool_error_carries_suggestion() {
        let err = AppError::DumpTool("exit status 1".into());
        assert!(err.suggestion().unwrap().contains("pg_dump"));
    }

    #[test]
    fn test_fallback_export_message_names_entity() {
        let err = AppError::FallbackExport {
            entity: "events".into(),
            message: "relation does not exist".into(),
        };
        assert_eq!(
            err.to_string(),
            "Fallback export failed on 'events': relation does not exist"
        );
    }

    #[test]
    fn test_validation_has_no_suggestion() {
        assert!(AppError::Validation("x".into()).suggestion().is_none());
        assert_eq!(
            AppError::Validation("x".into()).status_and_code().0,
            StatusCode::BAD_REQUEST
        );
    }
}
