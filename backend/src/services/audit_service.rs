//! Audit logging service.
//!
//! Records operator-initiated backup actions. Writes are best-effort from the
//! caller's point of view: a failed audit insert is logged and never changes
//! the outcome of the operation being audited.

use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, Result};

/// Audit action types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    CreateDatabaseBackup,
    DeleteDatabaseBackup,
    RestoreDatabaseBackup,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::CreateDatabaseBackup => "CREATE_DATABASE_BACKUP",
            AuditAction::DeleteDatabaseBackup => "DELETE_DATABASE_BACKUP",
            AuditAction::RestoreDatabaseBackup => "RESTORE_DATABASE_BACKUP",
        }
    }
}

/// Resource types for audit logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    System,
    Backup,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::System => "SYSTEM",
            ResourceType::Backup => "BACKUP",
        }
    }
}

/// Audit log entry builder
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub user_id: Option<Uuid>,
    pub action: AuditAction,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error_message: Option<String>,
    pub correlation_id: Uuid,
}

impl AuditEntry {
    pub fn new(action: AuditAction, resource_type: ResourceType) -> Self {
        Self {
            user_id: None,
            action,
            resource_type,
            resource_id: None,
            details: None,
            success: true,
            error_message: None,
            correlation_id: Uuid::new_v4(),
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn resource(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn failed(mut self, error_message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(error_message.into());
        self
    }
}

/// Durable destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log(&self, entry: AuditEntry) -> Result<()>;
}

/// Write an entry, logging instead of propagating any failure.
pub async fn record(sink: &dyn AuditSink, entry: AuditEntry) {
    let action = entry.action.as_str();
    let user = entry.user_id;
    match sink.log(entry).await {
        Ok(()) => tracing::info!(action, user_id = ?user, "Audit log created"),
        Err(e) => tracing::warn!(action, user_id = ?user, "Failed to write audit log: {}", e),
    }
}

/// Audit service backed by the `audit_log` table
pub struct AuditService {
    db: PgPool,
}

impl AuditService {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AuditSink for AuditService {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log
                (user_id, action, resource_type, resource_id, details, success, error_message, correlation_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.user_id)
        .bind(entry.action.as_str())
        .bind(entry.resource_type.as_str())
        .bind(&entry.resource_id)
        .bind(&entry.details)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.correlation_id)
        .execute(&self.db)
        .await
        .map_err(AppError::Database)?;

        Ok(())
    }
}

/// In-memory sink, for tests and deployments without an audit table.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything logged so far.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .map(|entries| entries.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn log(&self, entry: AuditEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| AppError::Internal("audit sink poisoned".to_string()))?
            .push(entry);
        Ok(())
    }
}
