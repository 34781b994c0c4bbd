//! Backup and restore service.
//!
//! Produces full database snapshots into the backup directory, either as a
//! native `pg_dump` script or, when the dump tool is unavailable, as an
//! application-level JSON export. Also lists, verifies, restores, prunes and
//! deletes those snapshots.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::BackupConfig;
use crate::error::{AppError, Result};
use crate::models::backup::{
    BackupFormat, BackupOrigin, BackupOutcome, BackupRecord, BackupStats, BackupTrigger,
    CleanupResult, ExportDocument, ExportMetadata, RetentionPolicy, VerifyResult,
    EXPORT_FORMAT_VERSION, EXPORT_SOURCE,
};
use crate::services::audit_service::{self, AuditAction, AuditEntry, AuditSink, ResourceType};
use crate::services::dump_tool::{ConnectionInfo, DumpTool};
use crate::services::entity_store::EntityStore;
use crate::services::metrics_service;

const PARTIAL_SUFFIX: &str = ".partial";

/// Produces one snapshot artifact at a target path.
#[async_trait]
trait SnapshotStrategy: Send + Sync {
    fn format(&self) -> BackupFormat;
    async fn produce(&self, target: &Path) -> Result<()>;
}

/// Full structure+data dump through the external dump tool.
struct NativeDumpStrategy<'a> {
    tool: &'a dyn DumpTool,
    conn: ConnectionInfo,
}

#[async_trait]
impl<'a> SnapshotStrategy for NativeDumpStrategy<'a> {
    fn format(&self) -> BackupFormat {
        BackupFormat::NativeDump
    }

    async fn produce(&self, target: &Path) -> Result<()> {
        debug!(tool = self.tool.name(), conn = ?self.conn, "Running native dump");
        self.tool.dump(&self.conn, target).await
    }
}

/// Application-level export of every configured entity into one JSON document.
struct FallbackExportStrategy<'a> {
    store: &'a dyn EntityStore,
    entities: &'a [String],
    origin: BackupOrigin,
    created_at: DateTime<Utc>,
}

impl<'a> FallbackExportStrategy<'a> {
    async fn build_document(&self) -> Result<ExportDocument> {
        let mut document = ExportDocument {
            metadata: ExportMetadata {
                format_version: EXPORT_FORMAT_VERSION.to_string(),
                created_at: self.created_at,
                source: EXPORT_SOURCE.to_string(),
                origin: self.origin,
                entity_counts: Default::default(),
            },
            data: Default::default(),
        };

        for entity in self.entities {
            let rows = self.store.export_entity(entity).await.map_err(|e| {
                AppError::FallbackExport {
                    entity: entity.clone(),
                    message: e.to_string(),
                }
            })?;
            debug!(entity = %entity, rows = rows.len(), "Exported entity");
            document.metadata.entity_counts.insert(entity.clone(), rows.len());
            document.data.insert(entity.clone(), rows);
        }

        Ok(document)
    }
}

#[async_trait]
impl<'a> SnapshotStrategy for FallbackExportStrategy<'a> {
    fn format(&self) -> BackupFormat {
        BackupFormat::JsonExport
    }

    async fn produce(&self, target: &Path) -> Result<()> {
        let document = self.build_document().await?;
        let bytes = serde_json::to_vec_pretty(&document)?;
        tokio::fs::write(target, bytes).await.map_err(|e| {
            AppError::Storage(format!("Failed to write {}: {}", target.display(), e))
        })
    }
}

/// Why a create attempt failed, with whatever was known about the artifact.
struct SnapshotFailure {
    filename: Option<String>,
    format: Option<BackupFormat>,
    error: AppError,
}

impl From<AppError> for SnapshotFailure {
    fn from(error: AppError) -> Self {
        Self {
            filename: None,
            format: None,
            error,
        }
    }
}

/// Records to keep and to remove under a retention policy.
#[derive(Debug, Default)]
pub struct RetentionPlan<'a> {
    pub keep: Vec<&'a BackupRecord>,
    pub remove: Vec<&'a BackupRecord>,
}

/// Decide which records a cleanup pass removes.
///
/// Records are ranked newest first. Anything at or past rank `max_count` is
/// removed; of the rest, anything created before `now - retention_days` is
/// removed.
pub fn plan_retention(
    records: &[BackupRecord],
    policy: RetentionPolicy,
    now: DateTime<Utc>,
) -> RetentionPlan<'_> {
    let mut ordered: Vec<&BackupRecord> = records.iter().collect();
    ordered.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    let cutoff = now.checked_sub_signed(chrono::Duration::days(i64::from(policy.retention_days)));

    let mut plan = RetentionPlan::default();
    for (rank, record) in ordered.into_iter().enumerate() {
        let over_count = rank >= policy.max_count as usize;
        let expired = cutoff.is_some_and(|cutoff| record.created_at < cutoff);
        if over_count || expired {
            plan.remove.push(record);
        } else {
            plan.keep.push(record);
        }
    }
    plan
}

/// Backup service
pub struct BackupService {
    config: BackupConfig,
    dump_tool: Arc<dyn DumpTool>,
    entity_store: Arc<dyn EntityStore>,
    audit: Arc<dyn AuditSink>,
    operation_lock: Arc<Mutex<()>>,
}

impl BackupService {
    pub fn new(
        config: BackupConfig,
        dump_tool: Arc<dyn DumpTool>,
        entity_store: Arc<dyn EntityStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            config,
            dump_tool,
            entity_store,
            audit,
            operation_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Take the single create/restore slot without waiting.
    fn acquire(&self, operation: &str) -> Result<OwnedMutexGuard<()>> {
        self.operation_lock.clone().try_lock_owned().map_err(|_| {
            warn!("Rejected {}: another backup or restore is running", operation);
            AppError::BackupInProgress(format!(
                "cannot {} while another backup or restore is running",
                operation
            ))
        })
    }

    fn connection(&self) -> Result<ConnectionInfo> {
        let url = self.config.connection_url.as_deref().ok_or_else(|| {
            AppError::Config("Database connection URL is not configured".to_string())
        })?;
        ConnectionInfo::parse(url)
    }

    async fn ensure_backup_dir(&self) -> Result<()> {
        let dir = &self.config.backup_dir;
        tokio::fs::create_dir_all(dir).await.map_err(|e| {
            AppError::Storage(format!(
                "Cannot create backup directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let check_file = dir.join(".write_check");
        tokio::fs::write(&check_file, b"").await.map_err(|e| {
            AppError::Storage(format!(
                "Backup directory {} is not writable: {}",
                dir.display(),
                e
            ))
        })?;
        let _ = tokio::fs::remove_file(&check_file).await;
        Ok(())
    }

    async fn select_strategy(
        &self,
        conn: ConnectionInfo,
        origin: BackupOrigin,
        created_at: DateTime<Utc>,
    ) -> Box<dyn SnapshotStrategy + '_> {
        if self.dump_tool.is_available().await {
            Box::new(NativeDumpStrategy {
                tool: self.dump_tool.as_ref(),
                conn,
            })
        } else {
            warn!(
                "{} is unavailable, falling back to application-level export",
                self.dump_tool.name()
            );
            Box::new(FallbackExportStrategy {
                store: self.entity_store.as_ref(),
                entities: &self.config.export_entities,
                origin,
                created_at,
            })
        }
    }

    /// Create a new backup.
    ///
    /// Runs retention cleanup after a successful snapshot; cleanup problems
    /// are logged and never fail the call.
    pub async fn create_backup(&self, trigger: BackupTrigger) -> Result<BackupRecord> {
        let _guard = self.acquire("create a backup")?;
        let start = Instant::now();

        let result = self.write_snapshot(trigger).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(record) => {
                metrics_service::record_backup(&record.format.to_string(), true, elapsed);
                info!(
                    origin = %trigger.origin,
                    format = %record.format,
                    size_bytes = record.size_bytes,
                    "Backup completed: {} in {:.1}s",
                    record.filename,
                    elapsed
                );

                if let Some(operator) = trigger.operator_id {
                    audit_service::record(
                        self.audit.as_ref(),
                        AuditEntry::new(AuditAction::CreateDatabaseBackup, ResourceType::System)
                            .user(operator)
                            .resource(record.id.clone())
                            .details(json!({
                                "filename": record.filename,
                                "size_bytes": record.size_bytes,
                                "format": record.format,
                                "origin": trigger.origin,
                            })),
                    )
                    .await;
                }

                let cleanup = self.cleanup_old_backups().await;
                debug!(
                    removed = cleanup.removed,
                    kept = cleanup.kept,
                    "Post-backup cleanup finished"
                );

                Ok(record)
            }
            Err(failure) => {
                let format = failure
                    .format
                    .map(|f| f.to_string())
                    .unwrap_or_else(|| "unknown".to_string());
                metrics_service::record_backup(&format, false, elapsed);
                error!(origin = %trigger.origin, "Backup failed: {}", failure.error);

                if let Some(operator) = trigger.operator_id {
                    audit_service::record(
                        self.audit.as_ref(),
                        AuditEntry::new(AuditAction::CreateDatabaseBackup, ResourceType::System)
                            .user(operator)
                            .details(json!({
                                "filename": failure.filename,
                                "origin": trigger.origin,
                            }))
                            .failed(failure.error.to_string()),
                    )
                    .await;
                }

                Err(failure.error)
            }
        }
    }

    async fn write_snapshot(
        &self,
        trigger: BackupTrigger,
    ) -> std::result::Result<BackupRecord, SnapshotFailure> {
        let conn = self.connection()?;
        self.ensure_backup_dir().await?;

        let mut created_at = Utc::now();
        let strategy = self.select_strategy(conn, trigger.origin, created_at).await;
        let format = strategy.format();

        // Ids are unique to the millisecond across both formats
        while self.name_taken(created_at).await {
            created_at += chrono::Duration::milliseconds(1);
        }
        let filename = BackupRecord::filename_for(created_at, format);
        let path = self.config.backup_dir.join(&filename);
        let partial = partial_path(&path);

        info!(origin = %trigger.origin, format = %format, "Starting database backup: {}", filename);

        let produced = match self.produce_artifact(strategy.as_ref(), &partial).await {
            Ok(size_bytes) => tokio::fs::rename(&partial, &path)
                .await
                .map(|()| size_bytes)
                .map_err(|e| {
                    AppError::Storage(format!("Failed to finalize {}: {}", filename, e))
                }),
            Err(error) => Err(error),
        };

        match produced {
            Ok(size_bytes) => Ok(BackupRecord {
                id: BackupRecord::id_for(created_at),
                filename,
                size_bytes,
                created_at,
                origin: trigger.origin,
                outcome: BackupOutcome::Success,
                format,
                storage_path: path,
            }),
            Err(error) => {
                remove_partial(&partial).await;
                Err(SnapshotFailure {
                    filename: Some(filename),
                    format: Some(format),
                    error,
                })
            }
        }
    }

    /// Whether an artifact of any format already uses this timestamp.
    async fn name_taken(&self, created_at: DateTime<Utc>) -> bool {
        for format in [BackupFormat::NativeDump, BackupFormat::JsonExport] {
            let path = self
                .config
                .backup_dir
                .join(BackupRecord::filename_for(created_at, format));
            if tokio::fs::try_exists(&path).await.unwrap_or(false)
                || tokio::fs::try_exists(partial_path(&path)).await.unwrap_or(false)
            {
                return true;
            }
        }
        false
    }

    /// Run the strategy under the dump ceiling and return the artifact size.
    async fn produce_artifact(&self, strategy: &dyn SnapshotStrategy, path: &Path) -> Result<u64> {
        let ceiling = self.config.dump_timeout;
        match tokio::time::timeout(ceiling, strategy.produce(path)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AppError::DumpTool(format!(
                    "snapshot timed out after {:?}",
                    ceiling
                )))
            }
        }

        let metadata = tokio::fs::metadata(path).await.map_err(|e| {
            AppError::Storage(format!("Backup artifact {} is missing: {}", path.display(), e))
        })?;
        if metadata.len() == 0 {
            return Err(AppError::Storage(format!(
                "Backup artifact {} is empty",
                path.display()
            )));
        }
        Ok(metadata.len())
    }

    /// List backups, newest first.
    pub async fn list_backups(&self) -> Vec<BackupRecord> {
        let dir = &self.config.backup_dir;
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("Cannot read backup directory {}: {}", dir.display(), e);
                return Vec::new();
            }
        };

        let mut records = Vec::new();
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    warn!("Error while reading backup directory {}: {}", dir.display(), e);
                    break;
                }
            };

            let filename = entry.file_name().to_string_lossy().into_owned();
            let Some((stamp, format)) = BackupRecord::parse_filename(&filename) else {
                continue;
            };

            let metadata = match entry.metadata().await {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping unreadable backup {}: {}", filename, e);
                    continue;
                }
            };
            if !metadata.is_file() {
                continue;
            }
            if metadata.len() == 0 {
                warn!("Skipping empty backup file {}", filename);
                continue;
            }

            let Some(created_at) =
                stamp.or_else(|| metadata.modified().ok().map(DateTime::<Utc>::from))
            else {
                warn!("Skipping backup {} with no usable timestamp", filename);
                continue;
            };

            records.push(BackupRecord {
                id: BackupRecord::id_for(created_at),
                filename,
                size_bytes: metadata.len(),
                created_at,
                origin: BackupOrigin::Automatic,
                outcome: BackupOutcome::Success,
                format,
                storage_path: entry.path(),
            });
        }

        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.filename.cmp(&a.filename))
        });
        records
    }

    /// Look up a listed backup by id.
    pub async fn find_backup(&self, id: &str) -> Result<BackupRecord> {
        self.list_backups()
            .await
            .into_iter()
            .find(|r| r.id == id)
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", id)))
    }

    /// Structural check of an artifact. Never fails; problems become `valid = false`.
    pub async fn verify_backup(&self, record: &BackupRecord) -> VerifyResult {
        let path = &record.storage_path;
        match tokio::fs::metadata(path).await {
            Ok(m) if m.len() == 0 => {
                return VerifyResult::invalid(Some(record.format), "Backup file is empty")
            }
            Ok(_) => {}
            Err(e) => {
                return VerifyResult::invalid(
                    Some(record.format),
                    format!("Backup file is not accessible: {}", e),
                )
            }
        }

        let result = match record.format {
            BackupFormat::NativeDump => verify_dump(path).await,
            BackupFormat::JsonExport => verify_export(path, self.config.primary_entity()).await,
        };

        if let Some(ref reason) = result.reason {
            warn!("Backup {} failed verification: {}", record.filename, reason);
        }
        result
    }

    /// Replace the live database with the contents of a backup.
    pub async fn restore_from_backup(&self, record: &BackupRecord, operator_id: Uuid) -> Result<()> {
        let start = Instant::now();
        let result = match self.acquire("restore a backup") {
            Ok(_guard) => {
                warn!(
                    operator = %operator_id,
                    "Restoring database from {}; current data will be replaced",
                    record.filename
                );
                let result = self.run_restore(record).await;
                metrics_service::record_restore(result.is_ok(), start.elapsed().as_secs_f64());
                result
            }
            Err(e) => Err(e),
        };
        let elapsed = start.elapsed().as_secs_f64();

        let mut entry = AuditEntry::new(AuditAction::RestoreDatabaseBackup, ResourceType::System)
            .user(operator_id)
            .resource(record.id.clone())
            .details(json!({
                "filename": record.filename,
                "format": record.format,
                "backup_created_at": record.created_at,
                "restored_at": Utc::now(),
            }));

        match &result {
            Ok(()) => info!("Database restored from {} in {:.1}s", record.filename, elapsed),
            Err(e) => {
                error!("Restore from {} failed: {}", record.filename, e);
                entry = entry.failed(e.to_string());
            }
        }
        audit_service::record(self.audit.as_ref(), entry).await;

        result
    }

    async fn run_restore(&self, record: &BackupRecord) -> Result<()> {
        let verification = self.verify_backup(record).await;
        if !verification.valid {
            return Err(AppError::InvalidBackup(
                verification
                    .reason
                    .unwrap_or_else(|| "verification failed".to_string()),
            ));
        }

        let ceiling = self.config.restore_timeout;
        match tokio::time::timeout(ceiling, self.apply_backup(record)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::RestoreTimeout(format!(
                "restore of {} exceeded {:?}",
                record.filename, ceiling
            ))),
        }
    }

    async fn apply_backup(&self, record: &BackupRecord) -> Result<()> {
        match record.format {
            BackupFormat::NativeDump => {
                let conn = self.connection()?;
                self.dump_tool.restore(&conn, &record.storage_path).await
            }
            BackupFormat::JsonExport => self.import_export(&record.storage_path).await,
        }
    }

    /// Load an application-level export back through the entity store.
    /// Configured entities go first, in configured order.
    async fn import_export(&self, path: &Path) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AppError::Storage(format!("Cannot read {}: {}", path.display(), e)))?;
        let document: ExportDocument = serde_json::from_slice(&bytes)
            .map_err(|e| AppError::InvalidBackup(format!("Malformed export document: {}", e)))?;

        let mut data = document.data;
        let mut ordered = Vec::with_capacity(data.len());
        for entity in &self.config.export_entities {
            if let Some(rows) = data.remove(entity) {
                ordered.push((entity.clone(), rows));
            }
        }
        ordered.extend(data);

        info!(
            entities = ordered.len(),
            exported_at = %document.metadata.created_at,
            "Importing application-level export"
        );
        self.entity_store.import_entities(&ordered).await
    }

    /// Apply the retention policy to the backup directory.
    pub async fn cleanup_old_backups(&self) -> CleanupResult {
        let records = self.list_backups().await;
        let plan = plan_retention(&records, self.config.retention, Utc::now());

        let mut removed = 0;
        for record in &plan.remove {
            match tokio::fs::remove_file(&record.storage_path).await {
                Ok(()) => {
                    removed += 1;
                    info!("Removed expired backup {}", record.filename);
                }
                Err(e) => warn!("Failed to remove backup {}: {}", record.filename, e),
            }
        }

        metrics_service::record_cleanup(removed as u64);
        CleanupResult {
            removed,
            kept: plan.keep.len(),
        }
    }

    /// Aggregate figures over the current listing.
    pub async fn get_stats(&self) -> BackupStats {
        let stats = BackupStats::from_records(&self.list_backups().await);
        metrics_service::set_backup_gauges(&stats);
        stats
    }

    /// Delete one backup by id.
    pub async fn delete_backup(&self, id: &str, operator_id: Uuid) -> Result<()> {
        let record = self.find_backup(id).await?;

        let entry = AuditEntry::new(AuditAction::DeleteDatabaseBackup, ResourceType::Backup)
            .user(operator_id)
            .resource(record.id.clone())
            .details(json!({
                "filename": record.filename,
                "size_bytes": record.size_bytes,
            }));

        match tokio::fs::remove_file(&record.storage_path).await {
            Ok(()) => {
                info!(operator = %operator_id, "Deleted backup {}", record.filename);
                audit_service::record(self.audit.as_ref(), entry).await;
                Ok(())
            }
            Err(e) => {
                let error =
                    AppError::Storage(format!("Failed to delete {}: {}", record.filename, e));
                audit_service::record(self.audit.as_ref(), entry.failed(error.to_string())).await;
                Err(error)
            }
        }
    }
}

/// In-progress name for an artifact. The extra suffix keeps it out of listings.
fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed partial backup {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial backup {}: {}", path.display(), e),
    }
}

async fn verify_dump(path: &Path) -> VerifyResult {
    let invalid = |reason: String| VerifyResult::invalid(Some(BackupFormat::NativeDump), reason);

    let file = match tokio::fs::File::open(path).await {
        Ok(f) => f,
        Err(e) => return invalid(format!("Cannot open backup file: {}", e)),
    };

    let mut lines = tokio::io::BufReader::new(file).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.contains("CREATE TABLE") => {
                return VerifyResult::valid(BackupFormat::NativeDump)
            }
            Ok(Some(_)) => {}
            Ok(None) => return invalid("No CREATE TABLE statement found".to_string()),
            Err(e) => return invalid(format!("Cannot read backup file: {}", e)),
        }
    }
}

async fn verify_export(path: &Path, primary_entity: &str) -> VerifyResult {
    let invalid = |reason: String| VerifyResult::invalid(Some(BackupFormat::JsonExport), reason);

    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) => return invalid(format!("Cannot read backup file: {}", e)),
    };
    let document: serde_json::Value = match serde_json::from_slice(&bytes) {
        Ok(v) => v,
        Err(e) => return invalid(format!("Not valid JSON: {}", e)),
    };

    if document
        .get("metadata")
        .and_then(|m| m.get("format_version"))
        .is_none()
    {
        return invalid("Missing metadata.format_version".to_string());
    }

    let has_primary = document
        .get("data")
        .and_then(|d| d.get(primary_entity))
        .is_some_and(serde_json::Value::is_array);
    if !has_primary {
        return invalid(format!("Missing data.{} collection", primary_entity));
    }

    VerifyResult::valid(BackupFormat::JsonExport)
}
