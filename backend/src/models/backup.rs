//! Backup model for disaster recovery.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use utoipa::ToSchema;
use uuid::Uuid;

/// Prefix shared by every artifact file name.
pub const BACKUP_FILE_PREFIX: &str = "calendar_backup_";

/// Timestamp layout embedded in artifact names (UTC, sorts lexicographically).
const FILENAME_TIMESTAMP: &str = "%Y-%m-%d_%H-%M-%S-%3f";
/// Layout without milliseconds, accepted when re-listing older artifacts.
const LEGACY_FILENAME_TIMESTAMP: &str = "%Y-%m-%d_%H-%M-%S";

/// `metadata.source` marker of application-level exports.
pub const EXPORT_SOURCE: &str = "application-export";
/// Current fallback export document version.
pub const EXPORT_FORMAT_VERSION: &str = "1.0";

/// Who triggered a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackupOrigin {
    Automatic,
    Manual,
}

impl std::fmt::Display for BackupOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupOrigin::Automatic => write!(f, "automatic"),
            BackupOrigin::Manual => write!(f, "manual"),
        }
    }
}

/// Result of a backup attempt. Failed attempts are never listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackupOutcome {
    Success,
    Failed,
}

/// On-disk artifact format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum BackupFormat {
    /// Plain SQL produced by `pg_dump`
    NativeDump,
    /// JSON document produced by the application-level export
    JsonExport,
}

impl BackupFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            BackupFormat::NativeDump => "sql",
            BackupFormat::JsonExport => "json",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "sql" => Some(BackupFormat::NativeDump),
            "json" => Some(BackupFormat::JsonExport),
            _ => None,
        }
    }
}

impl std::fmt::Display for BackupFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackupFormat::NativeDump => write!(f, "native_dump"),
            BackupFormat::JsonExport => write!(f, "json_export"),
        }
    }
}

/// One snapshot artifact in the backup directory.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct BackupRecord {
    pub id: String,
    pub filename: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub origin: BackupOrigin,
    pub outcome: BackupOutcome,
    pub format: BackupFormat,
    #[serde(skip)]
    pub storage_path: PathBuf,
}

impl BackupRecord {
    /// Identifier derived from the creation time.
    pub fn id_for(created_at: DateTime<Utc>) -> String {
        format!("backup_{}", created_at.timestamp_millis())
    }

    /// Artifact file name for a snapshot created at `created_at`.
    pub fn filename_for(created_at: DateTime<Utc>, format: BackupFormat) -> String {
        format!(
            "{}{}.{}",
            BACKUP_FILE_PREFIX,
            created_at.format(FILENAME_TIMESTAMP),
            format.extension()
        )
    }

    /// Parse an artifact file name back into its timestamp and format.
    /// Returns `None` for files that do not follow the naming convention.
    pub fn parse_filename(filename: &str) -> Option<(Option<DateTime<Utc>>, BackupFormat)> {
        let rest = filename.strip_prefix(BACKUP_FILE_PREFIX)?;
        let (stem, ext) = rest.rsplit_once('.')?;
        let format = BackupFormat::from_extension(ext)?;

        let created_at = NaiveDateTime::parse_from_str(stem, FILENAME_TIMESTAMP)
            .or_else(|_| NaiveDateTime::parse_from_str(stem, LEGACY_FILENAME_TIMESTAMP))
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive));

        Some((created_at, format))
    }
}

/// What triggered a create call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackupTrigger {
    pub origin: BackupOrigin,
    pub operator_id: Option<Uuid>,
}

impl BackupTrigger {
    pub fn automatic() -> Self {
        Self {
            origin: BackupOrigin::Automatic,
            operator_id: None,
        }
    }

    pub fn manual(operator_id: Uuid) -> Self {
        Self {
            origin: BackupOrigin::Manual,
            operator_id: Some(operator_id),
        }
    }
}

/// Age and count limits applied by cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RetentionPolicy {
    pub retention_days: u32,
    pub max_count: u32,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            retention_days: 30,
            max_count: 50,
        }
    }
}

/// Outcome of a cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CleanupResult {
    pub removed: usize,
    pub kept: usize,
}

/// Structural verification result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct VerifyResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<BackupFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerifyResult {
    pub fn valid(format: BackupFormat) -> Self {
        Self {
            valid: true,
            format: Some(format),
            reason: None,
        }
    }

    pub fn invalid(format: Option<BackupFormat>, reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            format,
            reason: Some(reason.into()),
        }
    }
}

/// Aggregate figures over all listed backups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct BackupStats {
    pub total_count: usize,
    pub total_size_bytes: u64,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    pub avg_size_bytes: u64,
}

impl BackupStats {
    /// Aggregate a newest-first listing.
    pub fn from_records(records: &[BackupRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }
        let total_size_bytes: u64 = records.iter().map(|r| r.size_bytes).sum();
        let count = records.len() as u64;
        Self {
            total_count: records.len(),
            total_size_bytes,
            oldest: records.iter().map(|r| r.created_at).min(),
            newest: records.iter().map(|r| r.created_at).max(),
            avg_size_bytes: (total_size_bytes + count / 2) / count,
        }
    }
}

/// Header block of an application-level export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub format_version: String,
    pub created_at: DateTime<Utc>,
    pub source: String,
    pub origin: BackupOrigin,
    pub entity_counts: BTreeMap<String, usize>,
}

/// Full application-level export document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDocument {
    pub metadata: ExportMetadata,
    pub data: BTreeMap<String, Vec<serde_json::Value>>,
}
