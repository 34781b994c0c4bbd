//! Application configuration loaded from environment variables.

use crate::error::{AppError, Result};
use crate::models::backup::RetentionPolicy;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default entity tables exported by the application-level fallback, in
/// dependency order (parents before children).
pub const DEFAULT_EXPORT_ENTITIES: &[&str] = &[
    "users",
    "groups",
    "user_groups",
    "events",
    "availabilities",
    "notifications",
];

/// Application configuration
#[derive(Clone)]
pub struct Config {
    /// Database connection URL used by the application pool
    pub database_url: String,

    /// Server bind address (host:port)
    pub bind_address: String,

    /// JWT secret key for validating operator tokens
    pub jwt_secret: String,

    /// Backup engine settings
    pub backup: BackupConfig,

    /// Automatic backup schedule
    pub scheduler: SchedulerConfig,

    /// Backup outcome notifications
    pub notifications: NotificationConfig,

    /// Resend API key for email delivery (optional)
    pub resend_api_key: Option<String>,

    /// Sender address for outgoing email
    pub from_email: String,

    /// OTLP collector endpoint (optional)
    pub otel_endpoint: Option<String>,

    /// Service name reported to the tracing backend
    pub otel_service_name: String,
}

redacted_debug!(Config {
    redact database_url,
    show bind_address,
    redact jwt_secret,
    show backup,
    show scheduler,
    show notifications,
    redact_option resend_api_key,
    show from_email,
    show otel_endpoint,
    show otel_service_name,
});

/// Settings consumed by the backup engine.
#[derive(Clone)]
pub struct BackupConfig {
    /// Connection string of the database being backed up. Resolved lazily
    /// on every create/restore call, so a missing value only fails those calls.
    pub connection_url: Option<String>,

    /// Directory holding backup artifacts
    pub backup_dir: PathBuf,

    /// Age/count retention applied after every successful backup
    pub retention: RetentionPolicy,

    /// Entities read by the fallback export, first one is the primary collection
    pub export_entities: Vec<String>,

    /// Ceiling for producing one snapshot
    pub dump_timeout: Duration,

    /// Ceiling for one restore
    pub restore_timeout: Duration,

    /// Path or name of the `pg_dump` binary
    pub pg_dump_path: String,

    /// Path or name of the `psql` binary
    pub psql_path: String,
}

redacted_debug!(BackupConfig {
    redact_option connection_url,
    show backup_dir,
    show retention,
    show export_entities,
    show dump_timeout,
    show restore_timeout,
    show pg_dump_path,
    show psql_path,
});

impl BackupConfig {
    /// Settings with production defaults rooted at `backup_dir`.
    pub fn new(backup_dir: impl Into<PathBuf>, connection_url: Option<String>) -> Self {
        Self {
            connection_url,
            backup_dir: backup_dir.into(),
            retention: RetentionPolicy::default(),
            export_entities: DEFAULT_EXPORT_ENTITIES.iter().map(|s| s.to_string()).collect(),
            dump_timeout: Duration::from_secs(300),
            restore_timeout: Duration::from_secs(600),
            pg_dump_path: "pg_dump".to_string(),
            psql_path: "psql".to_string(),
        }
    }

    /// Name of the collection that must be present in a fallback export.
    pub fn primary_entity(&self) -> &str {
        self.export_entities
            .first()
            .map(String::as_str)
            .unwrap_or("users")
    }
}

/// Automatic backup scheduling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub cron_expression: String,
    pub timezone: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cron_expression: "0 2 * * *".to_string(),
            timezone: "Europe/Rome".to_string(),
        }
    }
}

/// Where backup outcome notifications go.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub recipient: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL")
            .map_err(|_| AppError::Config("DATABASE_URL not set".into()))?;

        let mut backup = BackupConfig::new(
            env::var("BACKUP_DIR").unwrap_or_else(|_| "./backups".into()),
            env::var("BACKUP_DATABASE_URL")
                .ok()
                .or_else(|| Some(database_url.clone())),
        );
        backup.retention = RetentionPolicy {
            retention_days: env_or("BACKUP_RETENTION_DAYS", 30)?,
            max_count: env_or("BACKUP_MAX_COUNT", 50)?,
        };
        if let Ok(entities) = env::var("BACKUP_EXPORT_ENTITIES") {
            let parsed = parse_entity_list(&entities)?;
            if !parsed.is_empty() {
                backup.export_entities = parsed;
            }
        }
        backup.dump_timeout = Duration::from_secs(env_or("BACKUP_DUMP_TIMEOUT_SECS", 300)?);
        backup.restore_timeout = Duration::from_secs(env_or("BACKUP_RESTORE_TIMEOUT_SECS", 600)?);
        backup.pg_dump_path = env::var("PG_DUMP_PATH").unwrap_or_else(|_| "pg_dump".into());
        backup.psql_path = env::var("PSQL_PATH").unwrap_or_else(|_| "psql".into());

        let scheduler = SchedulerConfig {
            enabled: env_flag("BACKUP_AUTO_ENABLED"),
            cron_expression: env::var("BACKUP_SCHEDULE").unwrap_or_else(|_| "0 2 * * *".into()),
            timezone: env::var("BACKUP_TIMEZONE")
                .or_else(|_| env::var("TZ"))
                .unwrap_or_else(|_| "Europe/Rome".into()),
        };

        let notifications = NotificationConfig {
            enabled: env_flag("BACKUP_NOTIFICATIONS_ENABLED"),
            recipient: env::var("BACKUP_NOTIFICATION_EMAIL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        Ok(Self {
            database_url,
            bind_address: env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            jwt_secret: env::var("JWT_SECRET")
                .map_err(|_| AppError::Config("JWT_SECRET not set".into()))?,
            backup,
            scheduler,
            notifications,
            resend_api_key: env::var("RESEND_API_KEY").ok().filter(|s| !s.is_empty()),
            from_email: env::var("FROM_EMAIL").unwrap_or_else(|_| "noreply@localhost".into()),
            otel_endpoint: env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            otel_service_name: env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "calendar-backend".into()),
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    parse_or(key, env::var(key).ok().as_deref(), default)
}

/// Unset or blank falls back to `default`; anything else must parse.
fn parse_or<T: FromStr>(key: &str, raw: Option<&str>, default: T) -> Result<T> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| AppError::Config(format!("Invalid value for {}: {:?}", key, value))),
    }
}

fn env_flag(key: &str) -> bool {
    env::var(key).map(|v| v == "true").unwrap_or(false)
}

/// Parse a comma-separated entity list. Names are interpolated into SQL as
/// quoted identifiers, so only `[A-Za-z0-9_]` is accepted.
pub fn parse_entity_list(raw: &str) -> Result<Vec<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|name| {
            if name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                Ok(name.to_string())
            } else {
                Err(AppError::Config(format!("Invalid export entity name: {}", name)))
            }
        })
        .collect()
}
