//! Backup outcome notifications.
//!
//! ## Configuration
//!
//! ```bash
//! BACKUP_NOTIFICATIONS_ENABLED=true
//! BACKUP_NOTIFICATION_EMAIL=ops@example.com
//! RESEND_API_KEY=re_...
//! FROM_EMAIL=backups@example.com
//! ```

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::NotificationConfig;
use crate::error::{AppError, Result};
use crate::models::backup::BackupRecord;

const RESEND_API_URL: &str = "https://api.resend.com/emails";

/// One outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Delivery channel for notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<()>;
}

#[derive(Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: &'a str,
}

/// Email delivery through the Resend HTTP API.
pub struct EmailNotificationSink {
    client: Client,
    api_key: Option<String>,
    from: String,
    endpoint: String,
}

impl EmailNotificationSink {
    pub fn new(api_key: Option<String>, from: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        if api_key.is_none() {
            warn!("RESEND_API_KEY not configured, email sending disabled");
        }

        Ok(Self {
            client,
            api_key,
            from: from.into(),
            endpoint: RESEND_API_URL.to_string(),
        })
    }
}

#[async_trait]
impl NotificationSink for EmailNotificationSink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        let Some(ref api_key) = self.api_key else {
            debug!(subject = %notification.subject, "Email sending disabled, skipping");
            return Ok(());
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&ResendEmail {
                from: &self.from,
                to: [&notification.to],
                subject: &notification.subject,
                text: &notification.body,
            })
            .send()
            .await
            .map_err(|e| AppError::Notification(format!("Email request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Notification(format!(
                "Email API returned {}: {}",
                status, body
            )));
        }

        info!(to = %notification.to, "Email sent: {}", notification.subject);
        Ok(())
    }
}

/// Sends exactly one message per backup run when notifications are configured.
pub struct BackupNotifier {
    sink: Arc<dyn NotificationSink>,
    config: NotificationConfig,
}

impl BackupNotifier {
    pub fn new(sink: Arc<dyn NotificationSink>, config: NotificationConfig) -> Self {
        Self { sink, config }
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Report a run's outcome. Delivery problems are logged, never returned.
    pub async fn notify(&self, outcome: &Result<BackupRecord>) {
        if !self.config.enabled {
            return;
        }
        let Some(ref recipient) = self.config.recipient else {
            return;
        };

        let notification = compose(outcome, recipient);
        if let Err(e) = self.sink.send(&notification).await {
            warn!("Failed to send backup notification: {}", e);
        }
    }
}

fn compose(outcome: &Result<BackupRecord>, recipient: &str) -> Notification {
    match outcome {
        Ok(record) => Notification {
            to: recipient.to_string(),
            subject: "Database backup completed".to_string(),
            body: format!(
                "The {} database backup completed successfully.\n\n\
                 File: {}\nSize: {:.2} MB\nCreated: {}\n",
                record.origin,
                record.filename,
                record.size_bytes as f64 / (1024.0 * 1024.0),
                record.created_at.to_rfc3339()
            ),
        },
        Err(e) => Notification {
            to: recipient.to_string(),
            subject: "Database backup failed".to_string(),
            body: format!(
                "The database backup failed.\n\nError: {}\nTime: {}\n\n{}\n",
                e,
                chrono::Utc::now().to_rfc3339(),
                e.suggestion()
                    .unwrap_or("Check the system configuration and retry manually.")
            ),
        },
    }
}

/// Sink that keeps messages in memory.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub sent: std::sync::Mutex<Vec<Notification>>,
    pub fail: bool,
}

#[cfg(test)]
#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().unwrap().push(notification.clone());
        if self.fail {
            return Err(AppError::Notification("smtp unreachable".into()));
        }
        Ok(())
    }
}
