//! Audit trail of job and cache transitions
//!
//! One JSON object per line in `<storage root>/audit.log`:
//! `{"timestamp": ..., "event": "cache.claimed", "data": {...}}`.

use crate::config::{schema::Config, ConfigManager};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// Everything that gets audited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuditEvent {
    #[serde(rename = "job.created")]
    JobCreated,
    #[serde(rename = "job.source")]
    JobSource,
    #[serde(rename = "job.completed")]
    JobCompleted,
    #[serde(rename = "job.failed")]
    JobFailed,
    #[serde(rename = "cache.claimed")]
    CacheClaimed,
    #[serde(rename = "cache.published")]
    CachePublished,
    #[serde(rename = "cache.abandoned")]
    CacheAbandoned,
    #[serde(rename = "cache.reclaimed")]
    CacheReclaimed,
}

impl AuditEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobCreated => "job.created",
            Self::JobSource => "job.source",
            Self::JobCompleted => "job.completed",
            Self::JobFailed => "job.failed",
            Self::CacheClaimed => "cache.claimed",
            Self::CachePublished => "cache.published",
            Self::CacheAbandoned => "cache.abandoned",
            Self::CacheReclaimed => "cache.reclaimed",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Serialize)]
struct AuditLine<'a> {
    timestamp: DateTime<Utc>,
    event: AuditEvent,
    data: &'a serde_json::Value,
}

/// Append-only audit sink. `None` means auditing is off.
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    /// Honors `general.audit_log` and the storage root
    pub fn new(config: &Config) -> Self {
        Self {
            path: config
                .general
                .audit_log
                .then(|| ConfigManager::audit_log_path(config)),
        }
    }

    pub fn with_path(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record one event. Write failures are logged and dropped so a full
    /// disk never fails a build.
    pub async fn record(&self, event: AuditEvent, data: serde_json::Value) {
        let Some(path) = &self.path else {
            return;
        };

        let line = AuditLine {
            timestamp: Utc::now(),
            event,
            data: &data,
        };
        let mut bytes = match serde_json::to_vec(&line) {
            Ok(b) => b,
            Err(e) => {
                warn!("Dropping audit event {}: {}", event, e);
                return;
            }
        };
        bytes.push(b'\n');

        if let Err(e) = append(path, &bytes).await {
            warn!("Audit log {} not writable: {}", path.display(), e);
        }
    }
}

async fn append(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn lines(path: &Path) -> Vec<serde_json::Value> {
        tokio::fs::read_to_string(path)
            .await
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn writes_one_line_per_event() {
        let dir = TempDir::new().unwrap();
        let audit = AuditLog::with_path(dir.path().join("audit.log"));

        audit
            .record(AuditEvent::JobCreated, json!({"job_id": "abcdef123456"}))
            .await;
        audit
            .record(AuditEvent::CacheClaimed, json!({"key": "00ff"}))
            .await;

        let entries = lines(audit.path().unwrap()).await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["event"], "job.created");
        assert_eq!(entries[0]["data"]["job_id"], "abcdef123456");
        assert!(entries[0]["timestamp"].is_string());
        assert_eq!(entries[1]["event"], "cache.claimed");
    }

    #[tokio::test]
    async fn disabled_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.root = Some(dir.path().to_path_buf());
        config.general.audit_log = false;

        let audit = AuditLog::new(&config);
        assert!(audit.path().is_none());
        audit.record(AuditEvent::JobFailed, json!({})).await;

        assert!(!dir.path().join("audit.log").exists());
    }

    #[tokio::test]
    async fn config_controls_path() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.storage.root = Some(dir.path().to_path_buf());

        let audit = AuditLog::new(&config);
        audit.record(AuditEvent::JobSource, json!({"bytes": 12})).await;

        assert!(dir.path().join("audit.log").is_file());
    }

    #[test]
    fn event_names_match_serde() {
        for event in [
            AuditEvent::JobCompleted,
            AuditEvent::CachePublished,
            AuditEvent::CacheAbandoned,
            AuditEvent::CacheReclaimed,
        ] {
            let serialized = serde_json::to_value(event).unwrap();
            assert_eq!(serialized, event.as_str());
        }
    }
}
