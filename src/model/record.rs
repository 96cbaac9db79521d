// dbbackup/src/model/record.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::errors::{AppError, Result};
use crate::transform::CompressionAlgorithm;

/// Metadata key holding the failure reason of a `FAILED` record.
pub const ERROR_METADATA_KEY: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

impl BackupStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BackupStatus::InProgress)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupStatus::InProgress => "IN_PROGRESS",
            BackupStatus::Completed => "COMPLETED",
            BackupStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Durable state of one backup attempt.
///
/// Terminal fields (`completed_at`, `size_bytes`, `checksum`,
/// `storage_location`) stay `None` while the record is `IN_PROGRESS`; the only
/// way to fill them is the consuming [`BackupRecord::mark_completed`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    pub id: String,
    pub database_type: String,
    pub database_name: String,
    pub host: String,
    pub port: u16,
    pub status: BackupStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
    pub checksum: Option<String>,
    pub compression_algorithm: CompressionAlgorithm,
    pub encrypted: bool,
    #[serde(default)]
    pub storage_provider: Option<String>,
    pub storage_location: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Terminal fields supplied when a backup succeeds.
#[derive(Debug, Clone)]
pub struct Completion {
    pub checksum: String,
    pub size_bytes: u64,
    pub storage_provider: String,
    pub storage_location: String,
    pub metadata: HashMap<String, String>,
}

impl BackupRecord {
    /// New `IN_PROGRESS` record with a fresh id.
    pub fn start(
        database_type: &str,
        database_name: &str,
        host: &str,
        port: u16,
        compression_algorithm: CompressionAlgorithm,
        encrypted: bool,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            database_type: database_type.to_ascii_lowercase(),
            database_name: database_name.to_string(),
            host: host.to_string(),
            port,
            status: BackupStatus::InProgress,
            created_at: Utc::now(),
            completed_at: None,
            size_bytes: None,
            checksum: None,
            compression_algorithm,
            encrypted,
            storage_provider: None,
            storage_location: None,
            metadata: HashMap::new(),
        }
    }

    pub fn mark_completed(self, completion: Completion) -> Result<Self> {
        self.ensure_in_progress(BackupStatus::Completed)?;
        let mut metadata = self.metadata;
        metadata.extend(completion.metadata);
        Ok(Self {
            status: BackupStatus::Completed,
            completed_at: Some(Utc::now()),
            size_bytes: Some(completion.size_bytes),
            checksum: Some(completion.checksum),
            storage_provider: Some(completion.storage_provider),
            storage_location: Some(completion.storage_location),
            metadata,
            ..self
        })
    }

    /// `FAILED` keeps the size, checksum and location unset; the reason goes
    /// into `metadata["error"]`.
    pub fn mark_failed(self, error: &str) -> Result<Self> {
        self.ensure_in_progress(BackupStatus::Failed)?;
        let mut metadata = self.metadata;
        metadata.insert(ERROR_METADATA_KEY.to_string(), error.to_string());
        Ok(Self {
            status: BackupStatus::Failed,
            completed_at: Some(Utc::now()),
            metadata,
            ..self
        })
    }

    pub fn error_message(&self) -> Option<&str> {
        self.metadata.get(ERROR_METADATA_KEY).map(String::as_str)
    }

    pub fn is_expired(&self, retention_days: i64) -> bool {
        self.created_at < Utc::now() - Duration::days(retention_days)
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.completed_at
            .map(|done| (done - self.created_at).num_seconds())
    }

    fn ensure_in_progress(&self, to: BackupStatus) -> Result<()> {
        if self.status != BackupStatus::InProgress {
            return Err(AppError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> BackupRecord {
        BackupRecord::start("Postgres", "testdb", "localhost", 5432, CompressionAlgorithm::Gzip, false)
    }

    fn completion() -> Completion {
        Completion {
            checksum: "ab".repeat(32),
            size_bytes: 42,
            storage_provider: "local".into(),
            storage_location: "/var/backups/x.dump.gz".into(),
            metadata: HashMap::from([("tool".to_string(), "pg_dump".to_string())]),
        }
    }

    #[test]
    fn new_record_has_no_terminal_fields() {
        let r = record();
        assert_eq!(r.status, BackupStatus::InProgress);
        assert_eq!(r.database_type, "postgres");
        assert!(r.completed_at.is_none());
        assert!(r.size_bytes.is_none());
        assert!(r.checksum.is_none());
        assert!(r.storage_location.is_none());
        assert!(uuid::Uuid::parse_str(&r.id).is_ok());
    }

    #[test]
    fn completion_fills_terminal_fields() -> Result<()> {
        let done = record().mark_completed(completion())?;
        assert_eq!(done.status, BackupStatus::Completed);
        assert_eq!(done.size_bytes, Some(42));
        assert_eq!(done.storage_provider.as_deref(), Some("local"));
        assert_eq!(done.metadata.get("tool").map(String::as_str), Some("pg_dump"));
        assert!(done.duration_seconds().is_some());
        Ok(())
    }

    #[test]
    fn failure_records_reason_only() -> Result<()> {
        let failed = record().mark_failed("pg_dump exited with status 1")?;
        assert_eq!(failed.status, BackupStatus::Failed);
        assert_eq!(failed.error_message(), Some("pg_dump exited with status 1"));
        assert!(failed.checksum.is_none());
        assert!(failed.storage_location.is_none());
        Ok(())
    }

    #[test]
    fn terminal_states_do_not_move() -> Result<()> {
        let done = record().mark_completed(completion())?;
        let err = done.clone().mark_failed("late").unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition { .. }));
        assert!(done.mark_completed(completion()).is_err());

        let failed = record().mark_failed("boom")?;
        assert!(failed.mark_completed(completion()).is_err());
        Ok(())
    }

    #[test]
    fn serializes_with_wire_names() -> Result<()> {
        let json = serde_json::to_value(record())?;
        assert_eq!(json["status"], "IN_PROGRESS");
        assert_eq!(json["compressionAlgorithm"], "GZIP");
        assert_eq!(json["databaseName"], "testdb");
        Ok(())
    }

    #[test]
    fn expiry_uses_creation_time() {
        let mut r = record();
        assert!(!r.is_expired(30));
        r.created_at = Utc::now() - Duration::days(31);
        assert!(r.is_expired(30));
    }
}
