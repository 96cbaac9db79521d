// dbbackup/src/model/command.rs
//! Value objects exchanged with adapters (CLI, schedulers, HTTP layers).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::transform::CompressionAlgorithm;

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupCommand {
    pub database_type: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub compression: CompressionAlgorithm,
    pub encrypt: bool,
    pub storage_provider: String,
    #[serde(default)]
    pub tables: Option<Vec<String>>,
    #[serde(default)]
    pub additional_options: HashMap<String, String>,
}

impl fmt::Debug for BackupCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupCommand")
            .field("database_type", &self.database_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("compression", &self.compression)
            .field("encrypt", &self.encrypt)
            .field("storage_provider", &self.storage_provider)
            .field("tables", &self.tables)
            .field("additional_options", &self.additional_options)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupSummary {
    pub storage_location: String,
    pub size_bytes: u64,
    pub checksum: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub backup_id: String,
    pub success: bool,
    pub message: String,
    pub metadata: Option<BackupSummary>,
}

impl BackupResult {
    pub fn succeeded(backup_id: String, summary: BackupSummary) -> Self {
        Self {
            backup_id,
            success: true,
            message: "Backup completed successfully".to_string(),
            metadata: Some(summary),
        }
    }

    pub fn failed(backup_id: String, reason: &str) -> Self {
        Self {
            backup_id,
            success: false,
            message: format!("Backup failed: {reason}"),
            metadata: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreCommand {
    pub backup_id: String,
    pub target_host: String,
    pub target_port: u16,
    pub target_database: String,
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub skip_if_exists: bool,
    #[serde(default)]
    pub tables: Option<Vec<String>>,
}

impl fmt::Debug for RestoreCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestoreCommand")
            .field("backup_id", &self.backup_id)
            .field("target_host", &self.target_host)
            .field("target_port", &self.target_port)
            .field("target_database", &self.target_database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("skip_if_exists", &self.skip_if_exists)
            .field("tables", &self.tables)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub backup_id: String,
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

impl RestoreResult {
    pub fn succeeded(backup_id: String, duration_ms: u64) -> Self {
        Self {
            backup_id,
            success: true,
            message: "Restore completed successfully.".to_string(),
            duration_ms,
        }
    }

    pub fn failed(backup_id: String, reason: &str, duration_ms: u64) -> Self {
        Self {
            backup_id,
            success: false,
            message: format!("Restore failed: {reason}"),
            duration_ms,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionCommand {
    pub database_type: String,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for TestConnectionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestConnectionCommand")
            .field("database_type", &self.database_type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestConnectionResult {
    pub success: bool,
    pub message: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListBackupsQuery {
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub database_type: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub include_expired: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_hides_passwords() {
        let command = TestConnectionCommand {
            database_type: "postgres".into(),
            host: "localhost".into(),
            port: 5432,
            database: "app".into(),
            username: "admin".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{command:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn backup_command_parses_camel_case() -> serde_json::Result<()> {
        let command: BackupCommand = serde_json::from_str(
            r#"{
                "databaseType": "mysql", "host": "db", "port": 3306, "database": "shop",
                "username": "root", "password": "pw", "compression": "ZIP",
                "encrypt": true, "storageProvider": "s3"
            }"#,
        )?;
        assert_eq!(command.compression, CompressionAlgorithm::Zip);
        assert!(command.tables.is_none());
        assert!(command.additional_options.is_empty());
        Ok(())
    }

    #[test]
    fn result_messages() {
        assert_eq!(
            BackupResult::failed("id".into(), "dump exploded").message,
            "Backup failed: dump exploded"
        );
        assert_eq!(
            RestoreResult::succeeded("id".into(), 5).message,
            "Restore completed successfully."
        );
    }
}
