// dbbackup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{BackupCommand, RestoreCommand, TestConnectionCommand};
use crate::storage::s3::{DEFAULT_FOLDER_PREFIX, DEFAULT_MULTIPART_THRESHOLD, DEFAULT_PART_SIZE};
use crate::transform::{CompressionAlgorithm, EncryptionKey};

pub const CONFIG_PATH_ENV: &str = "DBBACKUP_CONFIG";
pub const ENCRYPTION_KEY_ENV: &str = "DBBACKUP_ENCRYPTION_KEY";
pub const DB_PASSWORD_ENV: &str = "DB_PASSWORD";
pub const TARGET_DB_PASSWORD_ENV: &str = "TARGET_DB_PASSWORD";

const DEFAULT_CONFIG_PATH: &str = "config.json";
const DEFAULT_LOCAL_DIR: &str = "./backups";
const DEFAULT_RECORD_DIR: &str = "./backups/records";
const DEFAULT_DUMP_TIMEOUT_SECS: u64 = 3600;
const DEFAULT_RETENTION_DAYS: i64 = 30;
/// S3 rejects non-final parts smaller than this.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
    pub multipart_threshold_bytes: Option<u64>,
    pub part_size_bytes: Option<usize>,
    pub force_path_style: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonLocalStorageConfig {
    pub base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonBackupSection {
    pub database_type: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub compression: Option<String>,
    pub encrypt: Option<bool>,
    pub storage_provider: Option<String>,
    pub tables: Option<Vec<String>>,
    pub additional_options: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonRestoreSection {
    pub backup_id: Option<String>,
    pub target_host: Option<String>,
    pub target_port: Option<u16>,
    pub target_database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub skip_if_exists: Option<bool>,
    pub tables: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonConnectionSection {
    pub database_type: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub temp_root: Option<PathBuf>,
    pub record_store_dir: Option<PathBuf>,
    pub dump_timeout_secs: Option<u64>,
    pub production: Option<bool>,
    pub encryption_key: Option<String>,
    pub retention_days: Option<i64>,
    pub local_storage: Option<JsonLocalStorageConfig>,
    pub s3_storage: Option<JsonS3StorageConfig>,
    pub minio_storage: Option<JsonS3StorageConfig>,
    pub backup: Option<JsonBackupSection>,
    pub restore: Option<JsonRestoreSection>,
    pub test_connection: Option<JsonConnectionSection>,
}

// Application's internal configuration structs
#[derive(Debug, Clone)]
pub struct LocalStorageConfig {
    pub base_dir: PathBuf,
}

#[derive(Clone)]
pub struct S3StorageConfig {
    pub bucket_name: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: String,
    pub multipart_threshold_bytes: u64,
    pub part_size_bytes: usize,
    pub force_path_style: bool,
}

impl fmt::Debug for S3StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3StorageConfig")
            .field("bucket_name", &self.bucket_name)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key.as_ref().map(|_| "<redacted>"))
            .field("endpoint_url", &self.endpoint_url)
            .field("folder_prefix", &self.folder_prefix)
            .field("multipart_threshold_bytes", &self.multipart_threshold_bytes)
            .field("part_size_bytes", &self.part_size_bytes)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub temp_root: PathBuf,
    pub record_store_dir: PathBuf,
    pub dump_timeout: Duration,
    pub production: bool,
    pub encryption_key: Option<EncryptionKey>,
    pub retention_days: i64,
    pub local_storage: LocalStorageConfig,
    pub s3_storage: Option<S3StorageConfig>,
    pub minio_storage: Option<S3StorageConfig>,
    pub raw_json_config: RawJsonConfig, // Store the parsed raw config
}

impl AppConfig {
    /// Path from `DBBACKUP_CONFIG`, falling back to `./config.json`.
    pub fn default_path() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content)
            .with_context(|| {
                format!(
                    "Failed to parse JSON from config file at {}",
                    config_path.display()
                )
            })?;
        Self::from_raw(raw_json_config, |key| std::env::var(key).ok())
    }

    /// Validates a parsed config. `env` supplies values that may live outside
    /// the file, such as the encryption key.
    pub fn from_raw(raw: RawJsonConfig, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let encryption_key = raw
            .encryption_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| env(ENCRYPTION_KEY_ENV).filter(|k| !k.trim().is_empty()))
            .map(|hex_key| EncryptionKey::from_hex(&hex_key))
            .transpose()
            .context("encryption_key must be 64 hexadecimal characters (32 bytes)")?;

        let retention_days = raw.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS);
        if retention_days <= 0 {
            anyhow::bail!("retention_days must be positive, got {retention_days}");
        }

        let local_storage = LocalStorageConfig {
            base_dir: raw
                .local_storage
                .as_ref()
                .and_then(|l| l.base_dir.clone())
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_DIR)),
        };

        let s3_storage = raw
            .s3_storage
            .as_ref()
            .map(|block| parse_object_storage("s3_storage", block, false))
            .transpose()?
            .flatten();
        let minio_storage = raw
            .minio_storage
            .as_ref()
            .map(|block| parse_object_storage("minio_storage", block, true))
            .transpose()?
            .flatten();

        Ok(AppConfig {
            temp_root: raw.temp_root.clone().unwrap_or_else(std::env::temp_dir),
            record_store_dir: raw
                .record_store_dir
                .clone()
                .unwrap_or_else(|| PathBuf::from(DEFAULT_RECORD_DIR)),
            dump_timeout: Duration::from_secs(raw.dump_timeout_secs.unwrap_or(DEFAULT_DUMP_TIMEOUT_SECS)),
            production: raw.production.unwrap_or(false),
            encryption_key,
            retention_days,
            local_storage,
            s3_storage,
            minio_storage,
            raw_json_config: raw,
        })
    }
}

/// `Ok(None)` when the block is too incomplete to use.
fn parse_object_storage(
    section: &str,
    raw: &JsonS3StorageConfig,
    require_endpoint: bool,
) -> Result<Option<S3StorageConfig>> {
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.trim().is_empty());
    let bucket = non_empty(&raw.bucket_name);
    let region = non_empty(&raw.region);
    let endpoint_url = non_empty(&raw.endpoint_url);

    let (Some(bucket_name), Some(region)) = (bucket, region) else {
        tracing::warn!(section, "Incomplete object storage configuration, provider disabled");
        return Ok(None);
    };
    if require_endpoint && endpoint_url.is_none() {
        tracing::warn!(section, "endpoint_url is required, provider disabled");
        return Ok(None);
    }

    let access_key_id = non_empty(&raw.access_key_id);
    let secret_access_key = non_empty(&raw.secret_access_key);
    if access_key_id.is_some() != secret_access_key.is_some() {
        anyhow::bail!("{section}: access_key_id and secret_access_key must be set together");
    }

    let part_size_bytes = raw.part_size_bytes.unwrap_or(DEFAULT_PART_SIZE);
    if part_size_bytes < MIN_PART_SIZE {
        anyhow::bail!("{section}: part_size_bytes must be at least {MIN_PART_SIZE}, got {part_size_bytes}");
    }

    Ok(Some(S3StorageConfig {
        bucket_name,
        region,
        access_key_id,
        secret_access_key,
        endpoint_url,
        folder_prefix: raw
            .folder_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_FOLDER_PREFIX.to_string()),
        multipart_threshold_bytes: raw
            .multipart_threshold_bytes
            .unwrap_or(DEFAULT_MULTIPART_THRESHOLD),
        part_size_bytes,
        force_path_style: raw.force_path_style.unwrap_or(require_endpoint),
    }))
}

pub fn load_backup_command_from_json(
    raw_config: &RawJsonConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<BackupCommand> {
    let section = raw_config
        .backup
        .as_ref()
        .context("backup section must be set in config.json for backup")?;

    let compression = match &section.compression {
        Some(name) => name.parse::<CompressionAlgorithm>()?,
        None => CompressionAlgorithm::Gzip,
    };

    Ok(BackupCommand {
        database_type: required(&section.database_type, "backup.database_type")?,
        host: required(&section.host, "backup.host")?,
        port: section.port.context("backup.port must be set in config.json")?,
        database: required(&section.database, "backup.database")?,
        username: required(&section.username, "backup.username")?,
        password: section
            .password
            .clone()
            .or_else(|| env(DB_PASSWORD_ENV))
            .unwrap_or_default(),
        compression,
        encrypt: section.encrypt.unwrap_or(false),
        storage_provider: section
            .storage_provider
            .clone()
            .unwrap_or_else(|| "local".to_string()),
        tables: section.tables.clone().filter(|t| !t.is_empty()),
        additional_options: section.additional_options.clone().unwrap_or_default(),
    })
}

/// `backup_id` overrides the id in the restore section (e.g. from the command line).
pub fn load_restore_command_from_json(
    raw_config: &RawJsonConfig,
    backup_id: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<RestoreCommand> {
    let section = raw_config
        .restore
        .as_ref()
        .context("restore section must be set in config.json for restore")?;

    let backup_id = match backup_id {
        Some(id) if !id.trim().is_empty() => id.trim().to_string(),
        _ => required(&section.backup_id, "restore.backup_id")?,
    };

    Ok(RestoreCommand {
        backup_id,
        target_host: required(&section.target_host, "restore.target_host")?,
        target_port: section
            .target_port
            .context("restore.target_port must be set in config.json")?,
        target_database: required(&section.target_database, "restore.target_database")?,
        username: required(&section.username, "restore.username")?,
        password: section
            .password
            .clone()
            .or_else(|| env(TARGET_DB_PASSWORD_ENV))
            .unwrap_or_default(),
        skip_if_exists: section.skip_if_exists.unwrap_or(false),
        tables: section.tables.clone().filter(|t| !t.is_empty()),
    })
}

/// Falls back to the backup section's connection when there is no
/// `test_connection` section.
pub fn load_test_connection_command_from_json(
    raw_config: &RawJsonConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<TestConnectionCommand> {
    let section = match (&raw_config.test_connection, &raw_config.backup) {
        (Some(section), _) => section.clone(),
        (None, Some(backup)) => JsonConnectionSection {
            database_type: backup.database_type.clone(),
            host: backup.host.clone(),
            port: backup.port,
            database: backup.database.clone(),
            username: backup.username.clone(),
            password: backup.password.clone(),
        },
        (None, None) => anyhow::bail!("test_connection or backup section must be set in config.json"),
    };

    Ok(TestConnectionCommand {
        database_type: required(&section.database_type, "test_connection.database_type")?,
        host: required(&section.host, "test_connection.host")?,
        port: section
            .port
            .context("test_connection.port must be set in config.json")?,
        database: required(&section.database, "test_connection.database")?,
        username: required(&section.username, "test_connection.username")?,
        password: section
            .password
            .clone()
            .or_else(|| env(DB_PASSWORD_ENV))
            .unwrap_or_default(),
    })
}

fn required(value: &Option<String>, field: &str) -> Result<String> {
    value
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{field} must be set in config.json"))
}
