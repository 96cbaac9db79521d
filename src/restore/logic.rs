// dbbackup/src/restore/logic.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;

use crate::config::AppConfig;
use crate::dump::{ConnectionParams, DumpRegistry, RestoreInput};
use crate::errors::{AppError, Result};
use crate::model::{BackupRecord, BackupStatus, RestoreCommand, RestoreResult};
use crate::record_store::RecordStore;
use crate::storage::{StorageRegistry, StorageStrategy};
use crate::transform::{
    checksum, compression, AesGcmEncryptor, CompressionAlgorithm, EncryptionConfig, EncryptionKey,
};

pub const TEMP_DIR_PREFIX: &str = "dbrestore_";

#[derive(Debug, Clone)]
pub struct RestoreSettings {
    pub temp_root: PathBuf,
    /// Needed only for encrypted backups.
    pub encryption_key: Option<EncryptionKey>,
}

impl RestoreSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            temp_root: config.temp_root.clone(),
            encryption_key: config.encryption_key.clone(),
        }
    }
}

/// Brings a stored backup back into a target database.
pub struct RestoreOrchestrator {
    dumps: Arc<DumpRegistry>,
    storage: Arc<StorageRegistry>,
    records: Arc<dyn RecordStore>,
    encryptor: AesGcmEncryptor,
    settings: RestoreSettings,
}

impl RestoreOrchestrator {
    pub fn new(
        dumps: Arc<DumpRegistry>,
        storage: Arc<StorageRegistry>,
        records: Arc<dyn RecordStore>,
        settings: RestoreSettings,
    ) -> Self {
        Self {
            dumps,
            storage,
            records,
            encryptor: AesGcmEncryptor::new(),
            settings,
        }
    }

    /// Never returns an error; failures are reported in the result.
    pub async fn execute(&self, command: RestoreCommand) -> RestoreResult {
        let started = Instant::now();
        tracing::info!(
            backup_id = %command.backup_id,
            target_host = %command.target_host,
            target_database = %command.target_database,
            "Starting restore"
        );

        let mut workspace = None;
        let outcome = self.run_pipeline(&command, &mut workspace).await;
        if let Some(workspace) = workspace {
            let path = workspace.path().to_path_buf();
            if let Err(e) = workspace.close() {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove restore working directory");
            }
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                tracing::info!(backup_id = %command.backup_id, duration_ms, "Restore completed");
                RestoreResult::succeeded(command.backup_id, duration_ms)
            }
            Err(e) => {
                tracing::error!(backup_id = %command.backup_id, error = %e, "Restore failed");
                RestoreResult::failed(command.backup_id, &e.to_string(), duration_ms)
            }
        }
    }

    async fn run_pipeline(
        &self,
        command: &RestoreCommand,
        workspace: &mut Option<tempfile::TempDir>,
    ) -> Result<()> {
        let record = self
            .records
            .find_by_id(&command.backup_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Backup {} not found", command.backup_id)))?;
        let (location, expected_checksum) = restorable(&record)?;

        let storage = self.storage_for(&record, location)?;
        let strategy = self.dumps.resolve(&record.database_type)?;

        std::fs::create_dir_all(&self.settings.temp_root)?;
        let dir = tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir_in(&self.settings.temp_root)?;
        let working_dir = dir.path().to_path_buf();
        *workspace = Some(dir);

        let downloaded = working_dir.join(artifact_name(location));
        download(storage.as_ref(), location, &downloaded).await?;

        let verify_path = downloaded.clone();
        let expected = expected_checksum.to_string();
        let matches = blocking(move || checksum::verify_file(&verify_path, &expected)).await?;
        if !matches {
            return Err(AppError::Integrity(format!(
                "Checksum mismatch for backup {}; the stored artifact is corrupt or was modified",
                record.id
            )));
        }
        tracing::debug!(backup_id = %record.id, "Checksum verified");

        let mut artifact = downloaded;
        if record.encrypted {
            let key = self.settings.encryption_key.clone().ok_or_else(|| {
                AppError::Encryption(format!(
                    "Backup {} is encrypted but no encryption key is configured",
                    record.id
                ))
            })?;
            let encryptor = self.encryptor;
            let input = artifact.clone();
            artifact = blocking(move || encryptor.decrypt(&input, &EncryptionConfig::with_key(key))).await?;
        }

        let dump_file = match record.compression_algorithm {
            CompressionAlgorithm::None => artifact,
            algorithm => {
                let input = artifact.clone();
                let output = working_dir.join("restore.dump");
                blocking(move || compression::decompress_file(&input, algorithm, &output)).await?
            }
        };

        let input = RestoreInput {
            dump_file,
            source_database: record.database_name.clone(),
            target: ConnectionParams {
                host: command.target_host.clone(),
                port: command.target_port,
                database: command.target_database.clone(),
                username: command.username.clone(),
                password: command.password.clone(),
            },
            skip_if_exists: command.skip_if_exists,
            tables: command.tables.clone().filter(|t| !t.is_empty()),
            working_dir,
        };
        strategy.restore(&input).await
    }

    /// The provider recorded at backup time, or one inferred from the location.
    fn storage_for(&self, record: &BackupRecord, location: &str) -> Result<Arc<dyn StorageStrategy>> {
        let provider = match record.storage_provider.as_deref() {
            Some(provider) => provider,
            None if location.starts_with("s3://") => "s3",
            None => "local",
        };
        self.storage.resolve(provider)
    }
}

/// Returns the location and checksum of a record that can be restored.
fn restorable(record: &BackupRecord) -> Result<(&str, &str)> {
    if record.status != BackupStatus::Completed {
        return Err(AppError::RestoreFailed(format!(
            "Backup {} has status {} and cannot be restored",
            record.id, record.status
        )));
    }
    match (record.storage_location.as_deref(), record.checksum.as_deref()) {
        (Some(location), Some(checksum)) => Ok((location, checksum)),
        _ => Err(AppError::RestoreFailed(format!(
            "Backup {} has no stored artifact or checksum",
            record.id
        ))),
    }
}

fn artifact_name(location: &str) -> String {
    Path::new(location.trim_end_matches('/'))
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .unwrap_or("artifact")
        .to_string()
}

async fn download(storage: &dyn StorageStrategy, location: &str, dest: &Path) -> Result<u64> {
    let mut reader = storage.download(location).await?;
    let mut file = tokio::fs::File::create(dest).await?;
    let written = tokio::io::copy(&mut reader, &mut file)
        .await
        .map_err(|e| AppError::Storage(format!("Failed to download {location}: {e}")))?;
    file.flush().await?;
    tracing::info!(location = %location, bytes = written, "Downloaded backup artifact");
    Ok(written)
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::RestoreFailed(format!("background task failed: {e}")))?
}
