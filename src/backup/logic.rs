// dbbackup/src/backup/logic.rs
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config::AppConfig;
use crate::dump::{ConnectionParams, DumpConfig, DumpRegistry};
use crate::errors::{AppError, Result};
use crate::metadata::{ArtifactFacts, BackupMetadataDocument, JsonMetadataStore, MetadataStore};
use crate::metrics::MetricsSink;
use crate::model::{
    BackupCommand, BackupRecord, BackupResult, BackupStatus, BackupSummary, Completion,
};
use crate::record_store::RecordStore;
use crate::storage::{StorageRegistry, StorageStrategy, UploadRequest};
use crate::storage::s3::DEFAULT_MULTIPART_THRESHOLD;
use crate::transform::{checksum, compression, AesGcmEncryptor, EncryptionConfig, EncryptionKey};
use crate::utils::remove_temp_files;

pub const TEMP_DIR_PREFIX: &str = "dbbackup_";

#[derive(Debug, Clone)]
pub struct BackupSettings {
    /// Parent of the per-run working directories.
    pub temp_root: PathBuf,
    /// Artifacts larger than this are uploaded with multipart enabled.
    pub multipart_threshold: u64,
    pub encryption_key: Option<EncryptionKey>,
    /// Refuses ephemeral encryption keys when set.
    pub production: bool,
}

impl BackupSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        let multipart_threshold = config
            .s3_storage
            .iter()
            .chain(config.minio_storage.iter())
            .map(|s| s.multipart_threshold_bytes)
            .min()
            .unwrap_or(DEFAULT_MULTIPART_THRESHOLD);
        Self {
            temp_root: config.temp_root.clone(),
            multipart_threshold,
            encryption_key: config.encryption_key.clone(),
            production: config.production,
        }
    }
}

/// What a successful pipeline run hands to the completion step.
struct StoredArtifact {
    checksum: String,
    size_bytes: u64,
    provider: String,
    location: String,
    tool_metadata: HashMap<String, String>,
}

/// Resources a run acquired, released on every exit path.
#[derive(Default)]
struct RunState {
    workspace: Option<tempfile::TempDir>,
    temp_files: Vec<PathBuf>,
    storage: Option<Arc<dyn StorageStrategy>>,
    filename: Option<String>,
    encryption_algorithm: Option<String>,
}

/// Drives one backup from dump to stored artifact and persisted record.
pub struct BackupOrchestrator {
    dumps: Arc<DumpRegistry>,
    storage: Arc<StorageRegistry>,
    records: Arc<dyn RecordStore>,
    metrics: Arc<dyn MetricsSink>,
    metadata: Arc<dyn MetadataStore>,
    encryptor: AesGcmEncryptor,
    settings: BackupSettings,
}

impl BackupOrchestrator {
    pub fn new(
        dumps: Arc<DumpRegistry>,
        storage: Arc<StorageRegistry>,
        records: Arc<dyn RecordStore>,
        metrics: Arc<dyn MetricsSink>,
        settings: BackupSettings,
    ) -> Self {
        Self {
            dumps,
            storage,
            records,
            metrics,
            metadata: Arc::new(JsonMetadataStore),
            encryptor: AesGcmEncryptor::new(),
            settings,
        }
    }

    /// Replaces the JSON sidecar writer.
    pub fn with_metadata_store(mut self, metadata: Arc<dyn MetadataStore>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Runs the whole pipeline. Never returns an error: every failure is
    /// recorded on the backup record and reported in the result.
    pub async fn execute(&self, command: BackupCommand) -> BackupResult {
        let started = Instant::now();
        let record = BackupRecord::start(
            &command.database_type,
            &command.database,
            &command.host,
            command.port,
            command.compression,
            command.encrypt,
        );
        let backup_id = record.id.clone();
        tracing::info!(
            backup_id = %backup_id,
            database_type = %record.database_type,
            database = %record.database_name,
            compression = %record.compression_algorithm,
            encrypt = record.encrypted,
            provider = %command.storage_provider,
            "Starting backup"
        );

        if let Err(e) = self.records.save(&record).await {
            tracing::error!(backup_id = %backup_id, error = %e, "Could not persist new backup record");
            self.metrics.increment_count(&record.database_type, &BackupStatus::Failed.to_string());
            return BackupResult::failed(backup_id, &e.to_string());
        }

        let mut run = RunState::default();
        let outcome = self.run_pipeline(&command, &record, &mut run).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        // Sidecars are written into the workspace, so cleanup comes last.
        let result = match outcome {
            Ok(artifact) => self.finish_success(record, &run, artifact, duration_ms).await,
            Err(e) => self.finish_failure(record, &run, e, duration_ms).await,
        };
        cleanup(&mut run);
        result
    }

    async fn run_pipeline(
        &self,
        command: &BackupCommand,
        record: &BackupRecord,
        run: &mut RunState,
    ) -> Result<StoredArtifact> {
        let strategy = self.dumps.resolve(&command.database_type)?;

        let working_dir = self.create_workspace(run)?;
        let dump_config = DumpConfig {
            connection: ConnectionParams {
                host: command.host.clone(),
                port: command.port,
                database: command.database.clone(),
                username: command.username.clone(),
                password: command.password.clone(),
            },
            working_dir,
            tables: command.tables.clone(),
            additional_options: command.additional_options.clone(),
        };
        let dump = strategy
            .dump(&dump_config)
            .await
            .map_err(|e| e.into_backup_failure("dump"))?;
        run.temp_files.push(dump.dump_file.clone());
        tracing::info!(
            backup_id = %record.id,
            file = %dump.dump_file.display(),
            size_bytes = dump.size_bytes,
            "Dump finished"
        );

        let algorithm = command.compression;
        let source = dump.dump_file.clone();
        let compressed = blocking("compression", move || {
            compression::compress_file(&source, algorithm)
        })
        .await?;
        if compressed != dump.dump_file {
            run.temp_files.push(compressed.clone());
        }

        let artifact = if command.encrypt {
            let config = self.encryption_config()?;
            run.encryption_algorithm = Some(config.algorithm().to_string());
            let encryptor = self.encryptor;
            let input = compressed.clone();
            let encrypted = blocking("encryption", move || encryptor.encrypt(&input, &config)).await?;
            run.temp_files.push(encrypted.clone());
            encrypted
        } else {
            compressed
        };

        let checksum_input = artifact.clone();
        let checksum = blocking("checksum", move || checksum::calculate_file(&checksum_input)).await?;
        let size_bytes = std::fs::metadata(&artifact)
            .map_err(|e| AppError::BackupFailed(format!("cannot stat {}: {e}", artifact.display())))?
            .len();
        tracing::debug!(backup_id = %record.id, checksum = %checksum, size_bytes, "Artifact ready");

        let storage = self.storage.resolve(&command.storage_provider)?;
        run.storage = Some(storage.clone());
        let filename = artifact_filename(record);
        run.filename = Some(filename.clone());

        let upload_metadata = HashMap::from([
            ("backup-id".to_string(), record.id.clone()),
            ("database-type".to_string(), record.database_type.clone()),
            ("database-name".to_string(), record.database_name.clone()),
            ("sha256".to_string(), checksum.clone()),
        ]);
        let enable_multipart = size_bytes > self.settings.multipart_threshold;
        let request = UploadRequest::from_file(&artifact, &filename, upload_metadata, enable_multipart)
            .await
            .map_err(|e| e.into_backup_failure("upload"))?;

        let upload_started = Instant::now();
        let uploaded = storage
            .upload(request)
            .await
            .map_err(|e| e.into_backup_failure("upload"))?;
        self.metrics
            .record_upload_duration(storage.provider(), upload_started.elapsed().as_millis() as u64);
        tracing::info!(
            backup_id = %record.id,
            provider = storage.provider(),
            location = %uploaded.location,
            parts = ?uploaded.parts,
            "Artifact uploaded"
        );

        let mut tool_metadata = dump.metadata;
        tool_metadata.insert("filename".to_string(), filename);
        if let Some(parts) = uploaded.parts {
            tool_metadata.insert("chunks".to_string(), parts.to_string());
        }

        Ok(StoredArtifact {
            checksum,
            size_bytes,
            provider: storage.provider().to_string(),
            location: uploaded.location,
            tool_metadata,
        })
    }

    fn create_workspace(&self, run: &mut RunState) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.settings.temp_root).map_err(|e| {
            AppError::BackupFailed(format!(
                "cannot create temp root {}: {e}",
                self.settings.temp_root.display()
            ))
        })?;
        let workspace = tempfile::Builder::new()
            .prefix(TEMP_DIR_PREFIX)
            .tempdir_in(&self.settings.temp_root)
            .map_err(|e| AppError::BackupFailed(format!("cannot create working directory: {e}")))?;
        let path = workspace.path().to_path_buf();
        run.workspace = Some(workspace);
        Ok(path)
    }

    fn encryption_config(&self) -> Result<EncryptionConfig> {
        match &self.settings.encryption_key {
            Some(key) => Ok(EncryptionConfig::with_key(key.clone())),
            None if self.settings.production => Err(AppError::Encryption(
                "encryption requested but no key is configured; ephemeral keys are refused in production"
                    .to_string(),
            )),
            None => Ok(EncryptionConfig::ephemeral()),
        }
    }

    /// Best-effort: a sidecar failure is logged and never fails the backup.
    async fn upload_sidecar(
        &self,
        record: &BackupRecord,
        run: &RunState,
        status: BackupStatus,
        artifact: Option<&StoredArtifact>,
    ) {
        let (Some(storage), Some(workspace)) = (&run.storage, &run.workspace) else {
            return;
        };
        let facts = ArtifactFacts {
            size_bytes: artifact.map(|a| a.size_bytes),
            checksum: artifact.map(|a| a.checksum.clone()),
            encryption_algorithm: run.encryption_algorithm.clone(),
            chunks: artifact
                .and_then(|a| a.tool_metadata.get("chunks"))
                .and_then(|c| c.parse().ok()),
        };
        let filename = run.filename.as_deref().unwrap_or_default();
        let document = BackupMetadataDocument::describe(record, filename, status, facts);

        let object_name = BackupMetadataDocument::object_name(&record.id);
        let path = workspace.path().join(&object_name);
        let result = async {
            self.metadata.save(&document, &path)?;
            let request = UploadRequest::from_file(
                &path,
                &object_name,
                HashMap::from([("backup-id".to_string(), record.id.clone())]),
                false,
            )
            .await?;
            storage.upload(request).await
        }
        .await;

        match result {
            Ok(outcome) => {
                tracing::debug!(backup_id = %record.id, location = %outcome.location, "Metadata sidecar uploaded")
            }
            Err(e) => {
                tracing::warn!(backup_id = %record.id, error = %e, "Failed to upload metadata sidecar")
            }
        }
    }

    /// Persists the COMPLETED record before the sidecar goes up. When that
    /// save fails the stored artifact is deleted and the run ends as FAILED.
    async fn finish_success(
        &self,
        record: BackupRecord,
        run: &RunState,
        artifact: StoredArtifact,
        duration_ms: u64,
    ) -> BackupResult {
        let backup_id = record.id.clone();
        let database_type = record.database_type.clone();
        let completed = record.clone().mark_completed(Completion {
            checksum: artifact.checksum.clone(),
            size_bytes: artifact.size_bytes,
            storage_provider: artifact.provider.clone(),
            storage_location: artifact.location.clone(),
            metadata: artifact.tool_metadata.clone(),
        });
        let persisted = match completed {
            Ok(completed) => self.records.save(&completed).await.map(|()| completed),
            Err(e) => Err(e),
        };
        let completed = match persisted {
            Ok(completed) => completed,
            Err(e) => {
                tracing::error!(backup_id = %backup_id, error = %e, "Artifact stored but the record could not be completed");
                self.discard_artifact(&backup_id, run, &artifact.location).await;
                let error = AppError::BackupFailed(format!("could not complete backup record: {e}"));
                return self.finish_failure(record, run, error, duration_ms).await;
            }
        };
        self.upload_sidecar(&completed, run, BackupStatus::Completed, Some(&artifact))
            .await;

        self.metrics.record_duration(&database_type, duration_ms, true);
        self.metrics.record_size(&database_type, artifact.size_bytes);
        self.metrics.increment_count(&database_type, &BackupStatus::Completed.to_string());
        tracing::info!(
            backup_id = %backup_id,
            location = %artifact.location,
            size_bytes = artifact.size_bytes,
            duration_ms,
            "Backup completed"
        );

        BackupResult::succeeded(
            backup_id,
            BackupSummary {
                storage_location: artifact.location,
                size_bytes: artifact.size_bytes,
                checksum: artifact.checksum,
                duration_ms,
            },
        )
    }

    async fn discard_artifact(&self, backup_id: &str, run: &RunState, location: &str) {
        let Some(storage) = &run.storage else {
            return;
        };
        match storage.delete(location).await {
            Ok(()) => tracing::info!(backup_id = %backup_id, location = %location, "Deleted artifact of incomplete backup"),
            Err(e) => {
                tracing::error!(backup_id = %backup_id, location = %location, error = %e, "Could not delete artifact of incomplete backup")
            }
        }
    }

    async fn finish_failure(
        &self,
        record: BackupRecord,
        run: &RunState,
        error: AppError,
        duration_ms: u64,
    ) -> BackupResult {
        let backup_id = record.id.clone();
        let database_type = record.database_type.clone();
        let reason = error.to_string();
        tracing::error!(backup_id = %backup_id, error = %reason, "Backup failed");

        match record.mark_failed(&reason) {
            Ok(failed) => {
                if let Err(e) = self.records.save(&failed).await {
                    tracing::error!(backup_id = %backup_id, error = %e, "Could not persist failed backup record");
                }
                self.upload_sidecar(&failed, run, BackupStatus::Failed, None).await;
            }
            Err(e) => tracing::error!(backup_id = %backup_id, error = %e, "Could not mark backup as failed"),
        }

        self.metrics.record_duration(&database_type, duration_ms, false);
        self.metrics.increment_count(&database_type, &BackupStatus::Failed.to_string());
        BackupResult::failed(backup_id, &reason)
    }
}

/// `dbbackup_<type>_<db>_<yyyymmddTHHMMSSZ>_<id8><ext>`.
pub fn artifact_filename(record: &BackupRecord) -> String {
    let safe = |s: &str| -> String {
        s.chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect()
    };
    let id_prefix: String = record.id.chars().take(8).collect();
    let mut name = format!(
        "dbbackup_{}_{}_{}_{}.dump{}",
        safe(&record.database_type),
        safe(&record.database_name),
        record.created_at.format("%Y%m%dT%H%M%SZ"),
        id_prefix,
        record.compression_algorithm.extension(),
    );
    if record.encrypted {
        name.push_str(".enc");
    }
    name
}

/// Runs a file transformation off the async runtime.
async fn blocking<T, F>(step: &'static str, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::BackupFailed(format!("{step} task failed: {e}")))?
        .map_err(|e| e.into_backup_failure(step))
}

fn cleanup(run: &mut RunState) {
    let failures = remove_temp_files(&run.temp_files);
    if failures > 0 {
        tracing::warn!(failures, "Some temporary files could not be deleted");
    }
    if let Some(workspace) = run.workspace.take() {
        let path = workspace.path().to_path_buf();
        if let Err(e) = workspace.close() {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove working directory");
        }
    }
}
