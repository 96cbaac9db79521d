//! Fakes shared by the orchestrator tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::dump::{
    ConnectionParams, DumpConfig, DumpOutput, DumpRegistry, DumpStrategy, RestoreInput,
    dump_file_name,
};
use crate::errors::{AppError, Result};
use crate::metrics::InMemoryMetrics;
use crate::model::{BackupCommand, RestoreCommand};
use crate::record_store::InMemoryRecordStore;
use crate::storage::{LocalStorage, StorageRegistry, StorageStrategy};
use crate::transform::CompressionAlgorithm;

/// Dump strategy that writes a fixed payload instead of calling a tool.
pub(crate) struct ScriptedDump {
    tag: String,
    payload: Vec<u8>,
    fail_dump: bool,
    pub restore_calls: AtomicUsize,
    pub restored: Mutex<Option<Vec<u8>>>,
}

impl ScriptedDump {
    pub(crate) fn new(tag: &str, payload: &[u8]) -> Self {
        Self {
            tag: tag.to_string(),
            payload: payload.to_vec(),
            fail_dump: false,
            restore_calls: AtomicUsize::new(0),
            restored: Mutex::new(None),
        }
    }

    pub(crate) fn failing(tag: &str) -> Self {
        Self {
            fail_dump: true,
            ..Self::new(tag, b"")
        }
    }

    pub(crate) fn restore_count(&self) -> usize {
        self.restore_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn restored_bytes(&self) -> Option<Vec<u8>> {
        self.restored.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait]
impl DumpStrategy for ScriptedDump {
    fn database_type(&self) -> &str {
        &self.tag
    }

    async fn dump(&self, config: &DumpConfig) -> Result<DumpOutput> {
        let path = config
            .working_dir
            .join(dump_file_name(&config.connection.database, "dump"));
        if self.fail_dump {
            // Leave a partial file behind, as a crashed tool would.
            std::fs::write(&path, b"partial")?;
            return Err(AppError::BackupFailed("pg_dump exited with exit status: 1".into()));
        }
        std::fs::write(&path, &self.payload)?;
        Ok(DumpOutput {
            dump_file: path,
            size_bytes: self.payload.len() as u64,
            metadata: HashMap::from([
                ("tool".to_string(), "scripted".to_string()),
                ("toolVersion".to_string(), "1.0".to_string()),
            ]),
        })
    }

    async fn restore(&self, input: &RestoreInput) -> Result<()> {
        self.restore_calls.fetch_add(1, Ordering::SeqCst);
        let bytes = std::fs::read(&input.dump_file)?;
        if let Ok(mut restored) = self.restored.lock() {
            *restored = Some(bytes);
        }
        Ok(())
    }

    async fn test_connection(&self, connection: &ConnectionParams) -> bool {
        connection.host == "localhost"
    }
}

pub(crate) struct Harness {
    pub dir: tempfile::TempDir,
    pub dump: Arc<ScriptedDump>,
    pub dumps: Arc<DumpRegistry>,
    pub storage: Arc<StorageRegistry>,
    pub records: Arc<InMemoryRecordStore>,
    pub metrics: Arc<InMemoryMetrics>,
}

impl Harness {
    pub(crate) fn new(dump: ScriptedDump) -> Result<Self> {
        Self::with_storage(dump, Vec::new())
    }

    /// Local storage is always registered; `extra` adds further providers.
    pub(crate) fn with_storage(
        dump: ScriptedDump,
        extra: Vec<Arc<dyn StorageStrategy>>,
    ) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let dump = Arc::new(dump);
        let dumps = Arc::new(DumpRegistry::new(vec![dump.clone() as Arc<dyn DumpStrategy>]));
        let mut strategies: Vec<Arc<dyn StorageStrategy>> =
            vec![Arc::new(LocalStorage::new(&dir.path().join("store")))];
        strategies.extend(extra);
        Ok(Self {
            dumps,
            storage: Arc::new(StorageRegistry::new(strategies)),
            records: Arc::new(InMemoryRecordStore::new()),
            metrics: Arc::new(InMemoryMetrics::new()),
            dump,
            dir,
        })
    }

    pub(crate) fn temp_root(&self) -> std::path::PathBuf {
        self.dir.path().join("tmp")
    }

    pub(crate) fn store_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("store")
    }
}

pub(crate) fn backup_command(database_type: &str, compression: CompressionAlgorithm) -> BackupCommand {
    BackupCommand {
        database_type: database_type.to_string(),
        host: "localhost".to_string(),
        port: 5432,
        database: "testdb".to_string(),
        username: "postgres".to_string(),
        password: "secret".to_string(),
        compression,
        encrypt: false,
        storage_provider: "local".to_string(),
        tables: None,
        additional_options: HashMap::new(),
    }
}

pub(crate) fn restore_command(backup_id: &str) -> RestoreCommand {
    RestoreCommand {
        backup_id: backup_id.to_string(),
        target_host: "localhost".to_string(),
        target_port: 5432,
        target_database: "testdb_restored".to_string(),
        username: "postgres".to_string(),
        password: "secret".to_string(),
        skip_if_exists: false,
        tables: None,
    }
}

/// Number of entries left directly under `dir`; 0 when it does not exist.
pub(crate) fn entries_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}
