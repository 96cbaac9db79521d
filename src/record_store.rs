// dbbackup/src/record_store.rs
//! Persistence for backup records.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

use crate::errors::{AppError, Result};
use crate::model::BackupRecord;

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts or replaces the record with the same id.
    async fn save(&self, record: &BackupRecord) -> Result<()>;

    async fn find_all(&self) -> Result<Vec<BackupRecord>>;

    async fn find_by_id(&self, id: &str) -> Result<Option<BackupRecord>>;
}

/// One pretty-printed `<id>.json` file per record.
pub struct JsonFileRecordStore {
    dir: PathBuf,
}

impl JsonFileRecordStore {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
        }
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(AppError::NotFound(format!("Invalid backup id '{id}'")));
        }
        Ok(self.dir.join(format!("{id}.json")))
    }
}

#[async_trait]
impl RecordStore for JsonFileRecordStore {
    async fn save(&self, record: &BackupRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&record.id)?;
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec_pretty(record)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(backup_id = %record.id, status = %record.status, "Saved backup record");
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<BackupRecord>> {
        let mut records = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(records),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<BackupRecord>(&contents) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable backup record");
                }
            }
        }
        Ok(records)
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<BackupRecord>> {
        let path = match self.path_for(id) {
            Ok(path) => path,
            Err(_) => return Ok(None),
        };
        match tokio::fs::read(&path).await {
            Ok(contents) => Ok(Some(serde_json::from_slice(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Process-local store for embedding and tests.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<String, BackupRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn save(&self, record: &BackupRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<BackupRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<BackupRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BackupStatus, Completion};
    use crate::transform::CompressionAlgorithm;

    fn record() -> BackupRecord {
        BackupRecord::start("mysql", "shop", "db", 3306, CompressionAlgorithm::None, true)
    }

    #[tokio::test]
    async fn json_store_round_trips_and_overwrites() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonFileRecordStore::new(&dir.path().join("records"));
        assert!(store.find_all().await?.is_empty());

        let started = record();
        store.save(&started).await?;
        assert_eq!(store.find_by_id(&started.id).await?, Some(started.clone()));

        let done = started.clone().mark_completed(Completion {
            checksum: "00".repeat(32),
            size_bytes: 10,
            storage_provider: "local".into(),
            storage_location: "/tmp/x".into(),
            metadata: HashMap::new(),
        })?;
        store.save(&done).await?;

        let all = store.find_all().await?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, BackupStatus::Completed);
        Ok(())
    }

    #[tokio::test]
    async fn unknown_or_malformed_ids_are_absent() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = JsonFileRecordStore::new(dir.path());
        assert!(store.find_by_id("does-not-exist").await?.is_none());
        assert!(store.find_by_id("../../etc/passwd").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn in_memory_store() -> Result<()> {
        let store = InMemoryRecordStore::new();
        let r = record();
        store.save(&r).await?;
        store.save(&r).await?;
        assert_eq!(store.find_all().await?.len(), 1);
        assert_eq!(store.find_by_id(&r.id).await?.map(|x| x.database_name), Some("shop".into()));
        Ok(())
    }
}
