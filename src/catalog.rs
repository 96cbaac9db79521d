// dbbackup/src/catalog.rs
use std::sync::Arc;

use crate::errors::Result;
use crate::model::{BackupRecord, ListBackupsQuery};
use crate::record_store::RecordStore;

/// Read-side view over the record store.
pub struct BackupCatalog {
    records: Arc<dyn RecordStore>,
    retention_days: i64,
}

impl BackupCatalog {
    pub fn new(records: Arc<dyn RecordStore>, retention_days: i64) -> Self {
        Self {
            records,
            retention_days,
        }
    }

    /// Newest first. Records past retention are hidden unless
    /// `include_expired` is set.
    pub async fn list(&self, query: &ListBackupsQuery) -> Result<Vec<BackupRecord>> {
        let mut records: Vec<BackupRecord> = self
            .records
            .find_all()
            .await?
            .into_iter()
            .filter(|r| {
                query
                    .database_name
                    .as_deref()
                    .is_none_or(|name| r.database_name == name)
            })
            .filter(|r| {
                query
                    .database_type
                    .as_deref()
                    .is_none_or(|t| r.database_type.eq_ignore_ascii_case(t.trim()))
            })
            .filter(|r| query.include_expired || !r.is_expired(self.retention_days))
            .collect();

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = query.limit {
            records.truncate(limit);
        }
        tracing::debug!(count = records.len(), ?query, "Listed backups");
        Ok(records)
    }

    pub async fn find(&self, backup_id: &str) -> Result<Option<BackupRecord>> {
        self.records.find_by_id(backup_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::InMemoryRecordStore;
    use crate::transform::CompressionAlgorithm;
    use chrono::{Duration, Utc};

    fn record(db_type: &str, name: &str, age_days: i64) -> BackupRecord {
        let mut r = BackupRecord::start(db_type, name, "h", 1, CompressionAlgorithm::Gzip, false);
        r.created_at = Utc::now() - Duration::days(age_days);
        r
    }

    async fn catalog(records: &[BackupRecord]) -> Result<BackupCatalog> {
        let store = Arc::new(InMemoryRecordStore::new());
        for r in records {
            store.save(r).await?;
        }
        Ok(BackupCatalog::new(store, 30))
    }

    #[tokio::test]
    async fn lists_newest_first_and_hides_expired() -> Result<()> {
        let records = [
            record("postgres", "app", 3),
            record("postgres", "app", 1),
            record("mysql", "shop", 2),
            record("postgres", "app", 45),
        ];
        let catalog = catalog(&records).await?;

        let listed = catalog.list(&ListBackupsQuery::default()).await?;
        let ids: Vec<&str> = listed.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, [records[1].id.as_str(), records[2].id.as_str(), records[0].id.as_str()]);

        let all = catalog
            .list(&ListBackupsQuery {
                include_expired: true,
                ..Default::default()
            })
            .await?;
        assert_eq!(all.len(), 4);
        assert_eq!(all[3].id, records[3].id);
        Ok(())
    }

    #[tokio::test]
    async fn filters_by_name_type_and_limit() -> Result<()> {
        let records = [
            record("postgres", "app", 3),
            record("postgres", "app", 1),
            record("mysql", "shop", 2),
        ];
        let catalog = catalog(&records).await?;

        let mysql = catalog
            .list(&ListBackupsQuery {
                database_type: Some("MySQL".into()),
                ..Default::default()
            })
            .await?;
        assert_eq!(mysql.len(), 1);
        assert_eq!(mysql[0].database_name, "shop");

        let latest_app = catalog
            .list(&ListBackupsQuery {
                database_name: Some("app".into()),
                limit: Some(1),
                ..Default::default()
            })
            .await?;
        assert_eq!(latest_app.len(), 1);
        assert_eq!(latest_app[0].id, records[1].id);

        assert!(catalog.find(&records[2].id).await?.is_some());
        assert!(catalog.find("missing").await?.is_none());
        Ok(())
    }
}
