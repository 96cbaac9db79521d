// dbbackup/src/storage/mod.rs
//! Storage strategies and their registry.

pub mod local;
pub mod s3;
pub mod s3_client;

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::registry::StrategyTable;

pub use local::LocalStorage;
pub use s3::S3CompatibleStorage;
pub use s3_client::{AwsS3Client, ObjectBody, ObjectStoreClient};

/// Readable byte stream handed to or returned by a storage strategy.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// One object to store. The stream is consumed by the upload.
pub struct UploadRequest {
    pub data: ByteReader,
    pub filename: String,
    pub size_bytes: u64,
    pub metadata: HashMap<String, String>,
    pub enable_multipart: bool,
    /// File behind `data`, when there is one. Lets single-request uploads
    /// stream from disk.
    pub source_path: Option<PathBuf>,
}

impl UploadRequest {
    pub async fn from_file(
        path: &Path,
        filename: &str,
        metadata: HashMap<String, String>,
        enable_multipart: bool,
    ) -> Result<Self> {
        let file = tokio::fs::File::open(path).await?;
        let size_bytes = file.metadata().await?.len();
        Ok(Self {
            data: Box::pin(file),
            filename: filename.to_string(),
            size_bytes,
            metadata,
            enable_multipart,
            source_path: Some(path.to_path_buf()),
        })
    }

    pub fn from_bytes(bytes: Vec<u8>, filename: &str, metadata: HashMap<String, String>) -> Self {
        Self {
            size_bytes: bytes.len() as u64,
            data: Box::pin(std::io::Cursor::new(bytes)),
            filename: filename.to_string(),
            metadata,
            enable_multipart: false,
            source_path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    /// Identifier accepted by `download`, `delete` and `exists`.
    pub location: String,
    /// Number of parts when the object went up as a multipart upload.
    pub parts: Option<usize>,
}

#[async_trait]
pub trait StorageStrategy: Send + Sync {
    /// Registry tag, e.g. `local` or `s3`.
    fn provider(&self) -> &str;

    async fn upload(&self, request: UploadRequest) -> Result<UploadOutcome>;

    async fn download(&self, location: &str) -> Result<ByteReader>;

    async fn delete(&self, location: &str) -> Result<()>;

    async fn exists(&self, location: &str) -> Result<bool>;
}

pub struct StorageRegistry {
    table: StrategyTable<dyn StorageStrategy>,
}

impl StorageRegistry {
    pub fn new(strategies: Vec<Arc<dyn StorageStrategy>>) -> Self {
        Self {
            table: StrategyTable::new(strategies, |s| s.provider().to_string()),
        }
    }

    /// `local` always; `s3` and `minio` when their config blocks are complete.
    pub async fn from_config(config: &AppConfig) -> Self {
        let mut strategies: Vec<Arc<dyn StorageStrategy>> = vec![Arc::new(LocalStorage::new(
            &config.local_storage.base_dir,
        ))];
        for (provider, settings) in [("s3", &config.s3_storage), ("minio", &config.minio_storage)] {
            if let Some(settings) = settings {
                let client = Arc::new(AwsS3Client::connect(settings).await);
                strategies.push(Arc::new(S3CompatibleStorage::from_settings(
                    provider, client, settings,
                )));
                tracing::info!(provider, bucket = %settings.bucket_name, "Registered object storage");
            }
        }
        Self::new(strategies)
    }

    pub fn resolve(&self, provider: &str) -> Result<Arc<dyn StorageStrategy>> {
        self.table
            .get(provider)
            .ok_or_else(|| AppError::UnsupportedStorageProvider {
                requested: provider.to_string(),
                supported: self.table.tags(),
            })
    }

    pub fn supports(&self, provider: &str) -> bool {
        self.table.supports(provider)
    }

    pub fn list_providers(&self) -> Vec<String> {
        self.table.tags()
    }
}

/// Rejects names that would escape the storage namespace.
pub(crate) fn validate_filename(filename: &str) -> Result<()> {
    let invalid = filename.trim().is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename == "."
        || filename == "..";
    if invalid {
        return Err(AppError::Storage(format!("Invalid object filename '{filename}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_provider_lists_registered_ones() {
        let registry = StorageRegistry::new(vec![Arc::new(LocalStorage::new(Path::new("/tmp")))]);
        assert!(registry.supports("LOCAL"));
        match registry.resolve("gcs") {
            Err(AppError::UnsupportedStorageProvider { requested, supported }) => {
                assert_eq!(requested, "gcs");
                assert_eq!(supported, vec!["local".to_string()]);
            }
            Err(other) => panic!("unexpected error: {other}"),
            Ok(_) => panic!("gcs should not resolve"),
        }
    }

    #[test]
    fn filenames_cannot_traverse() {
        assert!(validate_filename("dbbackup_postgres_app.dump.gz").is_ok());
        assert!(validate_filename("../etc/passwd").is_err());
        assert!(validate_filename("a\\b").is_err());
        assert!(validate_filename("  ").is_err());
    }
}
