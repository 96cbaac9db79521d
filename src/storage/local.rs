// dbbackup/src/storage/local.rs
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use super::{ByteReader, StorageStrategy, UploadOutcome, UploadRequest, validate_filename};
use crate::errors::{AppError, Result};

/// Stores objects as files under a base directory. Locations are absolute paths.
pub struct LocalStorage {
    base_dir: PathBuf,
}

impl LocalStorage {
    pub fn new(base_dir: &Path) -> Self {
        Self {
            base_dir: base_dir.to_path_buf(),
        }
    }

    fn resolve(&self, location: &str) -> PathBuf {
        let path = Path::new(location);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[async_trait]
impl StorageStrategy for LocalStorage {
    fn provider(&self) -> &str {
        "local"
    }

    async fn upload(&self, mut request: UploadRequest) -> Result<UploadOutcome> {
        validate_filename(&request.filename)?;
        tokio::fs::create_dir_all(&self.base_dir).await.map_err(|e| {
            AppError::Storage(format!(
                "Cannot create backup directory {}: {e}",
                self.base_dir.display()
            ))
        })?;

        let target = self.base_dir.join(&request.filename);
        tracing::info!(path = %target.display(), size_bytes = request.size_bytes, "Storing backup locally");

        let copy = async {
            let mut file = tokio::fs::File::create(&target).await?;
            let written = tokio::io::copy(&mut request.data, &mut file).await?;
            file.flush().await?;
            file.sync_all().await?;
            Ok::<u64, std::io::Error>(written)
        };
        let written = match copy.await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&target).await;
                return Err(AppError::Storage(format!(
                    "Failed to write {}: {e}",
                    target.display()
                )));
            }
        };

        let absolute = tokio::fs::canonicalize(&target).await?;
        tracing::info!(path = %absolute.display(), bytes = written, "Backup stored locally");
        Ok(UploadOutcome {
            location: absolute.display().to_string(),
            parts: None,
        })
    }

    async fn download(&self, location: &str) -> Result<ByteReader> {
        let path = self.resolve(location);
        let file = tokio::fs::File::open(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                AppError::NotFound(format!("Backup file {} does not exist", path.display()))
            }
            _ => AppError::Storage(format!("Cannot open {}: {e}", path.display())),
        })?;
        Ok(Box::pin(file))
    }

    async fn delete(&self, location: &str) -> Result<()> {
        let path = self.resolve(location);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), "Deleted local backup file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Local backup file already absent");
                Ok(())
            }
            Err(e) => Err(AppError::Storage(format!(
                "Cannot delete {}: {e}",
                path.display()
            ))),
        }
    }

    async fn exists(&self, location: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.resolve(location)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn upload_download_delete() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let base = dir.path().join("nested").join("backups");
        let storage = LocalStorage::new(&base);

        let request = UploadRequest::from_bytes(b"dump bytes".to_vec(), "a.dump", HashMap::new());
        let outcome = storage.upload(request).await?;
        assert!(Path::new(&outcome.location).is_absolute());
        assert!(outcome.parts.is_none());
        assert!(storage.exists(&outcome.location).await?);
        assert!(storage.exists("a.dump").await?);

        let mut reader = storage.download(&outcome.location).await?;
        let mut contents = Vec::new();
        reader.read_to_end(&mut contents).await?;
        assert_eq!(contents, b"dump bytes");

        storage.delete(&outcome.location).await?;
        assert!(!storage.exists(&outcome.location).await?);
        storage.delete(&outcome.location).await?;
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_not_found() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = LocalStorage::new(dir.path());
        assert!(matches!(
            storage.download("nope.dump").await,
            Err(AppError::NotFound(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_path_traversal() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let storage = LocalStorage::new(dir.path());
        let request = UploadRequest::from_bytes(b"x".to_vec(), "../escape.dump", HashMap::new());
        assert!(matches!(storage.upload(request).await, Err(AppError::Storage(_))));
        Ok(())
    }
}
