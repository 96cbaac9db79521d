// dbbackup/src/storage/s3.rs
//! S3-compatible storage: one strategy for AWS S3 and MinIO, differing only in
//! provider tag and client configuration.
//!
//! Uploads above the multipart threshold go through the multipart state
//! machine: initiate, upload numbered parts, complete. Any failure after
//! initiation aborts the upload before the error is returned.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

use super::s3_client::{ObjectBody, ObjectStoreClient, PartTag};
use super::{ByteReader, StorageStrategy, UploadOutcome, UploadRequest, validate_filename};
use crate::config::S3StorageConfig;
use crate::errors::{AppError, Result};

pub const DEFAULT_MULTIPART_THRESHOLD: u64 = 100 * 1024 * 1024;
pub const DEFAULT_PART_SIZE: usize = 50 * 1024 * 1024;
pub const DEFAULT_FOLDER_PREFIX: &str = "backups/";

pub struct S3CompatibleStorage {
    provider: String,
    client: Arc<dyn ObjectStoreClient>,
    bucket: String,
    prefix: String,
    multipart_threshold: u64,
    part_size: usize,
}

impl S3CompatibleStorage {
    pub fn new(provider: &str, client: Arc<dyn ObjectStoreClient>, bucket: &str, prefix: &str) -> Self {
        Self {
            provider: provider.to_ascii_lowercase(),
            client,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
            multipart_threshold: DEFAULT_MULTIPART_THRESHOLD,
            part_size: DEFAULT_PART_SIZE,
        }
    }

    pub fn from_settings(
        provider: &str,
        client: Arc<dyn ObjectStoreClient>,
        settings: &S3StorageConfig,
    ) -> Self {
        Self::new(provider, client, &settings.bucket_name, &settings.folder_prefix)
            .with_multipart(settings.multipart_threshold_bytes, settings.part_size_bytes)
    }

    pub fn with_multipart(mut self, threshold: u64, part_size: usize) -> Self {
        self.multipart_threshold = threshold;
        self.part_size = part_size.max(1);
        self
    }

    fn object_key(&self, filename: &str) -> String {
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            filename.to_string()
        } else {
            format!("{prefix}/{filename}")
        }
    }

    fn location(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }

    /// Accepts an `s3://bucket/key` URI or a bare key in the configured bucket.
    fn locate(&self, location: &str) -> Result<(String, String)> {
        if location.starts_with("s3://") {
            parse_s3_uri(location)
        } else {
            Ok((self.bucket.clone(), location.trim_start_matches('/').to_string()))
        }
    }

    /// File-backed requests are streamed from disk; other streams are read
    /// into memory first.
    async fn upload_single(&self, key: &str, mut request: UploadRequest) -> Result<UploadOutcome> {
        let body = match request.source_path.take() {
            Some(path) => ObjectBody::File(path),
            None => {
                let mut bytes = Vec::with_capacity(request.size_bytes as usize);
                request
                    .data
                    .read_to_end(&mut bytes)
                    .await
                    .map_err(|e| AppError::Storage(format!("Failed to read upload source: {e}")))?;
                ObjectBody::Bytes(bytes)
            }
        };
        self.client
            .put_object(&self.bucket, key, body, &request.metadata)
            .await?;
        Ok(UploadOutcome {
            location: self.location(key),
            parts: None,
        })
    }

    async fn upload_multipart(&self, key: &str, mut request: UploadRequest) -> Result<UploadOutcome> {
        let upload_id = self
            .client
            .create_multipart_upload(&self.bucket, key, &request.metadata)
            .await?;
        tracing::info!(key = %key, upload_id = %upload_id, part_size = self.part_size, "Started multipart upload");

        match self.upload_parts(key, &upload_id, &mut request.data).await {
            Ok(parts) => {
                tracing::info!(key = %key, parts, "Multipart upload completed");
                Ok(UploadOutcome {
                    location: self.location(key),
                    parts: Some(parts),
                })
            }
            Err(err) => {
                tracing::error!(key = %key, upload_id = %upload_id, error = %err, "Multipart upload failed, aborting");
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload(&self.bucket, key, &upload_id)
                    .await
                {
                    tracing::warn!(key = %key, upload_id = %upload_id, error = %abort_err, "Abort of multipart upload failed");
                }
                Err(match err {
                    AppError::Storage(_) => err,
                    other => AppError::Storage(format!("Multipart upload of '{key}' failed: {other}")),
                })
            }
        }
    }

    async fn upload_parts(&self, key: &str, upload_id: &str, data: &mut ByteReader) -> Result<usize> {
        let mut parts: Vec<PartTag> = Vec::new();
        let mut part_number: i32 = 0;
        loop {
            let chunk = read_chunk(data, self.part_size).await?;
            if chunk.is_empty() {
                break;
            }
            part_number += 1;
            let size = chunk.len();
            let e_tag = self
                .client
                .upload_part(&self.bucket, key, upload_id, part_number, chunk)
                .await?;
            tracing::debug!(key = %key, part_number, size, "Uploaded part");
            parts.push(PartTag { part_number, e_tag });
        }

        if parts.is_empty() {
            return Err(AppError::Storage(format!(
                "No data read for multipart upload of '{key}'"
            )));
        }
        self.client
            .complete_multipart_upload(&self.bucket, key, upload_id, &parts)
            .await?;
        Ok(parts.len())
    }
}

/// Reads up to `size` bytes; shorter only at end of stream.
async fn read_chunk(data: &mut ByteReader, size: usize) -> Result<Vec<u8>> {
    let mut chunk = Vec::new();
    data.take(size as u64)
        .read_to_end(&mut chunk)
        .await
        .map_err(|e| AppError::Storage(format!("Failed to read upload source: {e}")))?;
    Ok(chunk)
}

/// Splits `s3://bucket/key` into bucket and key.
pub fn parse_s3_uri(s3_uri: &str) -> Result<(String, String)> {
    let uri = url::Url::parse(s3_uri)?;
    if uri.scheme() != "s3" {
        return Err(AppError::Storage(format!("S3 URI must start with s3://: {s3_uri}")));
    }
    let bucket = uri
        .host_str()
        .ok_or_else(|| AppError::Storage(format!("S3 URI missing bucket name: {s3_uri}")))?
        .to_string();
    let key = uri.path().trim_start_matches('/').to_string();
    if key.is_empty() {
        return Err(AppError::Storage(format!("S3 URI missing object key: {s3_uri}")));
    }
    Ok((bucket, key))
}

#[async_trait]
impl StorageStrategy for S3CompatibleStorage {
    fn provider(&self) -> &str {
        &self.provider
    }

    async fn upload(&self, request: UploadRequest) -> Result<UploadOutcome> {
        validate_filename(&request.filename)?;
        let key = self.object_key(&request.filename);
        let multipart = request.enable_multipart && request.size_bytes > self.multipart_threshold;
        tracing::info!(
            provider = %self.provider,
            bucket = %self.bucket,
            key = %key,
            size_bytes = request.size_bytes,
            multipart,
            "Uploading object"
        );
        if multipart {
            self.upload_multipart(&key, request).await
        } else {
            self.upload_single(&key, request).await
        }
    }

    async fn download(&self, location: &str) -> Result<ByteReader> {
        let (bucket, key) = self.locate(location)?;
        tracing::info!(bucket = %bucket, key = %key, "Downloading object");
        self.client.get_object(&bucket, &key).await
    }

    async fn delete(&self, location: &str) -> Result<()> {
        let (bucket, key) = self.locate(location)?;
        self.client.delete_object(&bucket, &key).await?;
        tracing::info!(bucket = %bucket, key = %key, "Deleted object");
        Ok(())
    }

    async fn exists(&self, location: &str) -> Result<bool> {
        let (bucket, key) = self.locate(location)?;
        self.client.head_object(&bucket, &key).await
    }
}
