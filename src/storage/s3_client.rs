// dbbackup/src/storage/s3_client.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::{BehaviorVersion, Credentials, Region};
use s3::error::DisplayErrorContext;
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};
use std::collections::HashMap;
use std::path::PathBuf;

use super::ByteReader;
use crate::config::S3StorageConfig;
use crate::errors::{AppError, Result};

/// A part accepted by the object store, as needed to complete the upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTag {
    pub part_number: i32,
    pub e_tag: String,
}

/// Body of a single-request upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectBody {
    /// Streamed from disk by the client.
    File(PathBuf),
    Bytes(Vec<u8>),
}

/// The object-store calls the S3-compatible strategy relies on.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        metadata: &HashMap<String, String>,
    ) -> Result<()>;

    /// Returns the upload id.
    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<String>;

    /// Returns the part's ETag.
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String>;

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartTag],
    ) -> Result<()>;

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()>;

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteReader>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;

    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool>;
}

/// [`ObjectStoreClient`] over the AWS SDK. Works for AWS S3 and any
/// S3-compatible endpoint such as MinIO.
pub struct AwsS3Client {
    client: s3::Client,
}

impl AwsS3Client {
    pub async fn connect(settings: &S3StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(settings.region.clone()));
        if let (Some(key_id), Some(secret)) = (&settings.access_key_id, &settings.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id, secret, None, // session_token
                None,   // expiry
                "Static",
            ));
        }
        if let Some(endpoint) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        let s3_config = s3::config::Builder::from(&sdk_config)
            .force_path_style(settings.force_path_style)
            .build();
        Self {
            client: s3::Client::from_conf(s3_config),
        }
    }
}

fn storage_error<E>(action: &str, key: &str, err: E) -> AppError
where
    E: std::error::Error,
{
    AppError::Storage(format!("{action} for '{key}' failed: {}", DisplayErrorContext(&err)))
}

#[async_trait]
impl ObjectStoreClient for AwsS3Client {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: ObjectBody,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let body = match body {
            ObjectBody::File(path) => ByteStream::from_path(&path).await.map_err(|e| {
                AppError::Storage(format!("Failed to open {} for upload: {e}", path.display()))
            })?,
            ObjectBody::Bytes(bytes) => ByteStream::from(bytes),
        };
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| storage_error("PutObject", key, e))?;
        Ok(())
    }

    async fn create_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<String> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| storage_error("CreateMultipartUpload", key, e))?;
        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| AppError::Storage(format!("No upload id returned for '{key}'")))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String> {
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| storage_error("UploadPart", key, e))?;
        output.e_tag().map(str::to_string).ok_or_else(|| {
            AppError::Storage(format!("No ETag returned for part {part_number} of '{key}'"))
        })
    }

    async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[PartTag],
    ) -> Result<()> {
        let completed_parts = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.e_tag)
                    .build()
            })
            .collect::<Vec<_>>();
        let upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();
        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(upload)
            .send()
            .await
            .map_err(|e| storage_error("CompleteMultipartUpload", key, e))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| storage_error("AbortMultipartUpload", key, e))?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<ByteReader> {
        let output = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    AppError::NotFound(format!("Object '{key}' does not exist in bucket '{bucket}'"))
                } else {
                    storage_error("GetObject", key, service_error)
                }
            })?;
        Ok(Box::pin(output.body.into_async_read()))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| storage_error("DeleteObject", key, e))?;
        Ok(())
    }

    async fn head_object(&self, bucket: &str, key: &str) -> Result<bool> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(storage_error("HeadObject", key, service_error))
                }
            }
        }
    }
}
