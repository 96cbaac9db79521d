// dbbackup/src/metadata.rs
//! Sidecar documents stored next to each backup artifact, so a backup can be
//! understood from storage alone.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::errors::Result;
use crate::model::{BackupRecord, BackupStatus};
use crate::transform::CompressionAlgorithm;

pub const SIDECAR_VERSION: &str = "1.0.0";
pub const SIDECAR_SUFFIX: &str = ".meta.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadataDocument {
    pub filename: String,
    pub version: String,
    pub db_type: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub size_bytes: Option<u64>,
    pub sha256: Option<String>,
    pub compress_algo: CompressionAlgorithm,
    pub encrypt_algo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks: Option<usize>,
    pub status: BackupStatus,
}

/// Artifact details known when the sidecar is written.
#[derive(Debug, Clone, Default)]
pub struct ArtifactFacts {
    pub size_bytes: Option<u64>,
    pub checksum: Option<String>,
    pub encryption_algorithm: Option<String>,
    pub chunks: Option<usize>,
}

impl BackupMetadataDocument {
    pub fn describe(
        record: &BackupRecord,
        filename: &str,
        status: BackupStatus,
        facts: ArtifactFacts,
    ) -> Self {
        let end_time = Utc::now();
        Self {
            filename: filename.to_string(),
            version: SIDECAR_VERSION.to_string(),
            db_type: record.database_type.clone(),
            db_host: record.host.clone(),
            db_port: record.port,
            db_name: record.database_name.clone(),
            start_time: record.created_at,
            end_time,
            duration_ms: (end_time - record.created_at).num_milliseconds(),
            size_bytes: facts.size_bytes,
            sha256: facts.checksum,
            compress_algo: record.compression_algorithm,
            encrypt_algo: facts.encryption_algorithm,
            chunks: facts.chunks,
            status,
        }
    }

    /// Object name the sidecar is stored under.
    pub fn object_name(backup_id: &str) -> String {
        format!("{backup_id}{SIDECAR_SUFFIX}")
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

pub trait MetadataStore: Send + Sync {
    fn save(&self, document: &BackupMetadataDocument, path: &Path) -> Result<()>;

    fn load(&self, path: &Path) -> Result<BackupMetadataDocument>;

    /// `false` for missing, unreadable or incomplete documents; never errors.
    fn validate(&self, path: &Path) -> bool;
}

/// Pretty-printed UTF-8 JSON files.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMetadataStore;

impl MetadataStore for JsonMetadataStore {
    fn save(&self, document: &BackupMetadataDocument, path: &Path) -> Result<()> {
        std::fs::write(path, document.to_json_bytes()?)?;
        tracing::debug!(path = %path.display(), "Wrote metadata sidecar");
        Ok(())
    }

    fn load(&self, path: &Path) -> Result<BackupMetadataDocument> {
        let contents = std::fs::read(path)?;
        Ok(serde_json::from_slice(&contents)?)
    }

    fn validate(&self, path: &Path) -> bool {
        let Ok(contents) = std::fs::read(path) else {
            return false;
        };
        let Ok(value) = serde_json::from_slice::<serde_json::Value>(&contents) else {
            return false;
        };
        let present = |field: &str| {
            value
                .get(field)
                .and_then(|v| v.as_str())
                .is_some_and(|s| !s.trim().is_empty())
        };
        present("filename") && present("dbType") && present("status")
    }
}
