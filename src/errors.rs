use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unsupported database type '{requested}'. Supported types: {}", .supported.join(", "))]
    UnsupportedDatabase {
        requested: String,
        supported: Vec<String>,
    },

    #[error("Unsupported storage provider '{requested}'. Supported providers: {}", .supported.join(", "))]
    UnsupportedStorageProvider {
        requested: String,
        supported: Vec<String>,
    },

    #[error("Backup operation failed: {0}")]
    BackupFailed(String),

    #[error("Restore operation failed: {0}")]
    RestoreFailed(String),

    /// Checksum or authentication-tag mismatch. Never proceed to apply data after this.
    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Storage operation failed: {0}")]
    Storage(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl AppError {
    /// Wraps an error from a pipeline step as a backup failure, keeping already
    /// classified integrity and storage errors intact.
    pub fn into_backup_failure(self, step: &str) -> Self {
        match self {
            err @ (AppError::BackupFailed(_)
            | AppError::Integrity(_)
            | AppError::Storage(_)
            | AppError::UnsupportedDatabase { .. }
            | AppError::UnsupportedStorageProvider { .. }) => err,
            other => AppError::BackupFailed(format!("{step}: {other}")),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_database_lists_registered_types() {
        let err = AppError::UnsupportedDatabase {
            requested: "oracle".to_string(),
            supported: vec!["postgres".into(), "mysql".into(), "mongodb".into()],
        };
        assert_eq!(
            err.to_string(),
            "Unsupported database type 'oracle'. Supported types: postgres, mysql, mongodb"
        );
    }

    #[test]
    fn backup_failure_keeps_storage_errors() {
        let err = AppError::Storage("bucket missing".into()).into_backup_failure("upload");
        assert!(matches!(err, AppError::Storage(_)));

        let err = AppError::Io(std::io::Error::other("disk full")).into_backup_failure("compression");
        assert_eq!(
            err.to_string(),
            "Backup operation failed: compression: I/O error: disk full"
        );
    }
}
