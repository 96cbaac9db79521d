//! Database backup and restore pipeline.
//!
//! Dumps a database with its native tools, compresses and optionally encrypts
//! the dump, checksums it, uploads it to local or S3-compatible storage and
//! keeps a durable record of every attempt. Restores reverse the process after
//! verifying the stored checksum.

// dbbackup/src/lib.rs
pub mod backup;
pub mod catalog;
pub mod config;
pub mod connection;
pub mod dump;
pub mod errors;
pub mod metadata;
pub mod metrics;
pub mod model;
pub mod record_store;
pub mod registry;
pub mod restore;
pub mod storage;
pub mod telemetry;
pub mod transform;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;

pub use backup::{BackupOrchestrator, BackupSettings};
pub use catalog::BackupCatalog;
pub use connection::ConnectionTester;
pub use errors::{AppError, Result};
pub use restore::{RestoreOrchestrator, RestoreSettings};
