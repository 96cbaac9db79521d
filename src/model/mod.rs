pub mod command;
pub mod record;

pub use command::{
    BackupCommand, BackupResult, BackupSummary, ListBackupsQuery, RestoreCommand, RestoreResult,
    TestConnectionCommand, TestConnectionResult,
};
pub use record::{BackupRecord, BackupStatus, Completion};
