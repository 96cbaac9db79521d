// dbbackup/src/dump/mod.rs
//! Database dump strategies and their registry.
//!
//! Each strategy drives one database's native dump and restore tools. The
//! registry is an explicit table built once at startup.

pub(crate) mod process;
pub mod mongodb;
pub mod mysql;
pub mod postgres;

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::{AppError, Result};
use crate::registry::StrategyTable;

pub use mongodb::MongoDumpStrategy;
pub use mysql::MySqlDumpStrategy;
pub use postgres::PostgresDumpStrategy;
pub use process::DEFAULT_TOOL_TIMEOUT;

/// Timeout for connection tests.
pub const CONNECTION_TEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct DumpConfig {
    pub connection: ConnectionParams,
    /// Per-run directory the dump file is written into.
    pub working_dir: PathBuf,
    pub tables: Option<Vec<String>>,
    pub additional_options: HashMap<String, String>,
}

impl DumpConfig {
    pub(crate) fn tables(&self) -> &[String] {
        self.tables.as_deref().unwrap_or_default()
    }

    pub(crate) fn option(&self, key: &str) -> Option<&str> {
        self.additional_options
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

#[derive(Debug, Clone)]
pub struct DumpOutput {
    pub dump_file: PathBuf,
    pub size_bytes: u64,
    /// Tool details such as `tool`, `format` and `toolVersion`.
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct RestoreInput {
    pub dump_file: PathBuf,
    /// Database name the dump was taken from.
    pub source_database: String,
    pub target: ConnectionParams,
    pub skip_if_exists: bool,
    pub tables: Option<Vec<String>>,
    pub working_dir: PathBuf,
}

impl RestoreInput {
    pub(crate) fn tables(&self) -> &[String] {
        self.tables.as_deref().unwrap_or_default()
    }
}

#[async_trait]
pub trait DumpStrategy: Send + Sync {
    /// Registry tag, e.g. `postgres`.
    fn database_type(&self) -> &str;

    async fn dump(&self, config: &DumpConfig) -> Result<DumpOutput>;

    async fn restore(&self, input: &RestoreInput) -> Result<()>;

    /// Never errors; unreachable or rejected connections report `false`.
    async fn test_connection(&self, connection: &ConnectionParams) -> bool;
}

pub struct DumpRegistry {
    table: StrategyTable<dyn DumpStrategy>,
}

impl DumpRegistry {
    pub fn new(strategies: Vec<Arc<dyn DumpStrategy>>) -> Self {
        Self {
            table: StrategyTable::new(strategies, |s| s.database_type().to_string()),
        }
    }

    /// PostgreSQL, MySQL and MongoDB, in that order.
    pub fn with_defaults(tool_timeout: Duration) -> Self {
        Self::new(vec![
            Arc::new(PostgresDumpStrategy::new(tool_timeout)),
            Arc::new(MySqlDumpStrategy::new(tool_timeout)),
            Arc::new(MongoDumpStrategy::new(tool_timeout)),
        ])
    }

    pub fn resolve(&self, database_type: &str) -> Result<Arc<dyn DumpStrategy>> {
        self.table
            .get(database_type)
            .ok_or_else(|| AppError::UnsupportedDatabase {
                requested: database_type.to_string(),
                supported: self.table.tags(),
            })
    }

    pub fn supports(&self, database_type: &str) -> bool {
        self.table.supports(database_type)
    }

    pub fn list_types(&self) -> Vec<String> {
        self.table.tags()
    }
}

/// File name used inside the working directory for a dump of `database`.
pub(crate) fn dump_file_name(database: &str, extension: &str) -> String {
    let safe: String = database
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    format!("{safe}.{extension}")
}
