// dbbackup/src/dump/mysql.rs
use async_trait::async_trait;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::{Connection, MySqlConnection};
use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;

use super::process::{ToolCommand, ensure_output_file, tool_version};
use super::{
    CONNECTION_TEST_TIMEOUT, ConnectionParams, DumpConfig, DumpOutput, DumpStrategy, RestoreInput,
    dump_file_name,
};
use crate::errors::{AppError, Result};
use crate::utils::find_executable;

const PASSWORD_ENV: &str = "MYSQL_PWD";

/// `mysqldump` to a plain SQL file, replayed through the `mysql` client.
pub struct MySqlDumpStrategy {
    timeout: Duration,
}

impl MySqlDumpStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

pub(crate) fn dump_args(config: &DumpConfig, output: &Path) -> Vec<OsString> {
    let conn = &config.connection;
    let mut result_file = OsString::from("--result-file=");
    result_file.push(output.as_os_str());

    let mut args: Vec<OsString> = vec![
        "-h".into(),
        conn.host.clone().into(),
        "-P".into(),
        conn.port.to_string().into(),
        "-u".into(),
        conn.username.clone().into(),
        "--single-transaction".into(),
        "--routines".into(),
        "--events".into(),
        "--triggers".into(),
        result_file,
        conn.database.clone().into(),
    ];
    args.extend(config.tables().iter().map(OsString::from));
    args
}

/// `--force` keeps going past statements that fail because objects already exist.
pub(crate) fn restore_args(input: &RestoreInput) -> Vec<OsString> {
    let target = &input.target;
    let mut args: Vec<OsString> = vec![
        "-h".into(),
        target.host.clone().into(),
        "-P".into(),
        target.port.to_string().into(),
        "-u".into(),
        target.username.clone().into(),
    ];
    if input.skip_if_exists {
        args.push("--force".into());
    }
    args.push(target.database.clone().into());
    args
}

#[async_trait]
impl DumpStrategy for MySqlDumpStrategy {
    fn database_type(&self) -> &str {
        "mysql"
    }

    async fn dump(&self, config: &DumpConfig) -> Result<DumpOutput> {
        let mysqldump = find_executable("mysqldump")?;
        let output = config
            .working_dir
            .join(dump_file_name(&config.connection.database, "sql"));

        tracing::info!(
            database = %config.connection.database,
            host = %config.connection.host,
            output = %output.display(),
            "Dumping MySQL database"
        );
        ToolCommand::new(&mysqldump)
            .args(dump_args(config, &output))
            .env(PASSWORD_ENV, &config.connection.password)
            .timeout(self.timeout)
            .run()
            .await?;

        let size_bytes = ensure_output_file(&output, "mysqldump")?;
        let metadata = HashMap::from([
            ("tool".to_string(), "mysqldump".to_string()),
            ("format".to_string(), "sql".to_string()),
            ("toolVersion".to_string(), tool_version(&mysqldump).await),
        ]);
        tracing::info!(size_bytes, "MySQL dump finished");
        Ok(DumpOutput {
            dump_file: output,
            size_bytes,
            metadata,
        })
    }

    async fn restore(&self, input: &RestoreInput) -> Result<()> {
        let mysql = find_executable("mysql")?;
        if !input.tables().is_empty() {
            tracing::warn!(
                tables = ?input.tables(),
                "MySQL restores replay the whole SQL file; the table filter is ignored"
            );
        }
        tracing::info!(
            target_database = %input.target.database,
            host = %input.target.host,
            skip_if_exists = input.skip_if_exists,
            "Restoring MySQL database"
        );
        ToolCommand::new(&mysql)
            .args(restore_args(input))
            .env(PASSWORD_ENV, &input.target.password)
            .stdin_file(&input.dump_file)
            .timeout(self.timeout)
            .failing_with(AppError::RestoreFailed)
            .run()
            .await?;
        Ok(())
    }

    async fn test_connection(&self, connection: &ConnectionParams) -> bool {
        let options = MySqlConnectOptions::new()
            .host(&connection.host)
            .port(connection.port)
            .username(&connection.username)
            .password(&connection.password)
            .database(&connection.database);

        let attempt = async {
            let mut conn = MySqlConnection::connect_with(&options).await?;
            conn.ping().await?;
            conn.close().await
        };
        match tokio::time::timeout(CONNECTION_TEST_TIMEOUT, attempt).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(host = %connection.host, error = %e, "MySQL connection test failed");
                false
            }
            Err(_) => {
                tracing::warn!(host = %connection.host, "MySQL connection test timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn connection() -> ConnectionParams {
        ConnectionParams {
            host: "db.internal".into(),
            port: 3306,
            database: "shop".into(),
            username: "root".into(),
            password: "pw".into(),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn dump_arguments_end_with_database_and_tables() {
        let config = DumpConfig {
            connection: connection(),
            working_dir: PathBuf::from("/tmp/run"),
            tables: Some(vec!["orders".into()]),
            additional_options: HashMap::new(),
        };
        let args = strings(dump_args(&config, Path::new("/tmp/run/shop.sql")));
        assert!(args.contains(&"--single-transaction".to_string()));
        assert!(args.contains(&"--result-file=/tmp/run/shop.sql".to_string()));
        assert_eq!(args[args.len() - 2..], ["shop", "orders"]);
        assert!(!args.iter().any(|a| a.contains("pw")));
    }

    #[test]
    fn restore_force_only_when_skipping_existing() {
        let mut input = RestoreInput {
            dump_file: PathBuf::from("/tmp/shop.sql"),
            source_database: "shop".into(),
            target: connection(),
            skip_if_exists: false,
            tables: None,
            working_dir: PathBuf::from("/tmp"),
        };
        assert!(!strings(restore_args(&input)).contains(&"--force".to_string()));
        input.skip_if_exists = true;
        let args = strings(restore_args(&input));
        assert!(args.contains(&"--force".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("shop"));
    }
}
