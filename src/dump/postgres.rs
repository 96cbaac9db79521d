// dbbackup/src/dump/postgres.rs
use async_trait::async_trait;
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection};
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

const PASSWORD_ENV: &str = "PGPASSWORD";

/// `pg_dump --format=custom` / `pg_restore`.
pub struct PostgresDumpStrategy {
    timeout: Duration,
}

impl PostgresDumpStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

/// `-h host -p port -U user -d db --format=custom --no-owner --no-acl --blobs [-n schema] [-t table]* -f out`
pub(crate) fn dump_args(config: &DumpConfig, output: &Path) -> Vec<OsString> {
    let conn = &config.connection;
    let mut args: Vec<OsString> = vec![
        "-h".into(),
        conn.host.clone().into(),
        "-p".into(),
        conn.port.to_string().into(),
        "-U".into(),
        conn.username.clone().into(),
        "-d".into(),
        conn.database.clone().into(),
        "--format=custom".into(),
        "--no-owner".into(),
        "--no-acl".into(),
        "--blobs".into(),
    ];
    if let Some(schema) = config.option("schema") {
        args.push("-n".into());
        args.push(schema.into());
    }
    for table in config.tables() {
        args.push("-t".into());
        args.push(table.into());
    }
    args.push("-f".into());
    args.push(output.as_os_str().to_owned());
    args
}

/// `-h -p -U -d [--clean --if-exists] --no-owner --no-acl [-t table]* file`
pub(crate) fn restore_args(input: &RestoreInput) -> Vec<OsString> {
    let target = &input.target;
    let mut args: Vec<OsString> = vec![
        "-h".into(),
        target.host.clone().into(),
        "-p".into(),
        target.port.to_string().into(),
        "-U".into(),
        target.username.clone().into(),
        "-d".into(),
        target.database.clone().into(),
    ];
    if !input.skip_if_exists {
        args.push("--clean".into());
        args.push("--if-exists".into());
    }
    args.push("--no-owner".into());
    args.push("--no-acl".into());
    for table in input.tables() {
        args.push("-t".into());
        args.push(table.into());
    }
    args.push(input.dump_file.as_os_str().to_owned());
    args
}

#[async_trait]
impl DumpStrategy for PostgresDumpStrategy {
    fn database_type(&self) -> &str {
        "postgres"
    }

    async fn dump(&self, config: &DumpConfig) -> Result<DumpOutput> {
        let pg_dump = find_executable("pg_dump")?;
        let output = config
            .working_dir
            .join(dump_file_name(&config.connection.database, "dump"));

        tracing::info!(
            database = %config.connection.database,
            host = %config.connection.host,
            output = %output.display(),
            "Dumping PostgreSQL database"
        );
        ToolCommand::new(&pg_dump)
            .args(dump_args(config, &output))
            .env(PASSWORD_ENV, &config.connection.password)
            .timeout(self.timeout)
            .run()
            .await?;

        let size_bytes = ensure_output_file(&output, "pg_dump")?;
        let metadata = HashMap::from([
            ("tool".to_string(), "pg_dump".to_string()),
            ("format".to_string(), "custom".to_string()),
            ("toolVersion".to_string(), tool_version(&pg_dump).await),
        ]);
        tracing::info!(size_bytes, "PostgreSQL dump finished");
        Ok(DumpOutput {
            dump_file: output,
            size_bytes,
            metadata,
        })
    }

    async fn restore(&self, input: &RestoreInput) -> Result<()> {
        let pg_restore = find_executable("pg_restore")?;
        tracing::info!(
            target_database = %input.target.database,
            host = %input.target.host,
            skip_if_exists = input.skip_if_exists,
            "Restoring PostgreSQL database"
        );
        ToolCommand::new(&pg_restore)
            .args(restore_args(input))
            .env(PASSWORD_ENV, &input.target.password)
            .timeout(self.timeout)
            .failing_with(AppError::RestoreFailed)
            .run()
            .await?;
        Ok(())
    }

    async fn test_connection(&self, connection: &ConnectionParams) -> bool {
        let options = PgConnectOptions::new()
            .host(&connection.host)
            .port(connection.port)
            .username(&connection.username)
            .password(&connection.password)
            .database(&connection.database);

        let attempt = async {
            let mut conn = PgConnection::connect_with(&options).await?;
            conn.ping().await?;
            conn.close().await
        };
        match tokio::time::timeout(CONNECTION_TEST_TIMEOUT, attempt).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::warn!(host = %connection.host, error = %e, "PostgreSQL connection test failed");
                false
            }
            Err(_) => {
                tracing::warn!(host = %connection.host, "PostgreSQL connection test timed out");
                false
            }
        }
    }
}
