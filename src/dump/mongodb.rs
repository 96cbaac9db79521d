// dbbackup/src/dump/mongodb.rs
use async_trait::async_trait;
use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::net::TcpStream;

use super::process::{ToolCommand, ensure_output_file, tool_version};
use super::{
    CONNECTION_TEST_TIMEOUT, ConnectionParams, DumpConfig, DumpOutput, DumpStrategy, RestoreInput,
    dump_file_name,
};
use crate::errors::{AppError, Result};
use crate::utils::find_executable;

const DEFAULT_AUTH_DATABASE: &str = "admin";
const CREDENTIALS_FILE: &str = ".mongo-credentials.yaml";

/// `mongodump --archive` / `mongorestore --archive`.
///
/// The MongoDB tools read no password variable, so the password goes into a
/// private YAML file passed with `--config`.
pub struct MongoDumpStrategy {
    timeout: Duration,
}

impl MongoDumpStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

fn connection_args(
    conn: &ConnectionParams,
    auth_database: &str,
    credentials: Option<&Path>,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--host".into(),
        conn.host.clone().into(),
        "--port".into(),
        conn.port.to_string().into(),
    ];
    if !conn.username.is_empty() {
        args.push("--username".into());
        args.push(conn.username.clone().into());
        args.push("--authenticationDatabase".into());
        args.push(auth_database.into());
    }
    if let Some(path) = credentials {
        let mut flag = OsString::from("--config=");
        flag.push(path.as_os_str());
        args.push(flag);
    }
    args
}

pub(crate) fn dump_args(
    config: &DumpConfig,
    output: &Path,
    credentials: Option<&Path>,
) -> Result<Vec<OsString>> {
    let tables = config.tables();
    if tables.len() > 1 {
        return Err(AppError::BackupFailed(format!(
            "mongodump can export a single collection per run, got {}",
            tables.len()
        )));
    }

    let auth_db = config
        .option("authenticationDatabase")
        .unwrap_or(DEFAULT_AUTH_DATABASE);
    let mut args = connection_args(&config.connection, auth_db, credentials);
    args.push("--db".into());
    args.push(config.connection.database.clone().into());
    if let Some(collection) = tables.first() {
        args.push("--collection".into());
        args.push(collection.into());
    }
    let mut archive = OsString::from("--archive=");
    archive.push(output.as_os_str());
    args.push(archive);
    Ok(args)
}

pub(crate) fn restore_args(input: &RestoreInput, credentials: Option<&Path>) -> Vec<OsString> {
    let mut args = connection_args(&input.target, DEFAULT_AUTH_DATABASE, credentials);
    if !input.skip_if_exists {
        args.push("--drop".into());
    }
    let source = &input.source_database;
    let target = &input.target.database;
    if source != target {
        args.push("--nsFrom".into());
        args.push(format!("{source}.*").into());
        args.push("--nsTo".into());
        args.push(format!("{target}.*").into());
    }
    for collection in input.tables() {
        args.push("--nsInclude".into());
        args.push(format!("{source}.{collection}").into());
    }
    let mut archive = OsString::from("--archive=");
    archive.push(input.dump_file.as_os_str());
    args.push(archive);
    args
}

/// Writes the password to an owner-only YAML file; `None` when there is no password.
fn write_credentials(dir: &Path, password: &str) -> Result<Option<PathBuf>> {
    if password.is_empty() {
        return Ok(None);
    }
    let path = dir.join(CREDENTIALS_FILE);
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(&path)?;
    // A JSON string literal is a valid double-quoted YAML scalar.
    writeln!(file, "password: {}", serde_json::to_string(password)?)?;
    Ok(Some(path))
}

fn remove_credentials(path: Option<PathBuf>) {
    if let Some(path) = path {
        if let Err(e) = std::fs::remove_file(&path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove MongoDB credentials file");
        }
    }
}

#[async_trait]
impl DumpStrategy for MongoDumpStrategy {
    fn database_type(&self) -> &str {
        "mongodb"
    }

    async fn dump(&self, config: &DumpConfig) -> Result<DumpOutput> {
        let mongodump = find_executable("mongodump")?;
        let output = config
            .working_dir
            .join(dump_file_name(&config.connection.database, "archive"));

        tracing::info!(
            database = %config.connection.database,
            host = %config.connection.host,
            output = %output.display(),
            "Dumping MongoDB database"
        );
        let credentials = write_credentials(&config.working_dir, &config.connection.password)?;
        let args = match dump_args(config, &output, credentials.as_deref()) {
            Ok(args) => args,
            Err(e) => {
                remove_credentials(credentials);
                return Err(e);
            }
        };
        let run = ToolCommand::new(&mongodump)
            .args(args)
            .timeout(self.timeout)
            .run()
            .await;
        remove_credentials(credentials);
        run?;

        let size_bytes = ensure_output_file(&output, "mongodump")?;
        let metadata = HashMap::from([
            ("tool".to_string(), "mongodump".to_string()),
            ("format".to_string(), "archive".to_string()),
            ("toolVersion".to_string(), tool_version(&mongodump).await),
        ]);
        tracing::info!(size_bytes, "MongoDB dump finished");
        Ok(DumpOutput {
            dump_file: output,
            size_bytes,
            metadata,
        })
    }

    async fn restore(&self, input: &RestoreInput) -> Result<()> {
        let mongorestore = find_executable("mongorestore")?;
        tracing::info!(
            target_database = %input.target.database,
            host = %input.target.host,
            skip_if_exists = input.skip_if_exists,
            "Restoring MongoDB database"
        );
        let credentials = write_credentials(&input.working_dir, &input.target.password)?;
        let run = ToolCommand::new(&mongorestore)
            .args(restore_args(input, credentials.as_deref()))
            .timeout(self.timeout)
            .failing_with(AppError::RestoreFailed)
            .run()
            .await;
        remove_credentials(credentials);
        run?;
        Ok(())
    }

    async fn test_connection(&self, connection: &ConnectionParams) -> bool {
        let address = (connection.host.as_str(), connection.port);
        match tokio::time::timeout(CONNECTION_TEST_TIMEOUT, TcpStream::connect(address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::warn!(host = %connection.host, error = %e, "MongoDB connection test failed");
                false
            }
            Err(_) => {
                tracing::warn!(host = %connection.host, "MongoDB connection test timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection() -> ConnectionParams {
        ConnectionParams {
            host: "mongo".into(),
            port: 27017,
            database: "events".into(),
            username: "backup".into(),
            password: "p\"w".into(),
        }
    }

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn dump_config(tables: Option<Vec<String>>) -> DumpConfig {
        DumpConfig {
            connection: connection(),
            working_dir: PathBuf::from("/tmp/run"),
            tables,
            additional_options: HashMap::new(),
        }
    }

    #[test]
    fn dump_arguments() -> Result<()> {
        let config = dump_config(Some(vec!["clicks".into()]));
        let args = strings(dump_args(
            &config,
            Path::new("/tmp/run/events.archive"),
            Some(Path::new("/tmp/run/creds.yaml")),
        )?);
        assert!(args.windows(2).any(|w| w[0] == "--collection" && w[1] == "clicks"));
        assert!(args.windows(2).any(|w| w[0] == "--authenticationDatabase" && w[1] == "admin"));
        assert!(args.contains(&"--config=/tmp/run/creds.yaml".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--archive=/tmp/run/events.archive"));
        Ok(())
    }

    #[test]
    fn more_than_one_collection_is_rejected() {
        let config = dump_config(Some(vec!["a".into(), "b".into()]));
        assert!(dump_args(&config, Path::new("/tmp/x"), None).is_err());
    }

    #[test]
    fn restore_renames_namespace_and_drops_unless_skipping() {
        let mut input = RestoreInput {
            dump_file: PathBuf::from("/tmp/events.archive"),
            source_database: "events".into(),
            target: ConnectionParams {
                database: "events_copy".into(),
                ..connection()
            },
            skip_if_exists: false,
            tables: Some(vec!["clicks".into()]),
            working_dir: PathBuf::from("/tmp"),
        };
        let args = strings(restore_args(&input, None));
        assert!(args.contains(&"--drop".to_string()));
        assert!(args.windows(2).any(|w| w[0] == "--nsFrom" && w[1] == "events.*"));
        assert!(args.windows(2).any(|w| w[0] == "--nsTo" && w[1] == "events_copy.*"));
        assert!(args.windows(2).any(|w| w[0] == "--nsInclude" && w[1] == "events.clicks"));

        input.skip_if_exists = true;
        assert!(!strings(restore_args(&input, None)).contains(&"--drop".to_string()));
    }

    #[test]
    fn credentials_file_is_private_and_escaped() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = write_credentials(dir.path(), "p\"w")?.ok_or_else(|| {
            AppError::Config("expected a credentials file".into())
        })?;
        assert_eq!(std::fs::read_to_string(&path)?, "password: \"p\\\"w\"\n");
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            assert_eq!(std::fs::metadata(&path)?.permissions().mode() & 0o777, 0o600);
        }
        remove_credentials(Some(path.clone()));
        assert!(!path.exists());
        assert!(write_credentials(dir.path(), "")?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn closed_port_reports_false() {
        let strategy = MongoDumpStrategy::new(Duration::from_secs(1));
        let params = ConnectionParams {
            host: "127.0.0.1".into(),
            port: 1,
            ..connection()
        };
        assert!(!strategy.test_connection(&params).await);
    }
}
