// dbbackup/src/connection.rs
use std::sync::Arc;
use std::time::Instant;

use crate::dump::{ConnectionParams, DumpRegistry};
use crate::model::{TestConnectionCommand, TestConnectionResult};

pub const CONNECTION_OK: &str = "Connection successful.";
pub const CONNECTION_REJECTED: &str =
    "Connection failed. Check credentials, host, port, and network access.";

/// Checks that a database is reachable with the given credentials.
pub struct ConnectionTester {
    dumps: Arc<DumpRegistry>,
}

impl ConnectionTester {
    pub fn new(dumps: Arc<DumpRegistry>) -> Self {
        Self { dumps }
    }

    pub async fn execute(&self, command: TestConnectionCommand) -> TestConnectionResult {
        let started = Instant::now();
        let elapsed = || started.elapsed().as_millis() as u64;

        let strategy = match self.dumps.resolve(&command.database_type) {
            Ok(strategy) => strategy,
            Err(e) => {
                tracing::warn!(database_type = %command.database_type, error = %e, "Connection test not attempted");
                return TestConnectionResult {
                    success: false,
                    message: format!("Connection failed with an error: {e}"),
                    duration_ms: elapsed(),
                };
            }
        };

        let params = ConnectionParams {
            host: command.host,
            port: command.port,
            database: command.database,
            username: command.username,
            password: command.password,
        };
        let success = strategy.test_connection(&params).await;
        tracing::info!(
            database_type = strategy.database_type(),
            host = %params.host,
            port = params.port,
            success,
            "Connection test finished"
        );

        TestConnectionResult {
            success,
            message: if success { CONNECTION_OK } else { CONNECTION_REJECTED }.to_string(),
            duration_ms: elapsed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedDump;
    use crate::dump::DumpStrategy;

    fn command(database_type: &str, host: &str) -> TestConnectionCommand {
        TestConnectionCommand {
            database_type: database_type.to_string(),
            host: host.to_string(),
            port: 5432,
            database: "app".to_string(),
            username: "app".to_string(),
            password: "pw".to_string(),
        }
    }

    fn tester() -> ConnectionTester {
        let strategy: Arc<dyn DumpStrategy> = Arc::new(ScriptedDump::new("postgres", b""));
        ConnectionTester::new(Arc::new(DumpRegistry::new(vec![strategy])))
    }

    #[tokio::test]
    async fn reachable_database_reports_success() {
        let result = tester().execute(command("postgres", "localhost")).await;
        assert!(result.success);
        assert_eq!(result.message, "Connection successful.");
    }

    #[tokio::test]
    async fn rejected_connection_reports_failure() {
        let result = tester().execute(command("POSTGRES", "db.invalid")).await;
        assert!(!result.success);
        assert_eq!(result.message, CONNECTION_REJECTED);
    }

    #[tokio::test]
    async fn unknown_type_reports_the_error() {
        let result = tester().execute(command("oracle", "localhost")).await;
        assert!(!result.success);
        assert!(result.message.starts_with("Connection failed with an error: Unsupported database type 'oracle'"));
    }
}
