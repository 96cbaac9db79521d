//! Database Backup/Restore Tool
//!
//! Provides CLI interface for backup, restore, connection test and listing

// dbbackup/src/main.rs
use anyhow::{Context, Result};
use dbbackup::config::{AppConfig, load_test_connection_command_from_json};
use dbbackup::dump::DumpRegistry;
use dbbackup::metrics::{MetricsSink, TracingMetrics};
use dbbackup::model::ListBackupsQuery;
use dbbackup::record_store::{JsonFileRecordStore, RecordStore};
use dbbackup::storage::StorageRegistry;
use dbbackup::{
    BackupCatalog, BackupOrchestrator, BackupSettings, ConnectionTester, RestoreOrchestrator,
    RestoreSettings, backup, restore, telemetry,
};
use serde::Serialize;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

/// Main entry point for the backup/restore tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    telemetry::init_tracing(telemetry::DEFAULT_FILTER);

    match run_app().await {
        Ok(true) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            eprintln!("❌ Operation failed.");
            ExitCode::FAILURE
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

struct Services {
    backups: BackupOrchestrator,
    restores: RestoreOrchestrator,
    tester: ConnectionTester,
    catalog: BackupCatalog,
}

async fn build_services(app_config: &AppConfig) -> Services {
    let dumps = Arc::new(DumpRegistry::with_defaults(app_config.dump_timeout));
    let storage = Arc::new(StorageRegistry::from_config(app_config).await);
    let records: Arc<dyn RecordStore> =
        Arc::new(JsonFileRecordStore::new(&app_config.record_store_dir));
    let metrics: Arc<dyn MetricsSink> = Arc::new(TracingMetrics);

    Services {
        backups: BackupOrchestrator::new(
            dumps.clone(),
            storage.clone(),
            records.clone(),
            metrics,
            BackupSettings::from_config(app_config),
        ),
        restores: RestoreOrchestrator::new(
            dumps.clone(),
            storage,
            records.clone(),
            RestoreSettings::from_config(app_config),
        ),
        tester: ConnectionTester::new(dumps),
        catalog: BackupCatalog::new(records, app_config.retention_days),
    }
}

/// Returns whether the selected operation succeeded.
async fn run_app() -> Result<bool> {
    let config_path = AppConfig::default_path();
    let app_config = AppConfig::load_from_json(&config_path).with_context(|| {
        format!(
            "Failed to load application configuration from {}",
            config_path.display()
        )
    })?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    let services = build_services(&app_config).await;

    match choice.as_str() {
        "1" | "backup" => {
            println!("🚀 Starting Backup Process...");
            let result = backup::run_backup_flow(&app_config, &services.backups)
                .await
                .context("Backup process failed")?;
            print_json(&result)?;
            Ok(result.success)
        }
        "2" | "restore" => {
            println!("🔄 Starting Restore Process...");
            let backup_id = args.get(2).map(String::as_str);
            let result = restore::run_restore_flow(&app_config, &services.restores, backup_id)
                .await
                .context("Restore process failed")?;
            print_json(&result)?;
            Ok(result.success)
        }
        "3" | "test" => {
            println!("🔌 Testing Database Connection...");
            let command = load_test_connection_command_from_json(&app_config.raw_json_config, |key| {
                env::var(key).ok()
            })
            .context("Failed to load connection test configuration from JSON")?;
            let result = services.tester.execute(command).await;
            print_json(&result)?;
            Ok(result.success)
        }
        "4" | "list" => {
            let query = ListBackupsQuery {
                database_name: args.get(2).filter(|a| !a.starts_with("--")).cloned(),
                include_expired: args.iter().any(|a| a == "--all"),
                ..Default::default()
            };
            let records = services
                .catalog
                .list(&query)
                .await
                .context("Failed to list backups")?;
            if records.is_empty() {
                println!("No backups found.");
            }
            for record in &records {
                println!(
                    "{}  {:<8} {:<20} {:<11} {}  {}",
                    record.id,
                    record.database_type,
                    record.database_name,
                    record.status.to_string(),
                    record.created_at.format("%Y-%m-%d %H:%M:%S"),
                    record
                        .size_bytes
                        .map(|s| format!("{s} bytes"))
                        .unwrap_or_else(|| "-".to_string()),
                );
            }
            Ok(true)
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (backup), '2' (restore), '3' (test) or '4' (list).");
            anyhow::bail!("Invalid operation choice");
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render result")?;
    println!("{rendered}");
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    use std::io::{Write, stdin, stdout};

    println!("Select an operation:");
    println!("1. Take Backup (or type 'backup')");
    println!("2. Restore Backup (or type 'restore')");
    println!("3. Test Connection (or type 'test')");
    println!("4. List Backups (or type 'list')");
    print!("Enter your choice: ");
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin()
        .read_line(&mut input)
        .context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
