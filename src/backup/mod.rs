// dbbackup/src/backup/mod.rs
pub mod logic;

use anyhow::{Context, Result};

use crate::config::{AppConfig, load_backup_command_from_json};
use crate::model::BackupResult;

pub use logic::{BackupOrchestrator, BackupSettings, artifact_filename};

/// Entry point for the CLI: runs the backup described by the `backup` section
/// of config.json.
pub async fn run_backup_flow(
    app_config: &AppConfig,
    orchestrator: &BackupOrchestrator,
) -> Result<BackupResult> {
    let command = load_backup_command_from_json(&app_config.raw_json_config, |key| {
        std::env::var(key).ok()
    })
    .context("Failed to load backup configuration from JSON")?;
    Ok(orchestrator.execute(command).await)
}
