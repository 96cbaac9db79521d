// dbbackup/src/restore/mod.rs
pub mod logic;

use anyhow::{Context, Result};

use crate::config::{AppConfig, load_restore_command_from_json};
use crate::model::RestoreResult;

pub use logic::{RestoreOrchestrator, RestoreSettings};

/// Entry point for the CLI. `backup_id` overrides the id in the `restore`
/// section of config.json.
pub async fn run_restore_flow(
    app_config: &AppConfig,
    orchestrator: &RestoreOrchestrator,
    backup_id: Option<&str>,
) -> Result<RestoreResult> {
    let command = load_restore_command_from_json(&app_config.raw_json_config, backup_id, |key| {
        std::env::var(key).ok()
    })
    .context("Failed to load restore configuration from JSON")?;
    Ok(orchestrator.execute(command).await)
}
