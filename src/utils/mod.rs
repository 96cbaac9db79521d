use std::path::{Path, PathBuf};
use which::which;

use crate::errors::{AppError, Result};

/// Finds a native client tool (pg_dump, mysqldump, mongorestore, ...) in PATH.
pub fn find_executable(tool: &str) -> Result<PathBuf> {
    which(tool).map_err(|_| {
        AppError::NotFound(format!(
            "{tool} executable not found in PATH. Please ensure the database client tools are installed and in your PATH."
        ))
    })
}

/// Deletes files best-effort. Failures are logged, never returned.
/// Returns how many paths could not be removed.
pub fn remove_temp_files(paths: &[PathBuf]) -> usize {
    let mut failures = 0;
    for path in paths {
        if let Err(e) = remove_if_present(path) {
            failures += 1;
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete temporary file");
        }
    }
    failures
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Deleted temporary file");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
