use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Resolve and create the directory that receives `burnlink.log`.
///
/// Priority:
/// 1. An explicitly configured directory (`--log-dir` / `BURNLINK_LOG_DIR`)
/// 2. Platform-specific app data dir (`~/.local/share/burnlink/logs`, etc.)
pub fn log_dir(configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = configured {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("create log dir: {}", dir.display()))?;
        return Ok(dir.to_owned());
    }

    let dirs = ProjectDirs::from("", "", "burnlink")
        .context("could not determine platform data directory")?;

    let path = dirs.data_local_dir().join("logs");
    std::fs::create_dir_all(&path).context("create platform log dir")?;
    Ok(path)
}
