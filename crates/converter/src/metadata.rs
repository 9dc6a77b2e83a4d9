use std::path::Path;
use std::process::Stdio;
use anyhow::{Context, Result};
use log::debug;
use tokio::process::Command;

use crate::config::ConverterConfig;

/// Copy container metadata from `source` onto a finished `destination`.
///
/// Returns Ok(false) when no metadata tool is configured. Callers treat any
/// error as non-fatal.
pub async fn copy_metadata(cfg: &ConverterConfig, source: &Path, destination: &Path) -> Result<bool> {
    let Some(exiftool) = cfg.exiftool_bin.as_ref() else {
        return Ok(false);
    };

    debug!("exiftool metadata copy {} -> {}", source.display(), destination.display());

    let output = Command::new(exiftool)
        .arg("-overwrite_original")
        .arg("-TagsFromFile")
        .arg(source)
        .arg("-all:all")
        .arg(destination)
        .stdin(Stdio::null())
        .output()
        .await
        .with_context(|| format!("Failed to execute exiftool at: {}", exiftool.display()))?;

    if !output.status.success() {
        anyhow::bail!(
            "exiftool failed (exit code {}): {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(true)
}
