use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use anyhow::{anyhow, Context, Result};
use log::debug;
use tokio::process::Command;
use tokio::time::timeout;

use crate::config::ConverterConfig;

/// Probe the play length of `file_path` in seconds.
///
/// The probe is killed if it runs longer than `probe_timeout_secs`.
pub async fn probe_duration(cfg: &ConverterConfig, file_path: &Path) -> Result<f64> {
    if !file_path.exists() {
        anyhow::bail!("File does not exist: {}", file_path.display());
    }

    let mut cmd = Command::new(&cfg.ffprobe_bin);
    cmd.arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(file_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("ffprobe duration query for {}", file_path.display());

    let limit = Duration::from_secs(cfg.probe_timeout_secs);
    // Dropping the timed-out future drops the child, which kills it
    let output = timeout(limit, cmd.output())
        .await
        .map_err(|_| anyhow!("ffprobe timed out after {} seconds", cfg.probe_timeout_secs))?
        .with_context(|| format!(
            "Failed to execute ffprobe at {} for: {}",
            cfg.ffprobe_bin.display(),
            file_path.display()
        ))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!(
            "ffprobe failed (exit code {}) for {}: {}",
            output.status.code().unwrap_or(-1),
            file_path.display(),
            stderr.trim()
        );
    }

    let stdout = String::from_utf8(output.stdout).context("ffprobe output is not valid UTF-8")?;
    parse_duration(&stdout)
        .with_context(|| format!("Failed to parse ffprobe duration for: {}", file_path.display()))
}

/// Parse the single seconds value printed by the duration query
pub fn parse_duration(stdout: &str) -> Result<f64> {
    let value = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| anyhow!("empty duration output"))?;
    let secs: f64 = value
        .parse()
        .with_context(|| format!("not a number: {:?}", value))?;
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("duration out of range: {}", secs);
    }
    Ok(secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("60.000000\n").unwrap(), 60.0);
        assert_eq!(parse_duration("\n  12.5  \n").unwrap(), 12.5);
        assert!(parse_duration("N/A\n").is_err());
        assert!(parse_duration("").is_err());
        assert!(parse_duration("0.0").is_err());
        assert!(parse_duration("-3").is_err());
    }

    #[tokio::test]
    async fn test_probe_missing_file() {
        let cfg = ConverterConfig::default();
        let err = probe_duration(&cfg, Path::new("/definitely/not/here.mov")).await.unwrap_err();
        assert!(format!("{}", err).contains("does not exist"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_probe_timeout_kills_probe() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let probe = dir.path().join("slow-probe");
        std::fs::write(&probe, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&probe, std::fs::Permissions::from_mode(0o755)).unwrap();
        let media = dir.path().join("in.mov");
        std::fs::write(&media, b"data").unwrap();

        let cfg = ConverterConfig { ffprobe_bin: probe, probe_timeout_secs: 1, ..Default::default() };
        let started = std::time::Instant::now();
        let err = probe_duration(&cfg, &media).await.unwrap_err();
        assert!(format!("{}", err).contains("timed out"));
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
