use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the conversion orchestration core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Path to the ffmpeg binary used for encoding
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary used for the duration probe
    pub ffprobe_bin: PathBuf,
    /// Path to exiftool for the metadata copy step (None disables it)
    pub exiftool_bin: Option<PathBuf>,
    /// Number of workers; the queue holds twice as many pending jobs
    pub worker_count: usize,
    /// Hard timeout for the duration probe
    pub probe_timeout_secs: u64,
    /// Percentage added per tick when the source duration is unknown
    pub heuristic_step: f64,
    /// Minimum spacing between heuristic ticks
    pub heuristic_interval_ms: u64,
    /// Ceiling for heuristic progress until the encoder reports the end
    pub heuristic_ceiling: f64,
    /// Age after which finished status records may be evicted
    pub finished_retention_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ConverterConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            exiftool_bin: Some(PathBuf::from("exiftool")),
            worker_count: 2,
            probe_timeout_secs: 15,
            heuristic_step: 0.5,
            heuristic_interval_ms: 500,
            heuristic_ceiling: 99.0,
            finished_retention_secs: 3600,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Worker count with a floor of one
    pub fn effective_workers(&self) -> usize {
        self.worker_count.max(1)
    }
}
