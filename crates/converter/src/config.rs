use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::compat::{default_service_limits, ServiceLimit};
use crate::settings::BITRATE_CEILING;

/// Process configuration, loaded once at start
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Directory for intermediate engine output
    pub temp_dir: PathBuf,
    /// Default destination for batch output; asked interactively when unset
    pub output_dir: Option<PathBuf>,
    /// Quiet period after a settings change before a preview sample runs
    pub debounce_ms: u64,
    /// Bitrate reached at quality 100, in bits per second
    pub bitrate_ceiling: u64,
    /// Length of the preview sample in seconds
    pub preview_sample_secs: f64,
    /// Re-estimate automatically on every settings change
    pub live_preview: bool,
    /// Upload limits for the compatibility check
    pub services: Vec<ServiceLimit>,
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
            temp_dir: std::env::temp_dir().join("vconv"),
            output_dir: None,
            debounce_ms: 500,
            bitrate_ceiling: BITRATE_CEILING,
            preview_sample_secs: 1.0,
            live_preview: true,
            services: default_service_limits(),
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.bitrate_ceiling == 0 {
            anyhow::bail!("bitrate_ceiling must be greater than zero");
        }
        if self.preview_sample_secs.is_nan() || self.preview_sample_secs <= 0.0 {
            anyhow::bail!("preview_sample_secs must be positive, got {}", self.preview_sample_secs);
        }
        Ok(())
    }
}
