use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Lowest and highest overlay opacity accepted, in percent
pub const MIN_OPACITY_PERCENT: u8 = 1;
pub const MAX_OPACITY_PERCENT: u8 = 15;

/// How the batch driver hands jobs to the concurrency gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPolicy {
    /// Each job finishes before the next main asset is dispatched
    #[default]
    Ordered,
    /// Jobs are dispatched as pairings resolve; the gate bounds live encodes
    Overlapped,
}

/// Configuration for the overlay batch encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    /// Path to the ffmpeg binary used for encoding and capability tests
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary used for metadata lookups
    pub ffprobe_bin: PathBuf,
    /// Overlay alpha in percent (1-15)
    pub opacity_percent: u8,
    /// Maximum number of encoder processes alive at once
    pub max_concurrency: usize,
    /// Try NVENC / AMF before falling back to libx264
    pub prefer_hardware: bool,
    /// Explicit output directory; `<main dir>/output` is used when unset or missing
    pub output_dir: Option<PathBuf>,
    /// Dispatch discipline of the batch driver
    pub dispatch: DispatchPolicy,
    /// Seconds between SIGTERM and a forced kill when stopping an encode
    pub kill_grace_secs: u64,
    /// Delay after a clean encoder exit before the output is verified
    pub settle_delay_ms: u64,
    /// Interval of the per-job monitor tick
    pub monitor_tick_ms: u64,
    /// Fixed seed for overlay selection (random when unset)
    pub pair_seed: Option<u64>,
    /// Directory for session log files
    pub log_dir: PathBuf,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

/// The subset of settings the operator may change between batches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSettings {
    pub opacity_percent: u8,
    pub max_concurrency: usize,
    pub prefer_hardware: bool,
    pub output_dir: Option<PathBuf>,
}

impl BatchSettings {
    /// Check value ranges, returning a human readable reason on failure
    pub fn validate(&self) -> std::result::Result<(), String> {
        if !(MIN_OPACITY_PERCENT..=MAX_OPACITY_PERCENT).contains(&self.opacity_percent) {
            return Err(format!(
                "opacity {}% outside {}-{}%",
                self.opacity_percent, MIN_OPACITY_PERCENT, MAX_OPACITY_PERCENT
            ));
        }
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be at least 1".to_string());
        }
        Ok(())
    }

    /// Overlay alpha as a 0.0-1.0 factor
    pub fn alpha(&self) -> f64 {
        f64::from(self.opacity_percent) / 100.0
    }
}

impl BlendConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            opacity_percent: 2,
            max_concurrency: 3,
            prefer_hardware: true,
            output_dir: None,
            dispatch: DispatchPolicy::Ordered,
            kill_grace_secs: 5,
            settle_delay_ms: 1000,
            monitor_tick_ms: 500,
            pair_seed: None,
            log_dir: PathBuf::from("logs"),
        }
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

    /// Reject configurations the scheduler could not run with
    pub fn validate(&self) -> Result<()> {
        if let Err(reason) = self.batch_settings().validate() {
            bail!("Invalid configuration: {}", reason);
        }
        if self.monitor_tick_ms == 0 {
            bail!("Invalid configuration: monitor_tick_ms must be greater than 0");
        }
        Ok(())
    }

    /// Current operator-facing settings
    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            opacity_percent: self.opacity_percent,
            max_concurrency: self.max_concurrency,
            prefer_hardware: self.prefer_hardware,
            output_dir: self.output_dir.clone(),
        }
    }

    /// Overwrite the operator-facing settings
    pub fn apply_settings(&mut self, settings: BatchSettings) {
        self.opacity_percent = settings.opacity_percent;
        self.max_concurrency = settings.max_concurrency;
        self.prefer_hardware = settings.prefer_hardware;
        self.output_dir = settings.output_dir;
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn monitor_tick(&self) -> Duration {
        Duration::from_millis(self.monitor_tick_ms)
    }
}
