// Configuration management for the webcam recorder

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::caps::ParseOptions;
use crate::devices::DeviceBackend;

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory where recordings go when no output path is given
    pub storage_path: PathBuf,

    /// How capture devices are discovered
    pub device_backend: DeviceBackend,

    /// Only offer modes with this pixel format (None = any)
    pub preferred_format: Option<String>,

    /// Only offer modes faster than this many frames per second
    pub min_framerate: f64,

    /// Encode bitrate in bits/second; overrides the height-based table
    pub bitrate_override: Option<u32>,

    /// Encoder bitrate tolerance in bits
    pub bitrate_tolerance: u32,

    /// How many times each device is probed during enumeration
    pub probe_passes: u32,

    /// Fail on malformed caps fields instead of skipping them
    pub strict_caps: bool,

    /// Total time allowed for the end-of-stream handshake when stopping a recording
    pub teardown_timeout_ms: u64,

    /// Interval at which the teardown wait re-checks pipeline state
    pub teardown_poll_ms: u64,

    /// How often the idle reconfiguration worker drains the pipeline bus
    pub bus_poll_interval_ms: u64,

    /// Bump the numeric suffix of the output file name for each new recording
    pub auto_increment: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: get_default_storage_path(),
            device_backend: DeviceBackend::default(),
            preferred_format: Some("I420".to_string()),
            min_framerate: 10.0,
            bitrate_override: None,
            bitrate_tolerance: crate::encoding::encoder::DEFAULT_BITRATE_TOLERANCE,
            probe_passes: 2,
            strict_caps: cfg!(debug_assertions),
            teardown_timeout_ms: 2000,
            teardown_poll_ms: 200,
            bus_poll_interval_ms: 250,
            auto_increment: false,
        }
    }
}

impl Config {
    /// Load config from `path` (or the default location) or return default
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => return config,
                    Err(e) => {
                        log::warn!("Failed to parse config: {}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to read config file: {}", e);
                }
            }
        }

        Self::default()
    }

    /// Save config to `path` (or the default location)
    pub fn save(&self, path: Option<&Path>) -> anyhow::Result<()> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(get_config_path);

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, contents)?;

        Ok(())
    }

    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            strict: self.strict_caps,
        }
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }

    pub fn teardown_poll(&self) -> Duration {
        Duration::from_millis(self.teardown_poll_ms.max(1))
    }

    pub fn bus_poll_interval(&self) -> Duration {
        Duration::from_millis(self.bus_poll_interval_ms.max(1))
    }
}

/// Get the default storage path for recordings
fn get_default_storage_path() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("WebcamRecorder")
}

/// Get the config file path
pub fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("webcam-recorder")
        .join("config.toml")
}
