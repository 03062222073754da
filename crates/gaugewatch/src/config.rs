//! Configuration loading utilities.

use crate::error::ConfigError;
use crate::media::{SimulatedDevice, StreamProfile};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Display positions in the grid when not configured.
pub const DEFAULT_MAX_FEEDS: usize = 10;

/// Interval between successive device admissions when not configured.
pub const DEFAULT_STAGGER_DELAY_MS: u64 = 1000;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub grid: GridConfig,
    pub recognition: RecognitionConfig,
    pub export: ExportConfig,
    pub simulation: SimulationConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.grid.validate()?;
        if self.recognition.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "recognition.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Camera grid behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Number of display positions; extra devices are ignored
    pub max_feeds: usize,
    /// Delay between successive device admissions in milliseconds
    pub stagger_delay_ms: u64,
    /// Ceiling requested for every feed
    pub profile: StreamProfile,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            max_feeds: DEFAULT_MAX_FEEDS,
            stagger_delay_ms: DEFAULT_STAGGER_DELAY_MS,
            profile: StreamProfile::default(),
        }
    }
}

impl GridConfig {
    pub fn stagger_delay(&self) -> Duration {
        Duration::from_millis(self.stagger_delay_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_feeds == 0 {
            return Err(ConfigError::Validation(
                "grid.max_feeds must be at least 1".to_string(),
            ));
        }
        let p = &self.profile;
        if p.width == 0 || p.height == 0 || p.frame_rate == 0 {
            return Err(ConfigError::Validation(format!(
                "grid.profile must be non-zero, got {}x{}@{}",
                p.width, p.height, p.frame_rate
            )));
        }
        if !p.within_ceiling() {
            let max = StreamProfile::CEILING;
            return Err(ConfigError::Validation(format!(
                "grid.profile {}x{}@{} exceeds the {}x{}@{} feed ceiling",
                p.width, p.height, p.frame_rate, max.width, max.height, max.frame_rate
            )));
        }
        Ok(())
    }
}

/// Recognition collaborator settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecognitionConfig {
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_secs: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            base_url: crate::recognition::DEFAULT_BASE_URL.to_string(),
            model: crate::recognition::DEFAULT_MODEL.to_string(),
            api_key_env: crate::recognition::DEFAULT_API_KEY_ENV.to_string(),
            timeout_secs: 30,
        }
    }
}

/// Where exported stills land
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub directory: Option<PathBuf>,
}

/// Scripted devices for the built-in simulated platform
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub devices: Vec<SimulatedDevice>,
    pub acquire_latency_ms: u64,
    pub deny_permission: bool,
    pub unsupported: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            devices: vec![
                SimulatedDevice::camera("usb-0", "Inlet Pressure"),
                SimulatedDevice::camera("usb-1", "Outlet Pressure"),
                SimulatedDevice::camera("usb-2", ""),
            ],
            acquire_latency_ms: 150,
            deny_permission: false,
            unsupported: false,
        }
    }
}

/// Load configuration from a YAML file.
///
/// # Example
///
/// ```rust,ignore
/// let config: AppConfig = load_config("gaugewatch.yaml")?;
/// ```
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("Failed to read {}: {}", path.display(), e)))?;

    serde_yaml::from_str(&contents)
        .map_err(|e| ConfigError::Parse(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load configuration from a file, or use default if file doesn't exist.
pub fn load_config_or_default<T: DeserializeOwned + Default>(
    path: impl AsRef<Path>,
) -> Result<T, ConfigError> {
    let path = path.as_ref();

    if !path.exists() {
        log::info!("Config file not found, using defaults: {}", path.display());
        return Ok(T::default());
    }

    load_config(path)
}

/// Parse configuration from a YAML string.
///
/// Useful for testing or inline configuration.
pub fn parse_config<T: DeserializeOwned>(yaml: &str) -> Result<T, ConfigError> {
    Ok(serde_yaml::from_str(yaml)?)
}
