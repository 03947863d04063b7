//! Framework configuration
//!
//! Configuration lives in a single TOML file. Every section has defaults, so a
//! missing file or a partial one still yields a usable configuration:
//!
//! ```toml
//! log_level = "info"
//!
//! [scheduler]
//! cycle_interval_ms = 10
//! scheduling = "fixed_sleep"   # or "deadline"
//!
//! [controller]
//! acceleration_scale = 4000.0
//! history_capacity = 5
//! press_time_mode = "refresh_all_down"   # or "newly_pressed_only"
//!
//! [controller.jerk]
//! delay_secs = 0.25
//! threshold = 0.5
//! threshold_ratio = 0.5
//!
//! [simulation]
//! devices = 1
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::controller::ControllerSettings;
use crate::framework::SchedulerSettings;

const CONFIG_DIR: &str = "moveframe";
const CONFIG_FILE: &str = "config.toml";

const MAX_CYCLE_INTERVAL_MS: u64 = 60_000;
const MAX_STATS_INTERVAL_SECS: i64 = 86_400;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Devices the binary simulates when no hardware backend is compiled in.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    pub devices: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self { devices: 1 }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FrameworkConfig {
    pub log_level: String,
    pub scheduler: SchedulerSettings,
    pub controller: ControllerSettings,
    pub simulation: SimulationConfig,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            scheduler: SchedulerSettings::default(),
            controller: ControllerSettings::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl FrameworkConfig {
    /// `<config dir>/moveframe/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads `path`, or the default location when `path` is `None`.
    ///
    /// A file that does not exist yields the defaults. A file that exists but
    /// cannot be read or parsed is an error.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path.map(Path::to_path_buf).or_else(Self::default_path) {
            Some(path) => path,
            None => {
                warn!("Could not determine config directory, using defaults");
                return Ok(Self::default());
            }
        };

        if !path.exists() {
            warn!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        debug!("Config: {:?}", config);
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, self.to_toml()?).map_err(write_err)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.history_capacity < 2 {
            return Err(ConfigError::Invalid(format!(
                "controller.history_capacity must be at least 2, got {}",
                self.controller.history_capacity
            )));
        }
        if self.controller.acceleration_scale == 0.0 {
            return Err(ConfigError::Invalid(
                "controller.acceleration_scale must not be 0".to_string(),
            ));
        }
        if self.scheduler.cycle_interval_ms > MAX_CYCLE_INTERVAL_MS {
            return Err(ConfigError::Invalid(format!(
                "scheduler.cycle_interval_ms must be at most {}, got {}",
                MAX_CYCLE_INTERVAL_MS, self.scheduler.cycle_interval_ms
            )));
        }
        if !(1..=MAX_STATS_INTERVAL_SECS).contains(&self.scheduler.stats_interval_secs) {
            return Err(ConfigError::Invalid(format!(
                "scheduler.stats_interval_secs must be within 1..={}, got {}",
                MAX_STATS_INTERVAL_SECS, self.scheduler.stats_interval_secs
            )));
        }
        let jerk = &self.controller.jerk;
        if jerk.threshold < 0.0 || jerk.threshold_ratio < 0.0 || jerk.delay_secs < 0.0 {
            return Err(ConfigError::Invalid(
                "controller.jerk values must not be negative".to_string(),
            ));
        }
        if self.log_level.parse::<tracing::Level>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "unknown log_level {:?}",
                self.log_level
            )));
        }
        Ok(())
    }
}
