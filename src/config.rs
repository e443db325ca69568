//! Runtime configuration for Stepr.
//!
//! Loaded from YAML with a fallback chain. The `ci` section is the middle tier
//! of CI watch settings: a step's own config wins over it, and it wins over the
//! built-in defaults.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::duration::{serde_duration, serde_opt_duration};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub ci: CiDefaults,
    pub loops: LoopDefaults,
    pub storage: StorageConfig,
    pub command: CommandDefaults,
}

/// Project-level CI watch settings. Unset fields fall through to built-in defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CiDefaults {
    #[serde(with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub poll_interval: Option<Duration>,
    #[serde(with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub grace_period: Option<Duration>,
    #[serde(with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub grace_poll_interval: Option<Duration>,
    #[serde(with = "serde_opt_duration", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    /// Consecutive status-query failures tolerated before giving up
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_error_tolerance: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopDefaults {
    pub max_iterations: u32,
}

impl Default for LoopDefaults {
    fn default() -> Self {
        Self { max_iterations: 10 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for loop state, scratchpads and artifacts
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("stepr"),
        }
    }
}

impl StorageConfig {
    pub fn state_dir(&self) -> PathBuf {
        self.data_dir.join("state")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn scratchpads_dir(&self) -> PathBuf {
        self.data_dir.join("scratchpads")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandDefaults {
    #[serde(with = "serde_duration")]
    pub timeout: Duration,
    pub max_output_bytes: usize,
}

impl Default for CommandDefaults {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            max_output_bytes: 100_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            ci: CiDefaults::default(),
            loops: LoopDefaults::default(),
            storage: StorageConfig::default(),
            command: CommandDefaults::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. ./stepr.yml
    /// 3. ~/.config/stepr/stepr.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        let project_config = PathBuf::from(format!("{}.yml", project_name));
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", project_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        config.validate()?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.loops.max_iterations == 0 {
            eyre::bail!("loops.max_iterations must be > 0");
        }
        if self.ci.poll_interval.is_some_and(|d| d.is_zero()) {
            eyre::bail!("ci.poll_interval must be > 0");
        }
        if self.ci.grace_poll_interval.is_some_and(|d| d.is_zero()) {
            eyre::bail!("ci.grace_poll_interval must be > 0");
        }
        if self.command.timeout.is_zero() {
            eyre::bail!("command.timeout must be > 0");
        }
        Ok(())
    }
}
