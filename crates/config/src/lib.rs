#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Configuration management for strand
//!
//! This crate handles loading and merging configuration from:
//! - Default values (hard-coded)
//! - Configuration file (~/.config/strand/config.toml)
//! - Environment variables

pub mod constants;
pub mod sections;

pub use crate::sections::{LoggingConfig, PoolConfig, PoolOverrides, TracingConfig};
pub use constants as fixed_names;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use strand_errors::{ConfigError, Error};
use strand_types::{LogFormat, ThreadPoolKey, ThreadPoolSizing};
use tokio::fs;
use tracing::debug;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pools: BTreeMap<String, PoolOverrides>,

    #[serde(default)]
    pub tracing: TracingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Get the default config file path
    ///
    /// # Errors
    ///
    /// Returns an error if the system config directory cannot be determined.
    pub fn default_path() -> Result<PathBuf, Error> {
        let config_dir = dirs::config_dir().ok_or_else(|| ConfigError::NotFound {
            path: "config directory".to_string(),
        })?;
        Ok(config_dir
            .join(constants::APP_DIR)
            .join(constants::CONFIG_FILE))
    }

    /// Directory debug log files are written to
    #[must_use]
    pub fn log_dir() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(constants::APP_DIR)
            .join(constants::LOGS_DIR)
    }

    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NotFound` if the file does not exist, an I/O
    /// error carrying the path if it exists but cannot be read, or a parse
    /// error for invalid TOML.
    pub async fn load_from_file(path: &Path) -> Result<Self, Error> {
        let contents = fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                Error::from(ConfigError::NotFound {
                    path: path.display().to_string(),
                })
            } else {
                Error::io_with_path(&e, path)
            }
        })?;

        let config = Self::parse(&contents)?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Parse configuration from a TOML document
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid TOML or a field has the
    /// wrong type.
    pub fn parse(contents: &str) -> Result<Self, Error> {
        toml::from_str(contents)
            .map_err(|e| ConfigError::ParseError {
                message: e.to_string(),
            })
            .map_err(Into::into)
    }

    /// Load configuration with fallback to defaults
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be read
    /// or contains invalid TOML syntax.
    pub async fn load() -> Result<Self, Error> {
        let config_path = Self::default_path()?;

        if config_path.exists() {
            Self::load_from_file(&config_path).await
        } else {
            debug!(path = %config_path.display(), "no configuration file, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration from an optional path or use default
    ///
    /// If path is provided, loads from that file.
    /// If path is None, uses the default loading behavior.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be read or parsed
    pub async fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        match path {
            Some(config_path) => Self::load_from_file(config_path).await,
            None => Self::load().await,
        }
    }

    /// Merge with environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if environment variables contain invalid values
    /// that cannot be parsed into the expected types.
    pub fn merge_env(&mut self) -> Result<(), Error> {
        // STRAND_TRACING_ENABLED
        if let Ok(enabled) = std::env::var("STRAND_TRACING_ENABLED") {
            self.tracing.enabled = match enabled.as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "STRAND_TRACING_ENABLED".to_string(),
                        value: enabled,
                    }
                    .into())
                }
            };
        }

        // STRAND_POOL_CORE_SIZE
        if let Some(size) = env_number("STRAND_POOL_CORE_SIZE")? {
            self.pool.core_size = size;
        }

        // STRAND_POOL_MAXIMUM_SIZE
        if let Some(size) = env_number("STRAND_POOL_MAXIMUM_SIZE")? {
            self.pool.maximum_size = size;
        }

        // STRAND_POOL_MAX_QUEUE_SIZE
        if let Some(size) = env_number("STRAND_POOL_MAX_QUEUE_SIZE")? {
            self.pool.max_queue_size = size;
        }

        // STRAND_LOG_FORMAT
        if let Ok(format) = std::env::var("STRAND_LOG_FORMAT") {
            self.logging.format = match format.as_str() {
                "plain" => LogFormat::Plain,
                "json" => LogFormat::Json,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: "STRAND_LOG_FORMAT".to_string(),
                        value: format,
                    }
                    .into())
                }
            };
        }

        Ok(())
    }

    /// Effective pool settings for a key: `[pool]` merged with `[pools.<key>]`
    #[must_use]
    pub fn pool_config(&self, key: &ThreadPoolKey) -> PoolConfig {
        match self.pools.get(key.name()) {
            Some(overrides) => self.pool.overridden_by(overrides),
            None => self.pool.clone(),
        }
    }

    /// Effective sizing for a key
    #[must_use]
    pub fn sizing_for(&self, key: &ThreadPoolKey) -> ThreadPoolSizing {
        self.pool_config(key).sizing()
    }

    /// Render the configuration as TOML
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, Error> {
        toml::to_string_pretty(self).map_err(Into::into)
    }
}

fn env_number(var: &str) -> Result<Option<usize>, Error> {
    match std::env::var(var) {
        Ok(value) => usize::from_str(value.trim())
            .map(Some)
            .map_err(|_| {
                ConfigError::InvalidValue {
                    field: var.to_string(),
                    value,
                }
                .into()
            }),
        Err(_) => Ok(None),
    }
}
