//! Configuration loading for the patchcast server.
//!
//! Configuration lives in `patchcast.yaml` in the working directory, or at
//! the path named by `PATCHCAST_CONFIG`. Every field has a default, so a
//! missing file or a partial one is fine.
//!
//! ```yaml
//! server:
//!   host: "0.0.0.0"
//!   port: 3000
//! broadcast:
//!   topic: "todos"
//!   sink_capacity: 64
//! logging:
//!   level: "info"
//! ```

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::server::ServerConfig;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_ENV: &str = "PATCHCAST_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "patchcast.yaml";

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// An environment override held an unusable value.
    #[error("invalid {name}: {message}")]
    Env {
        /// The offending variable.
        name: &'static str,
        /// Why the value was rejected.
        message: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level server configuration, mirroring `patchcast.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PatchcastConfig {
    /// Listener address.
    #[serde(default)]
    pub server: ServerConfig,

    /// Broadcaster settings.
    #[serde(default)]
    pub broadcast: BroadcastConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl PatchcastConfig {
    /// Load from [`CONFIG_PATH_ENV`] or [`DEFAULT_CONFIG_PATH`], falling back
    /// to defaults when the file does not exist, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but cannot be read or
    /// parsed, or an override is malformed.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if it is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Override the listener address from `PATCHCAST_HOST` and
    /// `PATCHCAST_PORT`, looked up through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Env`] if `PATCHCAST_PORT` is not a port number.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("PATCHCAST_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("PATCHCAST_PORT") {
            self.server.port = port.parse().map_err(|e| ConfigError::Env {
                name: "PATCHCAST_PORT",
                message: format!("{e}"),
            })?;
        }
        Ok(())
    }
}

/// Broadcaster settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BroadcastConfig {
    /// Topic name used in logs.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Frames buffered per subscriber before it is dropped as too slow.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            topic: default_topic(),
            sink_capacity: default_sink_capacity(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_topic() -> String {
    "todos".to_owned()
}

const fn default_sink_capacity() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_owned()
}
