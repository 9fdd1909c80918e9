//! Layered configuration for the parking binaries.
//!
//! Precedence, later layers win:
//! 1. Built-in defaults
//! 2. TOML file (`--config PATH`, else `./parking.toml`, else
//!    `<config dir>/parking/config.toml`)
//! 3. `PARKING_*` environment variables
//!
//! Command-line flags are applied on top by the binaries.
//!
//! ```toml
//! [broker]
//! host = "mqtt.local"
//! port = 1883
//! keepalive_secs = 30
//!
//! [broker.reconnect]
//! initial_delay_ms = 500
//! max_delay_ms = 30000
//!
//! [[catalog]]
//! category = "car"
//! floors = [{ floor = "floor1", slots = ["15", "16"] }]
//! ```

use std::env;
use std::path::{Path, PathBuf};

use parking_broker::{ConnectOptions, Credentials};
use parking_core::{CatalogError, CategoryLayout, SlotCatalog};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "PARKING";
const LOCAL_FILE: &str = "parking.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for ${var}: '{value}' (expected: {expected})")]
    InvalidEnvValue {
        var: String,
        value: String,
        expected: String,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid catalog: {0}")]
    Catalog(#[from] CatalogError),
}

/// Merged configuration shared by both binaries.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParkingConfig {
    #[serde(default)]
    pub broker: ConnectOptions,

    /// Slot layout. The built-in garage when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog: Option<Vec<CategoryLayout>>,
}

impl ParkingConfig {
    pub fn slot_catalog(&self) -> Result<SlotCatalog, ConfigError> {
        match &self.catalog {
            Some(layout) => Ok(SlotCatalog::new(layout.clone())?),
            None => Ok(SlotCatalog::standard()),
        }
    }

    /// Apply `--host` / `--port` style overrides.
    pub fn override_endpoint(&mut self, host: Option<String>, port: Option<u16>) {
        if let Some(host) = host {
            self.broker.host = host;
        }
        if let Some(port) = port {
            self.broker.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "broker.host",
                reason: "must not be empty".to_string(),
            });
        }
        if self.broker.port == 0 {
            return Err(ConfigError::Invalid {
                field: "broker.port",
                reason: "must be between 1 and 65535".to_string(),
            });
        }
        if self.broker.reconnect.max_delay_ms < self.broker.reconnect.initial_delay_ms {
            return Err(ConfigError::Invalid {
                field: "broker.reconnect",
                reason: "max_delay_ms is below initial_delay_ms".to_string(),
            });
        }
        self.slot_catalog()?;
        Ok(())
    }
}

pub struct ConfigLoader {
    file: Option<PathBuf>,
    env_prefix: String,
    skip_file: bool,
    skip_env: bool,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            env_prefix: DEFAULT_ENV_PREFIX.to_string(),
            skip_file: false,
            skip_env: false,
        }
    }

    /// Read this file instead of searching the default locations. A missing
    /// explicit file is an error.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn skip_file_layer(mut self) -> Self {
        self.skip_file = true;
        self
    }

    pub fn skip_env_layer(mut self) -> Self {
        self.skip_env = true;
        self
    }

    pub fn load(self) -> Result<ParkingConfig, ConfigError> {
        let mut config = ParkingConfig::default();

        if !self.skip_file {
            if let Some(path) = &self.file {
                config = Self::load_from_file(path)?;
            } else if let Some(path) = Self::default_files().into_iter().find(|p| p.is_file()) {
                config = Self::load_from_file(&path)?;
            } else {
                tracing::debug!("no config file found, using defaults");
            }
        }

        if !self.skip_env {
            Self::apply_env_overrides(&mut config, &self.env_prefix)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Search order when no file is given explicitly.
    pub fn default_files() -> Vec<PathBuf> {
        let mut files = vec![PathBuf::from(LOCAL_FILE)];
        if let Some(dir) = dirs::config_dir() {
            files.push(dir.join("parking").join("config.toml"));
        }
        files
    }

    pub fn load_from_file(path: &Path) -> Result<ParkingConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Apply `{prefix}_BROKER_*` overrides. Blank values are ignored.
    pub fn apply_env_overrides(config: &mut ParkingConfig, prefix: &str) -> Result<(), ConfigError> {
        let broker = &mut config.broker;

        if let Some(host) = env_value(prefix, "BROKER_HOST") {
            broker.host = host;
        }
        if let Some(port) = env_parsed::<u16>(prefix, "BROKER_PORT", "a port number 1-65535")? {
            broker.port = port;
        }
        if let Some(client_id) = env_value(prefix, "BROKER_CLIENT_ID") {
            broker.client_id = Some(client_id);
        }
        if let Some(secs) =
            env_parsed::<u64>(prefix, "BROKER_KEEPALIVE_SECS", "a number of seconds")?
        {
            broker.keepalive_secs = secs;
        }

        let username = env_value(prefix, "BROKER_USERNAME");
        let password = env_value(prefix, "BROKER_PASSWORD");
        match (username, password) {
            (Some(username), password) => {
                let password = password
                    .or_else(|| broker.credentials.take().map(|c| c.password))
                    .unwrap_or_default();
                broker.credentials = Some(Credentials { username, password });
            }
            (None, Some(password)) => match broker.credentials.as_mut() {
                Some(credentials) => credentials.password = password,
                None => {
                    return Err(ConfigError::Invalid {
                        field: "broker.credentials",
                        reason: format!("{prefix}_BROKER_PASSWORD set without a username"),
                    });
                }
            },
            (None, None) => {}
        }

        Ok(())
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

fn env_value(prefix: &str, key: &str) -> Option<String> {
    let var = format!("{prefix}_{key}");
    let value = env::var(&var).ok()?;
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    tracing::debug!(var = %var, "applying env override");
    Some(value.to_string())
}

fn env_parsed<T: std::str::FromStr>(
    prefix: &str,
    key: &str,
    expected: &str,
) -> Result<Option<T>, ConfigError> {
    let Some(value) = env_value(prefix, key) else {
        return Ok(None);
    };
    value
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidEnvValue {
            var: format!("{prefix}_{key}"),
            value,
            expected: expected.to_string(),
        })
}
