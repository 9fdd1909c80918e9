//! Flags shared by both binaries.

use std::path::PathBuf;

use clap::Args;

use crate::config::{ConfigError, ConfigLoader, ParkingConfig};

#[derive(Debug, Clone, Default, Args)]
pub struct BrokerArgs {
    /// Config file (default: ./parking.toml, then the user config dir).
    #[arg(long = "config", short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Broker host, overrides config and PARKING_BROKER_HOST.
    #[arg(long = "host", value_name = "HOST")]
    pub host: Option<String>,

    /// Broker port, overrides config and PARKING_BROKER_PORT.
    #[arg(long = "port", value_name = "PORT")]
    pub port: Option<u16>,
}

impl BrokerArgs {
    /// Load the layered config and apply these flags on top.
    pub fn load_config(&self) -> Result<ParkingConfig, ConfigError> {
        let mut loader = ConfigLoader::new();
        if let Some(path) = &self.config {
            loader = loader.with_file(path);
        }
        let mut config = loader.load()?;
        config.override_endpoint(self.host.clone(), self.port);
        config.validate()?;
        Ok(config)
    }
}
