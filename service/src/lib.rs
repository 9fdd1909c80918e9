//! `parking-service`: configuration and terminal front ends for the
//! parking manager and status display.

pub mod board;
pub mod cli;
pub mod config;
pub mod console;
pub mod logging;

pub use config::{ConfigError, ConfigLoader, ParkingConfig};
pub use logging::init_logging;
