//! Assessor configuration module
//! Handles loading, saving, and validating the config file

pub mod config;

pub use config::{Config, PeerConfig, RelayConfig};
