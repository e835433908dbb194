//! YAML configuration: transport mode, session limits, relay and peers

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::SessionSettings;
use crate::transport::{SetupPolicy, TransportMode};

/// Assessor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Transport used when the command line does not pick one
    #[serde(default)]
    pub mode: TransportMode,

    /// Turn limits
    #[serde(default)]
    pub session: SessionSettings,

    /// Relay readiness polling
    #[serde(default)]
    pub setup: SetupPolicy,

    /// Relay settings, required for relayed mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayConfig>,

    /// Known subject peers
    #[serde(default)]
    pub peers: HashMap<String, PeerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub base_url: String,
}

/// Subject peer configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    /// Address the peer advertises, e.g. `http://127.0.0.1:9101`
    pub address: String,
}

impl Config {
    /// Read the config, writing a default one first if none exists.
    ///
    /// Lookup order: `$ASSESSOR_CONFIG`, then `path`, then
    /// `~/.assessor/config.yml`.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let file = Self::resolve_path(path)?;

        if !file.exists() {
            info!("No config at {:?}, writing defaults", file);
            let defaults = Config::default();
            defaults.save(path)?;
            return Ok(defaults);
        }

        let raw = fs::read_to_string(&file)
            .with_context(|| format!("Failed to read config {:?}", file))?;
        let mut config: Config = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config {:?}", file))?;
        config.normalize();
        config.validate()?;

        debug!("Config loaded from {:?} (mode {})", file, config.mode.as_str());
        Ok(config)
    }

    /// Write the config as YAML, creating parent directories as needed
    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let file = Self::resolve_path(path)?;
        if let Some(dir) = file.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {:?}", dir))?;
        }

        let yaml = serde_yaml::to_string(self)?;
        fs::write(&file, yaml).with_context(|| format!("Failed to write config {:?}", file))?;
        info!("Config written to {:?}", file);
        Ok(())
    }

    fn resolve_path(path: Option<&str>) -> Result<PathBuf> {
        if let Ok(from_env) = std::env::var("ASSESSOR_CONFIG") {
            return Ok(PathBuf::from(from_env));
        }
        match path {
            Some(explicit) => Ok(PathBuf::from(explicit)),
            None => dirs::home_dir()
                .map(|home| home.join(".assessor").join("config.yml"))
                .context("No home directory to keep the config in"),
        }
    }

    fn normalize(&mut self) {
        if let Some(relay) = self.relay.as_mut() {
            relay.base_url = relay.base_url.trim_end_matches('/').to_string();
        }
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.session.max_turns == 0 {
            anyhow::bail!("session.max_turns must be at least 1");
        }
        if self.session.turn_timeout_ms == 0 {
            anyhow::bail!("session.turn_timeout_ms must be positive");
        }
        if self.mode == TransportMode::Relayed && self.relay.is_none() {
            anyhow::bail!("mode is relayed but no relay.base_url is configured");
        }
        Ok(())
    }

    /// Register a subject peer reachable at `address` in direct mode
    pub fn add_peer(&mut self, peer_id: &str, address: &str) {
        self.peers.insert(
            peer_id.to_string(),
            PeerConfig {
                address: address.to_string(),
            },
        );
    }

    pub fn get_peer(&self, peer_id: &str) -> Option<&PeerConfig> {
        self.peers.get(peer_id)
    }

    /// peer id -> advertised address, as the direct transport wants it
    pub fn peer_addresses(&self) -> HashMap<String, String> {
        self.peers
            .iter()
            .map(|(name, peer)| (name.clone(), peer.address.clone()))
            .collect()
    }
}
