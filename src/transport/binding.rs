//! Resolved peer addresses

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    #[default]
    Direct,
    Relayed,
}

impl TransportMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportMode::Direct => "direct",
            TransportMode::Relayed => "relayed",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(TransportMode::Direct),
            "relayed" | "relay" => Ok(TransportMode::Relayed),
            _ => anyhow::bail!("Unknown transport mode: {}", s),
        }
    }
}

/// Where to send a peer's messages. Bound once per session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportBinding {
    pub peer_id: String,
    pub mode: TransportMode,
    /// Peer address (direct) or relay base URL (relayed)
    pub endpoint: String,
    /// Routing token the relay forwards by
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl TransportBinding {
    pub fn direct(peer_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            peer_id: peer_id.into(),
            mode: TransportMode::Direct,
            endpoint: address.into(),
            token: None,
        }
    }

    pub fn relayed(
        peer_id: impl Into<String>,
        relay_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            peer_id: peer_id.into(),
            mode: TransportMode::Relayed,
            endpoint: relay_url.into(),
            token: Some(token.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!(TransportMode::from_str("direct").unwrap(), TransportMode::Direct);
        assert_eq!(TransportMode::from_str("relay").unwrap(), TransportMode::Relayed);
        assert!(TransportMode::from_str("carrier-pigeon").is_err());
    }

    #[test]
    fn test_direct_binding_has_no_token() {
        let binding = TransportBinding::direct("subject", "http://127.0.0.1:9000");
        let json = serde_json::to_value(&binding).unwrap();
        assert_eq!(json["mode"], "direct");
        assert!(json.get("token").is_none());
    }
}
