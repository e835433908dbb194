//! Error taxonomies for transports, environments and sessions

use serde::{Deserialize, Serialize};

/// Errors raised while resolving or talking to a peer
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Peer {peer_id} unreachable after {attempts} poll(s)")]
    UnreachablePeer { peer_id: String, attempts: u32 },

    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Peer returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode peer response: {0}")]
    Decode(String),

    #[error("No pending request for session {0}")]
    NoPendingRequest(String),

    #[error("Cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TransportError::Decode(e.to_string())
        } else {
            TransportError::Http(e.to_string())
        }
    }
}

/// Errors raised by the environment adapter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnvironmentError {
    #[error("Invalid action: {0}")]
    InvalidAction(String),

    #[error("Environment already terminated")]
    EnvironmentTerminated,
}

/// Why a session ended in a non-successful state.
///
/// Serialized into the assessment result, so every variant carries plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionError {
    #[error("Session setup failed: {0}")]
    SessionSetup(String),

    #[error("Subject did not answer turn {turn_index} within {timeout_ms}ms")]
    SubjectTimeout { turn_index: u32, timeout_ms: u64 },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Gave up after {attempts} invalid action(s): {reason}")]
    InvalidAction { attempts: u32, reason: String },

    #[error("Turn ceiling of {0} reached")]
    MaxTurnsExceeded(u32),

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Session cancelled")]
    Cancelled,
}

impl SessionError {
    /// Whether the coordinator may retry the whole session
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::SubjectTimeout { .. })
    }
}
