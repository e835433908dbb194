//! Subject and relay protocol types

use serde::{Deserialize, Serialize};

/// Reserved action name that ends a session early
pub const FINISH_ACTION: &str = "finish";

/// A tool call proposed by the subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

impl Action {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }

    pub fn finish() -> Self {
        Self::new(FINISH_ACTION, serde_json::json!({}))
    }

    pub fn is_finish(&self) -> bool {
        self.name == FINISH_ACTION
    }
}

/// What the evaluator shows the subject after a reset, a step or a rejection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Human readable summary
    pub text: String,
    /// Structured state snapshot
    #[serde(default)]
    pub state: serde_json::Value,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reward: Option<f64>,
    /// Set on corrective messages after a rejected action
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Observation {
    pub fn new(text: impl Into<String>, state: serde_json::Value) -> Self {
        Self {
            text: text.into(),
            state,
            done: false,
            reward: None,
            error: None,
        }
    }

    pub fn terminal(mut self, reward: f64) -> Self {
        self.done = true;
        self.reward = Some(reward);
        self
    }

    /// Copy of this observation flagged with a rejection reason
    pub fn correction(&self, error: impl Into<String>) -> Self {
        let mut corrected = self.clone();
        corrected.error = Some(error.into());
        corrected
    }
}

/// Evaluator -> subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRequest {
    pub session_id: String,
    pub turn_index: u32,
    pub observation: Observation,
}

/// Subject -> evaluator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectResponse {
    pub session_id: String,
    pub turn_index: u32,
    pub action: Action,
}

/// A subject request wrapped for routing through the relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub token: String,
    pub payload: SubjectRequest,
}

/// Body of a relay registration call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPeerRequest {
    pub peer_id: String,
}

/// Relay answer to a registration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterPeerResponse {
    pub peer_id: String,
    pub token: String,
}

/// Most recent reachability check the relay holds for a peer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerStatus {
    pub peer_id: String,
    pub token: String,
    #[serde(default)]
    pub reachable: bool,
    #[serde(default)]
    pub agent_count: u32,
}

impl PeerStatus {
    /// Routable once the relay reached the peer and it hosts at least one agent
    pub fn is_ready(&self) -> bool {
        self.reachable && self.agent_count >= 1
    }
}
