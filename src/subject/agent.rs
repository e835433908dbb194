//! Subject agents

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::protocol::{Action, Observation};

/// Everything a subject has seen in one session, oldest first
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Conversation {
    pub session_id: String,
    /// (turn index, observation) pairs
    pub observations: Vec<(u32, Observation)>,
}

impl Conversation {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            observations: Vec::new(),
        }
    }

    pub fn last_turn(&self) -> Option<u32> {
        self.observations.last().map(|(turn, _)| *turn)
    }

    pub fn latest(&self) -> Option<&Observation> {
        self.observations.last().map(|(_, obs)| obs)
    }

    /// Observations received so far, corrections included
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// The agent under test, as seen from its hosting server
#[async_trait]
pub trait SubjectAgent: Send + Sync {
    /// Choose the next action given the full conversation so far
    async fn respond(&self, conversation: &Conversation) -> Result<Action>;
}

/// Replays a fixed list of actions, one per observation received.
///
/// Progress is derived from the conversation, so concurrent sessions each
/// get the script from the start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScriptedAgent {
    pub actions: Vec<Action>,
    /// Start over instead of finishing when the script runs out
    #[serde(default)]
    pub looping: bool,
}

impl ScriptedAgent {
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            actions,
            looping: false,
        }
    }

    pub fn looping(mut self) -> Self {
        self.looping = true;
        self
    }

    /// Load a script from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {:?}", path))?;
        serde_yaml::from_str(&raw).with_context(|| format!("Failed to parse script {:?}", path))
    }

    fn action_for(&self, step: usize) -> Action {
        if self.actions.is_empty() {
            return Action::finish();
        }
        if self.looping {
            return self.actions[step % self.actions.len()].clone();
        }
        self.actions.get(step).cloned().unwrap_or_else(Action::finish)
    }
}

#[async_trait]
impl SubjectAgent for ScriptedAgent {
    async fn respond(&self, conversation: &Conversation) -> Result<Action> {
        let step = conversation.len().saturating_sub(1);
        Ok(self.action_for(step))
    }
}
