//! Ordered message log of a session

use serde::{Deserialize, Serialize};

use crate::protocol::{Action, Observation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Evaluator,
    Subject,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Evaluator => "evaluator",
            Role::Subject => "subject",
        }
    }

    fn other(&self) -> Self {
        match self {
            Role::Evaluator => Role::Subject,
            Role::Subject => Role::Evaluator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageContent {
    Observation(Observation),
    Action(Action),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub turn_index: u32,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LogError {
    #[error("Expected a {expected} message at turn {turn_index}, got {got}")]
    OutOfOrder {
        expected: &'static str,
        got: &'static str,
        turn_index: u32,
    },

    #[error("{0} messages must carry {1}")]
    WrongContent(&'static str, &'static str),
}

/// Append-only log. Indices start at 0 and grow by one; roles alternate
/// starting with the evaluator, observations come from the evaluator and
/// actions from the subject.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageLog {
    messages: Vec<Message>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_index(&self) -> u32 {
        self.messages.len() as u32
    }

    fn expected_role(&self) -> Role {
        self.messages
            .last()
            .map(|m| m.role.other())
            .unwrap_or(Role::Evaluator)
    }

    pub fn append(&mut self, role: Role, content: MessageContent) -> Result<u32, LogError> {
        let turn_index = self.next_index();
        let expected = self.expected_role();
        if role != expected {
            return Err(LogError::OutOfOrder {
                expected: expected.as_str(),
                got: role.as_str(),
                turn_index,
            });
        }

        match (&role, &content) {
            (Role::Evaluator, MessageContent::Action(_)) => {
                return Err(LogError::WrongContent("evaluator", "an observation"))
            }
            (Role::Subject, MessageContent::Observation(_)) => {
                return Err(LogError::WrongContent("subject", "an action"))
            }
            _ => {}
        }

        self.messages.push(Message {
            role,
            turn_index,
            content,
        });
        Ok(turn_index)
    }

    pub fn push_observation(&mut self, observation: Observation) -> Result<u32, LogError> {
        self.append(Role::Evaluator, MessageContent::Observation(observation))
    }

    pub fn push_action(&mut self, action: Action) -> Result<u32, LogError> {
        self.append(Role::Subject, MessageContent::Action(action))
    }

    /// Most recent observation the evaluator logged
    pub fn last_observation(&self) -> Option<&Observation> {
        self.messages.iter().rev().find_map(|m| match &m.content {
            MessageContent::Observation(obs) => Some(obs),
            MessageContent::Action(_) => None,
        })
    }

    /// Number of subject messages
    pub fn subject_turns(&self) -> u32 {
        self.messages
            .iter()
            .filter(|m| m.role == Role::Subject)
            .count() as u32
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}
