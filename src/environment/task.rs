//! Task definitions

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An evaluation scenario. Read-only once a session starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    /// What the subject is asked to achieve
    pub goal: String,
    /// Initial environment state
    #[serde(default)]
    pub initial_state: Map<String, Value>,
    #[serde(default)]
    pub success: SuccessCriteria,
}

/// Entries the final state must contain for the session to score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuccessCriteria {
    #[serde(default)]
    pub expected: Map<String, Value>,
    /// End the session as soon as the criteria hold
    #[serde(default)]
    pub stop_on_success: bool,
}

impl SuccessCriteria {
    pub fn is_met(&self, state: &Map<String, Value>) -> bool {
        self.expected
            .iter()
            .all(|(key, value)| state.get(key) == Some(value))
    }
}

impl Task {
    pub fn new(id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            initial_state: Map::new(),
            success: SuccessCriteria::default(),
        }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: Value) -> Self {
        self.initial_state.insert(key.into(), value);
        self
    }

    pub fn expecting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.success.expected.insert(key.into(), value);
        self
    }

    pub fn stop_on_success(mut self) -> Self {
        self.success.stop_on_success = true;
        self
    }

    /// Load a task from a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read task file {:?}", path))?;
        let task: Task = serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse task file {:?}", path))?;

        if task.id.trim().is_empty() {
            anyhow::bail!("Task in {:?} has an empty id", path);
        }
        Ok(task)
    }
}
