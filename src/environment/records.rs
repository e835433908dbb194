//! Key/value record store environment

use serde_json::{json, Map, Value};

use super::adapter::{Environment, EnvironmentFactory};
use super::schema::{ActionSchema, ParamKind, ToolSpec};
use super::task::{SuccessCriteria, Task};
use crate::protocol::{Action, Observation};

/// A JSON record store the subject edits through tool calls.
///
/// Keys are kept in a `serde_json::Map`, which iterates in sorted order, so
/// every observation is deterministic for a given action sequence.
#[derive(Debug, Default)]
pub struct RecordStore {
    records: Map<String, Value>,
    success: SuccessCriteria,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> &Map<String, Value> {
        &self.records
    }

    fn key_of(action: &Action) -> String {
        action.arguments["key"].as_str().unwrap_or_default().to_string()
    }

    fn keys(&self) -> Vec<&String> {
        self.records.keys().collect()
    }
}

impl Environment for RecordStore {
    fn schema(&self) -> ActionSchema {
        ActionSchema::new(vec![
            ToolSpec::new("lookup", "Read the value stored under a key")
                .param("key", ParamKind::String),
            ToolSpec::new("update", "Store a value under a key")
                .param("key", ParamKind::String)
                .param("value", ParamKind::Any),
            ToolSpec::new("remove", "Delete a key").param("key", ParamKind::String),
            ToolSpec::new("list", "List every stored key"),
        ])
    }

    fn reset(&mut self, task: &Task) -> Observation {
        self.records = task.initial_state.clone();
        self.success = task.success.clone();

        let tools: Vec<&str> = vec!["lookup", "update", "remove", "list", "finish"];
        Observation::new(
            task.goal.clone(),
            json!({
                "task_id": task.id,
                "keys": self.keys(),
                "tools": tools,
            }),
        )
    }

    fn apply(&mut self, action: &Action) -> Observation {
        let observation = match action.name.as_str() {
            "lookup" => {
                let key = Self::key_of(action);
                match self.records.get(&key) {
                    Some(value) => Observation::new(
                        format!("{} = {}", key, value),
                        json!({"key": key, "value": value}),
                    ),
                    None => Observation::new(
                        format!("No record named {}", key),
                        json!({"key": key, "value": null}),
                    ),
                }
            }
            "update" => {
                let key = Self::key_of(action);
                let value = action.arguments["value"].clone();
                let previous = self.records.insert(key.clone(), value.clone());
                Observation::new(
                    format!("Stored {}", key),
                    json!({"key": key, "value": value, "previous": previous}),
                )
            }
            "remove" => {
                let key = Self::key_of(action);
                match self.records.remove(&key) {
                    Some(previous) => Observation::new(
                        format!("Removed {}", key),
                        json!({"key": key, "previous": previous}),
                    ),
                    None => Observation::new(
                        format!("No record named {}", key),
                        json!({"key": key, "previous": null}),
                    ),
                }
            }
            "list" => Observation::new(
                format!("{} record(s)", self.records.len()),
                json!({"keys": self.keys()}),
            ),
            // Unreachable behind the adapter's schema check
            other => Observation::new(format!("Unsupported tool {}", other), Value::Null),
        };

        if self.success.stop_on_success
            && !self.success.expected.is_empty()
            && self.success.is_met(&self.records)
        {
            observation.terminal(self.reward())
        } else {
            observation
        }
    }

    fn reward(&self) -> f64 {
        if self.success.is_met(&self.records) {
            1.0
        } else {
            0.0
        }
    }
}

/// Builds a fresh [`RecordStore`] for every session
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordStoreFactory;

impl EnvironmentFactory for RecordStoreFactory {
    fn create(&self) -> Box<dyn Environment> {
        Box::new(RecordStore::new())
    }
}
