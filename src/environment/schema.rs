//! Accepted action schema and validation

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::Action;

/// JSON type a tool parameter must have
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    String,
    Number,
    Bool,
    Any,
}

impl ParamKind {
    fn accepts(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Bool => value.is_boolean(),
            ParamKind::Any => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Bool => "bool",
            ParamKind::Any => "any",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

/// One tool the environment accepts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, name: impl Into<String>, kind: ParamKind) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            kind,
            required: true,
        });
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionSchema {
    pub tools: Vec<ToolSpec>,
}

impl ActionSchema {
    pub fn new(tools: Vec<ToolSpec>) -> Self {
        Self { tools }
    }

    pub fn tool(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Check an action against the schema. The error string is what the
    /// subject gets back in the corrective message.
    pub fn validate(&self, action: &Action) -> Result<(), String> {
        let tool = self
            .tool(&action.name)
            .ok_or_else(|| format!("Unknown tool '{}'", action.name))?;

        let empty = serde_json::Map::new();
        let args = match &action.arguments {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(format!(
                    "Arguments for '{}' must be an object, got {}",
                    tool.name, other
                ))
            }
        };

        for param in &tool.params {
            match args.get(&param.name) {
                Some(value) if !param.kind.accepts(value) => {
                    return Err(format!(
                        "Argument '{}' of '{}' must be a {}",
                        param.name,
                        tool.name,
                        param.kind.as_str()
                    ));
                }
                None if param.required => {
                    return Err(format!(
                        "Missing argument '{}' for '{}'",
                        param.name, tool.name
                    ));
                }
                _ => {}
            }
        }

        if let Some(unknown) = args
            .keys()
            .find(|k| !tool.params.iter().any(|p| &p.name == *k))
        {
            return Err(format!("Unexpected argument '{}' for '{}'", unknown, tool.name));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ActionSchema {
        ActionSchema::new(vec![
            ToolSpec::new("lookup", "read").param("key", ParamKind::String),
            ToolSpec::new("list", "list keys"),
        ])
    }

    #[test]
    fn test_accepts_valid_action() {
        let action = Action::new("lookup", json!({"key": "a"}));
        assert!(schema().validate(&action).is_ok());
    }

    #[test]
    fn test_null_arguments_for_parameterless_tool() {
        let action = Action::new("list", Value::Null);
        assert!(schema().validate(&action).is_ok());
    }

    #[test]
    fn test_rejects_unknown_tool() {
        let err = schema()
            .validate(&Action::new("drop_table", json!({})))
            .unwrap_err();
        assert!(err.contains("Unknown tool"));
    }

    #[test]
    fn test_rejects_wrong_type_and_missing_args() {
        let s = schema();
        assert!(s
            .validate(&Action::new("lookup", json!({"key": 5})))
            .unwrap_err()
            .contains("must be a string"));
        assert!(s
            .validate(&Action::new("lookup", json!({})))
            .unwrap_err()
            .contains("Missing argument"));
        assert!(s
            .validate(&Action::new("lookup", json!({"key": "a", "x": 1})))
            .unwrap_err()
            .contains("Unexpected argument"));
        assert!(s
            .validate(&Action::new("lookup", json!(["a"])))
            .unwrap_err()
            .contains("must be an object"));
    }
}
