//! Data manipulation nodes: variable assignment, string operations, and JSON
//! extraction.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::context::WorkflowContext;
use crate::error::NodeResult;
use crate::node::{Descriptor, Node, NodeOutput, Port};
use crate::nodes::parse_config;

// ============================================================================
// SetVariableNode
// ============================================================================

pub(crate) static SET_VARIABLE_DESCRIPTOR: Descriptor = Descriptor {
    kind: "set_variable",
    name: "Set variable",
    description: "Assigns a templated value to a context variable",
    category: "data",
    inputs: &[],
    outputs: &[],
};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SetVariableConfig {
    variable_name: String,
    variable_value: String,
}

/// Templated variable assignment.
pub struct SetVariableNode {
    config: SetVariableConfig,
}

impl SetVariableNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(SetVariableNode {
            config: parse_config(config),
        })
    }
}

#[async_trait]
impl Node for SetVariableNode {
    fn descriptor(&self) -> &'static Descriptor {
        &SET_VARIABLE_DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let value = ctx.render_template(&self.config.variable_value);
        ctx.set_variable(self.config.variable_name.clone(), value.clone());
        Ok(NodeOutput::advance()
            .with("success", true)
            .with("variable", self.config.variable_name.clone())
            .with("value", value))
    }
}

// ============================================================================
// StringOperationNode
// ============================================================================

pub(crate) static STRING_OP_DESCRIPTOR: Descriptor = Descriptor {
    kind: "string_operation",
    name: "String operation",
    description: "Transforms a string variable",
    category: "data",
    inputs: &[Port { name: "input", label: "Input variable" }],
    outputs: &[Port { name: "output", label: "output - transformed value" }],
};

fn default_operation() -> String {
    "trim".to_string()
}

fn default_save_to() -> String {
    "output".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct StringOperationConfig {
    input: String,
    #[serde(default = "default_operation")]
    operation: String,
    param1: String,
    param2: String,
    #[serde(default = "default_save_to")]
    save_to: String,
}

/// trim / case / replace / regex_extract / regex_replace / substring / split.
pub struct StringOperationNode {
    config: StringOperationConfig,
}

impl StringOperationNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(StringOperationNode {
            config: parse_config(config),
        })
    }

    fn apply(&self, input: &str) -> Result<Value, String> {
        let param1 = self.config.param1.as_str();
        let param2 = self.config.param2.as_str();

        let result = match self.config.operation.as_str() {
            "trim" => json!(input.trim()),
            "upper" => json!(input.to_uppercase()),
            "lower" => json!(input.to_lowercase()),
            "replace" => {
                if param1.is_empty() {
                    json!(input)
                } else {
                    json!(input.replace(param1, param2))
                }
            }
            "regex_extract" => {
                if param1.is_empty() {
                    json!(input)
                } else {
                    let re = Regex::new(param1).map_err(|e| e.to_string())?;
                    match re.captures(input) {
                        // First capture group when present, else the whole match.
                        Some(caps) => {
                            let m = caps.get(1).or_else(|| caps.get(0));
                            json!(m.map(|m| m.as_str()).unwrap_or(""))
                        }
                        None => json!(""),
                    }
                }
            }
            "regex_replace" => {
                if param1.is_empty() {
                    json!(input)
                } else {
                    let re = Regex::new(param1).map_err(|e| e.to_string())?;
                    json!(re.replace_all(input, param2).into_owned())
                }
            }
            "substring" => {
                let chars: Vec<char> = input.chars().collect();
                let bounds: Vec<&str> = param1.split(',').map(str::trim).collect();
                let parse = |s: &str| s.parse::<usize>().map_err(|e| e.to_string());
                match bounds.as_slice() {
                    [start, end] => {
                        let start = parse(start)?.min(chars.len());
                        let end = parse(end)?.min(chars.len()).max(start);
                        json!(chars[start..end].iter().collect::<String>())
                    }
                    [start] if !start.is_empty() => {
                        let start = parse(start)?.min(chars.len());
                        json!(chars[start..].iter().collect::<String>())
                    }
                    _ => json!(input),
                }
            }
            "split" => {
                if param1.is_empty() {
                    json!(input)
                } else {
                    json!(input.split(param1).collect::<Vec<&str>>())
                }
            }
            other => return Err(format!("unknown operation '{other}'")),
        };
        Ok(result)
    }
}

#[async_trait]
impl Node for StringOperationNode {
    fn descriptor(&self) -> &'static Descriptor {
        &STRING_OP_DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let input = ctx.get_string(&self.config.input);

        match self.apply(&input) {
            Ok(result) => {
                ctx.set_variable(self.config.save_to.clone(), result.clone());
                Ok(NodeOutput::advance()
                    .with("success", true)
                    .with("output", result))
            }
            Err(error) => {
                warn!(operation = %self.config.operation, error = %error, "String operation failed");
                Ok(NodeOutput::advance()
                    .with("success", false)
                    .with("error", error))
            }
        }
    }
}

// ============================================================================
// JsonExtractNode
// ============================================================================

pub(crate) static JSON_EXTRACT_DESCRIPTOR: Descriptor = Descriptor {
    kind: "json_extract",
    name: "JSON extract",
    description: "Extracts a value from JSON by dotted path",
    category: "data",
    inputs: &[Port { name: "json_source", label: "Source variable" }],
    outputs: &[],
};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct JsonExtractConfig {
    json_source: String,
    extract_path: String,
    save_to: String,
    default_value: Option<String>,
}

/// Extracts `data.user.name` / `items[0].id`-style paths with a default on
/// miss. The result lands in `save_to`.
pub struct JsonExtractNode {
    config: JsonExtractConfig,
}

impl JsonExtractNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(JsonExtractNode {
            config: parse_config(config),
        })
    }

    fn default_value(&self) -> Value {
        match &self.config.default_value {
            Some(v) => json!(v),
            None => Value::Null,
        }
    }
}

#[async_trait]
impl Node for JsonExtractNode {
    fn descriptor(&self) -> &'static Descriptor {
        &JSON_EXTRACT_DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let source = ctx.get_variable(&self.config.json_source);

        let data = match source {
            None | Some(Value::Null) => {
                warn!(source = %self.config.json_source, "JSON source is empty");
                ctx.set_variable(self.config.save_to.clone(), self.default_value());
                return Ok(NodeOutput::advance()
                    .with("success", false)
                    .with("error", "JSON source is empty"));
            }
            // Strings are decoded before extraction.
            Some(Value::String(s)) => match serde_json::from_str::<Value>(&s) {
                Ok(parsed) => parsed,
                Err(_) => {
                    ctx.set_variable(self.config.save_to.clone(), self.default_value());
                    return Ok(NodeOutput::advance()
                        .with("success", false)
                        .with("error", "Invalid JSON string"));
                }
            },
            Some(other) => other,
        };

        match extract_path(&data, &self.config.extract_path) {
            Some(value) => {
                ctx.set_variable(self.config.save_to.clone(), value.clone());
                Ok(NodeOutput::advance()
                    .with("success", true)
                    .with("value", value))
            }
            None => {
                ctx.set_variable(self.config.save_to.clone(), self.default_value());
                Ok(NodeOutput::advance()
                    .with("success", false)
                    .with("error", format!("path '{}' not found", self.config.extract_path)))
            }
        }
    }
}

/// Walks a dotted path with `[i]` indexing through a JSON value.
pub(crate) fn extract_path(data: &Value, path: &str) -> Option<Value> {
    if path.is_empty() {
        return Some(data.clone());
    }

    let normalized = path.replace('[', ".").replace(']', "");
    let mut current = data.clone();
    for part in normalized.split('.').filter(|p| !p.is_empty()) {
        let next = if let Ok(index) = part.parse::<usize>() {
            current.get(index).cloned()
        } else {
            current.get(part).cloned()
        };
        match next {
            Some(Value::Null) | None => return None,
            Some(value) => current = value,
        }
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_path() {
        let data = json!({"data": {"user": {"name": "alice"}}, "items": [{"id": 7}]});
        assert_eq!(extract_path(&data, "data.user.name"), Some(json!("alice")));
        assert_eq!(extract_path(&data, "items[0].id"), Some(json!(7)));
        assert_eq!(extract_path(&data, "items.0.id"), Some(json!(7)));
        assert_eq!(extract_path(&data, "missing.path"), None);
        assert_eq!(extract_path(&data, ""), Some(data.clone()));
    }
}
