//! Data storage node: JSON file persistence with per-storage locking.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::context::WorkflowContext;
use crate::error::NodeResult;
use crate::node::{Descriptor, Node, NodeOutput, Port};
use crate::nodes::parse_config;

pub(crate) static DESCRIPTOR: Descriptor = Descriptor {
    kind: "data_storage",
    name: "Data storage",
    description: "Persists key-value data to a named JSON file",
    category: "data",
    inputs: &[],
    outputs: &[
        Port { name: "result", label: "result - operation result" },
        Port { name: "success", label: "success - operation outcome" },
    ],
};

fn default_operation() -> String {
    "get".to_string()
}

fn default_save_to() -> String {
    "result".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DataStorageConfig {
    storage_name: String,
    #[serde(default = "default_operation")]
    operation: String,
    key: String,
    value: String,
    default_value: String,
    #[serde(default = "default_save_to")]
    save_to: String,
}

/// CRUD over `<data_dir>/<storage_name>.json`, serialised by a per-storage
/// async mutex. Storage names are restricted to `[A-Za-z0-9_]`.
pub struct DataStorageNode {
    config: DataStorageConfig,
}

impl DataStorageNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(DataStorageNode {
            config: parse_config(config),
        })
    }

    fn storage_path(&self, ctx: &WorkflowContext) -> PathBuf {
        ctx.services
            .data_dir
            .join(format!("{}.json", self.config.storage_name))
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

async fn load(path: &Path) -> Map<String, Value> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => match serde_json::from_str::<Value>(&content) {
            Ok(Value::Object(map)) => map,
            _ => {
                warn!(path = %path.display(), "Storage file is not a JSON object");
                Map::new()
            }
        },
        Err(_) => Map::new(),
    }
}

async fn save(path: &Path, data: &Map<String, Value>) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let payload = serde_json::to_string_pretty(&Value::Object(data.clone()))
        .unwrap_or_else(|_| "{}".to_string());
    tokio::fs::write(path, payload).await
}

/// Values that parse as JSON are stored typed; everything else is a string.
fn parse_value(value: &str) -> Value {
    if value.is_empty() {
        return json!("");
    }
    serde_json::from_str(value).unwrap_or_else(|_| json!(value))
}

#[async_trait]
impl Node for DataStorageNode {
    fn descriptor(&self) -> &'static Descriptor {
        &DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        if !valid_name(&self.config.storage_name) {
            return Ok(NodeOutput::advance().with("success", false).with(
                "error",
                "invalid storage name (letters, digits, underscores only)",
            ));
        }

        let key = ctx.render_template(&self.config.key);
        let value = ctx.render_template(&self.config.value);
        let path = self.storage_path(ctx);

        let needs_key = matches!(
            self.config.operation.as_str(),
            "get" | "set" | "delete" | "exists"
        );
        if needs_key && key.is_empty() {
            return Ok(NodeOutput::advance()
                .with("success", false)
                .with("error", format!("operation '{}' needs a key", self.config.operation)));
        }

        let lock = ctx.services.storage_lock(&self.config.storage_name);
        let _guard = lock.lock().await;

        let mut data = load(&path).await;
        let result: Value = match self.config.operation.as_str() {
            "get" => match data.get(&key) {
                Some(value) => value.clone(),
                None if !self.config.default_value.is_empty() => {
                    json!(self.config.default_value)
                }
                None => Value::Null,
            },
            "set" => {
                let parsed = parse_value(&value);
                data.insert(key.clone(), parsed.clone());
                save(&path, &data).await?;
                parsed
            }
            "delete" => {
                let removed = data.remove(&key);
                if removed.is_some() {
                    save(&path, &data).await?;
                }
                removed.unwrap_or(Value::Null)
            }
            "exists" => json!(data.contains_key(&key)),
            "list_keys" => json!(data.keys().collect::<Vec<_>>()),
            "get_all" => Value::Object(data.clone()),
            "clear" => {
                data.clear();
                save(&path, &data).await?;
                json!(true)
            }
            other => {
                return Ok(NodeOutput::advance()
                    .with("success", false)
                    .with("error", format!("unknown operation '{other}'")));
            }
        };

        debug!(
            storage = %self.config.storage_name,
            operation = %self.config.operation,
            key = %key,
            "Storage operation"
        );

        if !self.config.save_to.is_empty() && !result.is_null() {
            ctx.set_variable(self.config.save_to.clone(), result.clone());
        }

        Ok(NodeOutput::advance()
            .with("success", true)
            .with("result", result))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use trellis_core::{BoxedEvent, ScheduledEvent};

    use crate::services::EngineServices;

    use super::*;

    fn context_with_dir(dir: &Path) -> WorkflowContext {
        let event = BoxedEvent::new(ScheduledEvent {
            protocol: "onebot".into(),
            self_id: "1".into(),
            time: 0,
            workflow_name: "t".into(),
        });
        let services = EngineServices::in_memory().with_data_dir(dir);
        WorkflowContext::new(event, Arc::new(services))
    }

    async fn run(ctx: &mut WorkflowContext, config: Value) -> NodeOutput {
        DataStorageNode::create(&config).execute(ctx).await.unwrap()
    }

    #[tokio::test]
    async fn test_storage_operations_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context_with_dir(dir.path());

        let set = run(
            &mut ctx,
            json!({"storage_name": "scores", "operation": "set", "key": "alice", "value": "{\"points\": 3}"}),
        )
        .await;
        assert_eq!(set.get("success"), Some(&json!(true)));

        let get = run(
            &mut ctx,
            json!({"storage_name": "scores", "operation": "get", "key": "alice"}),
        )
        .await;
        assert_eq!(get.get("result"), Some(&json!({"points": 3})));
        assert_eq!(ctx.get_variable("result"), Some(json!({"points": 3})));

        let exists = run(
            &mut ctx,
            json!({"storage_name": "scores", "operation": "exists", "key": "alice"}),
        )
        .await;
        assert_eq!(exists.get("result"), Some(&json!(true)));

        let keys = run(
            &mut ctx,
            json!({"storage_name": "scores", "operation": "list_keys"}),
        )
        .await;
        assert_eq!(keys.get("result"), Some(&json!(["alice"])));

        let deleted = run(
            &mut ctx,
            json!({"storage_name": "scores", "operation": "delete", "key": "alice"}),
        )
        .await;
        assert_eq!(deleted.get("result"), Some(&json!({"points": 3})));

        let missing = run(
            &mut ctx,
            json!({"storage_name": "scores", "operation": "get", "key": "alice", "default_value": "none"}),
        )
        .await;
        assert_eq!(missing.get("result"), Some(&json!("none")));
    }

    #[tokio::test]
    async fn test_storage_rejects_bad_names_and_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context_with_dir(dir.path());

        let bad_name = run(
            &mut ctx,
            json!({"storage_name": "../escape", "operation": "get", "key": "x"}),
        )
        .await;
        assert_eq!(bad_name.get("success"), Some(&json!(false)));

        let no_key = run(
            &mut ctx,
            json!({"storage_name": "scores", "operation": "set"}),
        )
        .await;
        assert_eq!(no_key.get("success"), Some(&json!(false)));
    }

    #[test]
    fn test_valid_name() {
        assert!(valid_name("my_data_1"));
        assert!(!valid_name(""));
        assert!(!valid_name("../escape"));
        assert!(!valid_name("name with spaces"));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(parse_value(r#"{"a":1}"#), json!({"a": 1}));
        assert_eq!(parse_value("42"), json!(42));
        assert_eq!(parse_value("plain text"), json!("plain text"));
        assert_eq!(parse_value(""), json!(""));
    }
}
