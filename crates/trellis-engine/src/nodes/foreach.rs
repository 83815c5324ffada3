//! Foreach node: list iteration driving the engine's loop frames.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::context::WorkflowContext;
use crate::error::NodeResult;
use crate::node::{Control, Descriptor, Node, NodeOutput, Port};
use crate::nodes::{lenient_f64, parse_config};

pub(crate) static DESCRIPTOR: Descriptor = Descriptor {
    kind: "foreach",
    name: "Foreach",
    description: "Iterates a list, running the loop body once per element",
    category: "control",
    inputs: &[Port { name: "list", label: "List to iterate" }],
    outputs: &[
        Port { name: "loop_index", label: "loop_index - current index" },
        Port { name: "loop_item", label: "loop_item - current element" },
        Port { name: "loop_total", label: "loop_total - element count" },
    ],
};

fn default_item() -> String {
    "item".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ForeachConfig {
    list_variable: String,
    #[serde(default = "default_item")]
    item_variable: String,
    loop_body: String,
    delay: Value,
    next_node: String,
}

/// Iterates over a list (or a map, materialised as `[{key, value}]`).
///
/// Iteration state lives in the context under a key derived from the list
/// and item variable names, so re-entering the same foreach within one run
/// resumes where it left off. Each invocation emits one element and a
/// [`Control::StartLoop`] jump into the body; when the list is exhausted the
/// state is cleared and control falls through to `next_node`.
pub struct ForeachNode {
    config: ForeachConfig,
}

impl ForeachNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(ForeachNode {
            config: parse_config(config),
        })
    }

    fn state_key(&self) -> String {
        format!(
            "_foreach_state_{}_{}",
            self.config.list_variable, self.config.item_variable
        )
    }

    fn materialise(&self, ctx: &WorkflowContext) -> Result<Vec<Value>, String> {
        let items = ctx
            .get_variable(&self.config.list_variable)
            .ok_or_else(|| format!("variable '{}' not found", self.config.list_variable))?;
        match items {
            Value::Array(items) => Ok(items),
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(key, value)| json!({"key": key, "value": value}))
                .collect()),
            _ => Err(format!(
                "variable '{}' is not a list or map",
                self.config.list_variable
            )),
        }
    }
}

#[async_trait]
impl Node for ForeachNode {
    fn descriptor(&self) -> &'static Descriptor {
        &DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let state_key = self.state_key();
        let next_node = (!self.config.next_node.is_empty()).then_some(self.config.next_node.as_str());

        let state = ctx.get_variable(&state_key);
        let mut state = match state {
            Some(Value::Object(map)) => map,
            _ => {
                // First entry: materialise the iterable and seed the cursor.
                let items = match self.materialise(ctx) {
                    Ok(items) => items,
                    Err(error) => {
                        warn!(error = %error, "Foreach cannot iterate");
                        return Ok(NodeOutput::advance()
                            .with("success", false)
                            .with("error", error));
                    }
                };
                if items.is_empty() {
                    debug!(list = %self.config.list_variable, "Foreach over empty list");
                    return Ok(NodeOutput::advance()
                        .with("success", true)
                        .with("loop_total", 0)
                        .jump_or_advance(next_node));
                }
                if self.config.loop_body.is_empty() {
                    return Ok(NodeOutput::advance()
                        .with("success", false)
                        .with("error", "no loop body configured"));
                }
                let mut map = serde_json::Map::new();
                map.insert("index".into(), json!(0));
                map.insert("total".into(), json!(items.len()));
                map.insert("items".into(), Value::Array(items));
                map
            }
        };

        let index = state.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
        let total = state.get("total").and_then(Value::as_u64).unwrap_or(0) as usize;

        if index >= total {
            // Exhausted: clear state and fall through.
            ctx.remove_variable(&state_key);
            debug!(total, "Foreach complete");
            return Ok(NodeOutput::advance()
                .with("success", true)
                .with("loop_total", total)
                .jump_or_advance(next_node));
        }

        let item = state
            .get("items")
            .and_then(Value::as_array)
            .and_then(|items| items.get(index))
            .cloned()
            .unwrap_or(Value::Null);

        ctx.set_variable(self.config.item_variable.clone(), item.clone());
        ctx.set_variable("loop_index", json!(index));
        ctx.set_variable("loop_item", item.clone());
        ctx.set_variable("loop_total", json!(total));

        state.insert("index".into(), json!(index + 1));
        ctx.set_variable(state_key, Value::Object(state));

        debug!(iteration = index + 1, total, "Foreach iteration");

        Ok(NodeOutput::advance()
            .with("success", true)
            .with("loop_index", index)
            .with("loop_item", item)
            .with("loop_total", total)
            .with_control(Control::StartLoop {
                body: self.config.loop_body.clone(),
                end: None,
                delay: lenient_f64(&self.config.delay).unwrap_or(0.0),
            }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use trellis_core::{BoxedEvent, ScheduledEvent};

    use crate::services::EngineServices;

    use super::*;

    fn context() -> WorkflowContext {
        let event = BoxedEvent::new(ScheduledEvent {
            protocol: "onebot".into(),
            self_id: "1".into(),
            time: 0,
            workflow_name: "t".into(),
        });
        WorkflowContext::new(event, Arc::new(EngineServices::in_memory()))
    }

    fn node_over(list_variable: &str) -> ForeachNode {
        ForeachNode {
            config: ForeachConfig {
                list_variable: list_variable.to_string(),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_materialise_map_as_key_value_pairs() {
        let mut ctx = context();
        ctx.set_variable("scores", json!({"bob": 5, "alice": 3}));

        let items = node_over("scores").materialise(&ctx).unwrap();
        // Map entries become {key, value}, iterated in key order.
        assert_eq!(
            items,
            vec![
                json!({"key": "alice", "value": 3}),
                json!({"key": "bob", "value": 5}),
            ]
        );
    }

    #[test]
    fn test_materialise_passes_lists_through() {
        let mut ctx = context();
        ctx.set_variable("items", json!([1, 2]));
        let items = node_over("items").materialise(&ctx).unwrap();
        assert_eq!(items, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_materialise_rejects_scalars_and_missing() {
        let mut ctx = context();
        ctx.set_variable("n", json!(42));
        assert!(node_over("n").materialise(&ctx).is_err());
        assert!(node_over("absent").materialise(&ctx).is_err());
    }
}
