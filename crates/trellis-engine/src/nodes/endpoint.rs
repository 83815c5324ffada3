//! Endpoint node: raw protocol API passthrough.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

use crate::context::WorkflowContext;
use crate::error::NodeResult;
use crate::node::{Descriptor, Node, NodeOutput, Port};
use crate::nodes::parse_config;

pub(crate) static DESCRIPTOR: Descriptor = Descriptor {
    kind: "endpoint",
    name: "Endpoint",
    description: "Calls a raw protocol API action on the triggering bot",
    category: "network",
    inputs: &[],
    outputs: &[
        Port { name: "endpoint_response", label: "endpoint_response - API result" },
        Port { name: "endpoint_success", label: "endpoint_success - outcome" },
        Port { name: "endpoint_error", label: "endpoint_error - failure message" },
    ],
};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct EndpointConfig {
    action: String,
    params: String,
}

/// Forwards `{action, params}` straight to the bot's `call_api`, for
/// OneBot-style protocols whose action set exceeds the built-in nodes.
pub struct EndpointNode {
    config: EndpointConfig,
}

impl EndpointNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(EndpointNode {
            config: parse_config(config),
        })
    }
}

#[async_trait]
impl Node for EndpointNode {
    fn descriptor(&self) -> &'static Descriptor {
        &DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let Some(bot) = ctx.event.bot() else {
            return Ok(NodeOutput::advance()
                .with("endpoint_success", false)
                .with("endpoint_error", "bot is no longer running"));
        };

        let params = if self.config.params.is_empty() {
            json!({})
        } else {
            let rendered = ctx.render_template(&self.config.params);
            match serde_json::from_str(&rendered) {
                Ok(params) => params,
                Err(err) => {
                    return Ok(NodeOutput::advance()
                        .with("endpoint_success", false)
                        .with("endpoint_error", format!("invalid params JSON: {err}")));
                }
            }
        };

        match bot.call_api(&self.config.action, params).await {
            Ok(response) => Ok(NodeOutput::advance()
                .with("success", true)
                .with("endpoint_response", response)
                .with("endpoint_success", true)
                .with("endpoint_error", "")),
            Err(err) => {
                warn!(action = %self.config.action, error = %err, "Endpoint call failed");
                Ok(NodeOutput::advance()
                    .with("endpoint_success", false)
                    .with("endpoint_error", err.to_string()))
            }
        }
    }
}
