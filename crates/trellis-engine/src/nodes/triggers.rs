//! Keyword trigger node.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::error::NodeResult;
use crate::node::{Descriptor, Node, NodeOutput, Port};
use crate::nodes::parse_config;

pub(crate) static DESCRIPTOR: Descriptor = Descriptor {
    kind: "keyword_trigger",
    name: "Keyword trigger",
    description: "Continues only when the message matches a keyword",
    category: "trigger",
    inputs: &[],
    outputs: &[
        Port { name: "matched", label: "matched - whether a keyword matched" },
        Port { name: "keyword", label: "keyword - the matching keyword" },
    ],
};

fn default_match_type() -> String {
    "contains".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct KeywordTriggerConfig {
    keywords: String,
    #[serde(default = "default_match_type")]
    match_type: String,
}

/// First-step filter: one keyword per line, any match passes. On miss the
/// workflow stops (see [`Node::should_break`]).
pub struct KeywordTriggerNode {
    config: KeywordTriggerConfig,
}

impl KeywordTriggerNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(KeywordTriggerNode {
            config: parse_config(config),
        })
    }
}

#[async_trait]
impl Node for KeywordTriggerNode {
    fn descriptor(&self) -> &'static Descriptor {
        &DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let message = ctx.get_string("message");

        let matched = self
            .config
            .keywords
            .lines()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .find(|keyword| match self.config.match_type.as_str() {
                "equals" => message == *keyword,
                "starts_with" => message.starts_with(keyword),
                _ => message.contains(keyword),
            });

        Ok(NodeOutput::advance()
            .with("success", true)
            .with("matched", matched.is_some())
            .with("keyword", matched.unwrap_or_default()))
    }

    fn should_break(&self, output: &NodeOutput) -> bool {
        !output
            .get("matched")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}
