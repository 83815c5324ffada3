//! Send-message node.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use trellis_core::{Event, Message, Segment};

use crate::context::WorkflowContext;
use crate::error::{EngineError, NodeResult};
use crate::node::{Descriptor, Node, NodeOutput, Port};
use crate::nodes::parse_config;

pub(crate) static DESCRIPTOR: Descriptor = Descriptor {
    kind: "send_message",
    name: "Send message",
    description: "Builds the response message for the triggering session",
    category: "action",
    inputs: &[Port { name: "content", label: "Message content" }],
    outputs: &[],
};

/// Message types each protocol can carry. Sends of unsupported combinations
/// either skip (with `skip_if_unsupported`) or fail the step.
const PROTOCOL_SUPPORT: &[(&str, &[&str])] = &[
    ("text", &["qq", "onebot"]),
    ("image", &["qq", "onebot"]),
    ("video", &["qq", "onebot"]),
    ("voice", &["qq", "onebot"]),
    // OneBot needs its upload_group_file endpoint for files; see the
    // `endpoint` node.
    ("file", &["qq"]),
    ("markdown", &["qq"]),
    ("ark", &["qq"]),
];

fn default_message_type() -> String {
    "text".to_string()
}

fn default_true() -> bool {
    true
}

fn default_ark_template() -> String {
    "24".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct SendMessageConfig {
    #[serde(default = "default_message_type")]
    message_type: String,
    content: String,
    markdown_template_id: String,
    keyboard_id: String,
    #[serde(default = "default_ark_template")]
    ark_template_id: String,
    #[serde(default = "default_true")]
    skip_if_unsupported: bool,
    next_node: String,
}

impl Default for SendMessageConfig {
    fn default() -> Self {
        Self {
            message_type: default_message_type(),
            content: String::new(),
            markdown_template_id: String::new(),
            keyboard_id: String::new(),
            ark_template_id: default_ark_template(),
            skip_if_unsupported: true,
            next_node: String::new(),
        }
    }
}

/// Builds a [`Message`] from templated content and writes it into the
/// context response slot. The actual wire send happens in dispatch, after
/// the workflow completes.
pub struct SendMessageNode {
    config: SendMessageConfig,
}

impl SendMessageNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(SendMessageNode {
            config: parse_config(config),
        })
    }

    fn build_message(&self, content: String) -> NodeResult<Message> {
        let message = match self.config.message_type.as_str() {
            "text" => Message::text(content),
            "image" => Segment::image(content).into(),
            "video" => Segment::video(content).into(),
            "voice" => Segment::voice(content).into(),
            "file" => Segment::file(content).into(),
            "markdown" => {
                let template_id = self.config.markdown_template_id.trim();
                let keyboard_id = self.config.keyboard_id.trim();
                Segment::Markdown(trellis_core::message::MarkdownData {
                    content,
                    template_id: (!template_id.is_empty()).then(|| template_id.to_string()),
                    keyboard_id: (!keyboard_id.is_empty()).then(|| keyboard_id.to_string()),
                })
                .into()
            }
            "ark" => {
                let template_id = self
                    .config
                    .ark_template_id
                    .trim()
                    .parse::<i64>()
                    .map_err(|_| {
                        EngineError::Config(format!(
                            "invalid ark template id '{}'",
                            self.config.ark_template_id
                        ))
                    })?;
                Segment::ark(template_id, content).into()
            }
            other => {
                return Err(EngineError::Config(format!(
                    "unknown message type '{other}'"
                )));
            }
        };
        Ok(message)
    }
}

#[async_trait]
impl Node for SendMessageNode {
    fn descriptor(&self) -> &'static Descriptor {
        &DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let protocol = ctx.event.protocol().to_string();
        let supported = PROTOCOL_SUPPORT
            .iter()
            .find(|(kind, _)| *kind == self.config.message_type)
            .is_some_and(|(_, protocols)| protocols.contains(&protocol.as_str()));

        if !supported {
            if self.config.skip_if_unsupported {
                return Ok(NodeOutput::advance()
                    .with("success", true)
                    .with("skipped", true)
                    .jump_or_advance(non_empty(&self.config.next_node)));
            }
            return Err(EngineError::Node(format!(
                "protocol '{}' does not support message type '{}'",
                protocol, self.config.message_type
            )));
        }

        let content = ctx.render_template(&self.config.content);
        let message = self.build_message(content)?;
        ctx.set_response(message);

        Ok(NodeOutput::advance()
            .with("success", true)
            .jump_or_advance(non_empty(&self.config.next_node)))
    }
}

fn non_empty(s: &str) -> Option<&str> {
    (!s.is_empty()).then_some(s)
}
