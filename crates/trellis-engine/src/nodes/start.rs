//! Workflow entry and terminal nodes.

use async_trait::async_trait;
use serde_json::{Value, json};

use trellis_core::{Event, MessageEvent, Segment};

use crate::context::WorkflowContext;
use crate::error::NodeResult;
use crate::node::{Descriptor, Node, NodeOutput, Port};

// ============================================================================
// StartNode
// ============================================================================

pub(crate) static START_DESCRIPTOR: Descriptor = Descriptor {
    kind: "start",
    name: "Start",
    description: "Workflow entry: extracts event fields into variables",
    category: "core",
    inputs: &[],
    outputs: &[
        Port { name: "event", label: "event - raw event payload" },
        Port { name: "post_type", label: "post_type - event kind" },
        Port { name: "message", label: "message - plain text content" },
        Port { name: "message_full", label: "message_full - full segment list" },
        Port { name: "message_type", label: "message_type - text/image/voice/video" },
        Port { name: "raw_message", label: "raw_message - wire form content" },
        Port { name: "has_image", label: "has_image - contains an image" },
        Port { name: "has_at", label: "has_at - contains an @mention" },
        Port { name: "user_id", label: "user_id - sender id" },
        Port { name: "sender.user_id", label: "sender.user_id - sender id" },
        Port { name: "sender.nickname", label: "sender.nickname - sender display name" },
        Port { name: "sender", label: "sender - full sender object" },
        Port { name: "sender_name", label: "sender_name - sender display name" },
        Port { name: "group_id", label: "group_id - group id (group chats)" },
        Port { name: "message_id", label: "message_id - platform message id" },
        Port { name: "is_group", label: "is_group - group chat flag" },
        Port { name: "protocol", label: "protocol - protocol name" },
        Port { name: "bot_id", label: "bot_id - bot account id" },
    ],
};

/// Extracts the triggering event's fields into canonical variable names.
pub struct StartNode;

impl StartNode {
    /// Registry constructor.
    pub fn create(_config: &Value) -> Box<dyn Node> {
        Box::new(StartNode)
    }
}

#[async_trait]
impl Node for StartNode {
    fn descriptor(&self) -> &'static Descriptor {
        &START_DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let event = ctx.event.clone();

        let message_text = event.plain_text();
        let mut message_type = "text";
        let mut has_image = false;
        let mut has_at = false;
        let mut raw_message = String::new();
        let mut message_full = Value::Null;

        if let Some(message) = event.message() {
            for segment in message.iter() {
                match segment {
                    Segment::Image(_) => {
                        has_image = true;
                        if message_text.is_empty() {
                            message_type = "image";
                        }
                    }
                    Segment::At(_) => has_at = true,
                    Segment::Voice(_) => message_type = "voice",
                    Segment::Video(_) => message_type = "video",
                    _ => {}
                }
            }
            raw_message = message.to_cq_string();
            message_full = json!(message);
        }

        let user_id = event.user_id().unwrap_or_default().to_string();
        let group_id = event.group_id().unwrap_or_default().to_string();
        let message_id = event
            .downcast_ref::<MessageEvent>()
            .map(|m| m.message_id.clone())
            .unwrap_or_default();

        // Prefer the wire sender object; fall back to what the event carries.
        let raw_sender = event
            .raw()
            .and_then(|raw| raw.get("sender"))
            .cloned()
            .unwrap_or(Value::Null);
        let sender_name = raw_sender
            .get("nickname")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| raw_sender.get("card").and_then(Value::as_str))
            .map(ToString::to_string)
            .or_else(|| {
                event
                    .downcast_ref::<MessageEvent>()
                    .and_then(|m| m.sender.nickname.clone())
            })
            .unwrap_or_default();
        let sender = if raw_sender.is_null() {
            json!({"user_id": user_id, "nickname": sender_name})
        } else {
            raw_sender
        };

        let output = NodeOutput::advance()
            .with("event", event.raw().cloned().unwrap_or(Value::Null))
            .with("post_type", event.kind().as_str())
            .with("message", message_text)
            .with("message_full", message_full)
            .with("message_type", message_type)
            .with("raw_message", raw_message)
            .with("has_image", has_image)
            .with("has_at", has_at)
            .with("user_id", user_id.clone())
            .with("sender.user_id", user_id)
            .with("sender.nickname", sender_name.clone())
            .with("sender", sender)
            .with("sender_name", sender_name)
            .with("group_id", group_id.clone())
            .with("message_id", message_id)
            .with("is_group", !group_id.is_empty())
            .with("protocol", event.protocol())
            .with("bot_id", event.self_id());

        Ok(output)
    }
}

// ============================================================================
// EndNode
// ============================================================================

pub(crate) static END_DESCRIPTOR: Descriptor = Descriptor {
    kind: "end",
    name: "End",
    description: "Workflow terminal: stops execution",
    category: "core",
    inputs: &[],
    outputs: &[],
};

/// Terminates the workflow. Whether the run counts as handled is decided by
/// the engine from the response slot, not by this node.
pub struct EndNode;

impl EndNode {
    /// Registry constructor.
    pub fn create(_config: &Value) -> Box<dyn Node> {
        Box::new(EndNode)
    }
}

#[async_trait]
impl Node for EndNode {
    fn descriptor(&self) -> &'static Descriptor {
        &END_DESCRIPTOR
    }

    async fn execute(&self, _ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        Ok(NodeOutput::advance())
    }

    fn should_break(&self, _output: &NodeOutput) -> bool {
        true
    }
}
