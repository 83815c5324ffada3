//! Workflow execution engine.
//!
//! The engine interprets a workflow's ordered step list with a single index
//! loop. Per iteration it instantiates the step's node from the registry,
//! executes it, captures declared outputs, and then applies flow control:
//! loop frames, jumps, stops, and the node's own break decision. A visited
//! set catches jump cycles; entering a loop body clears the body's visited
//! marks so each iteration may re-run it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use trellis_core::{BoxedEvent, Event, Message, TriggerType, WorkflowSpec};

use crate::context::WorkflowContext;
use crate::debug::{DebugRecorder, StepRecord};
use crate::node::Control;
use crate::registry::NodeRegistry;
use crate::services::EngineServices;

/// The result of one engine invocation.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// Whether the workflow produced a response.
    pub handled: bool,
    /// The response message, if produced.
    pub response: Option<Message>,
    /// The workflow's `allow_continue` flag (advisory, see dispatch).
    pub allow_continue: bool,
}

impl ExecutionOutcome {
    fn unhandled(allow_continue: bool) -> Self {
        Self {
            handled: false,
            response: None,
            allow_continue,
        }
    }
}

struct LoopFrame {
    foreach_index: usize,
    foreach_id: String,
    body_index: usize,
    end_id: Option<String>,
}

/// A precompiled interpreter for one workflow.
pub struct WorkflowEngine {
    spec: WorkflowSpec,
    name: String,
    workflow_id: Option<i64>,
    registry: Arc<NodeRegistry>,
    services: Arc<EngineServices>,
}

impl WorkflowEngine {
    /// Creates an engine over a parsed workflow spec.
    pub fn new(
        spec: WorkflowSpec,
        name: impl Into<String>,
        workflow_id: Option<i64>,
        registry: Arc<NodeRegistry>,
        services: Arc<EngineServices>,
    ) -> Self {
        let name = {
            let name = name.into();
            if name.is_empty() {
                spec.name.clone().unwrap_or_else(|| "Unnamed Workflow".into())
            } else {
                name
            }
        };
        Self {
            spec,
            name,
            workflow_id,
            registry,
            services,
        }
    }

    /// Returns the workflow name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the parsed spec.
    pub fn spec(&self) -> &WorkflowSpec {
        &self.spec
    }

    /// Runs the workflow against one event.
    pub async fn execute(&self, event: BoxedEvent) -> ExecutionOutcome {
        let started = std::time::Instant::now();
        let allow_continue = self.spec.allow_continue;

        // Message-triggered workflows only make sense with a message payload.
        if self.spec.trigger_type == TriggerType::Message && event.message().is_none() {
            return ExecutionOutcome::unhandled(allow_continue);
        }

        // Protocol gate: no step runs for a disallowed protocol.
        if !self.spec.allows_protocol(event.protocol()) {
            return ExecutionOutcome::unhandled(allow_continue);
        }

        let mut recorder = self
            .workflow_id
            .map(|id| DebugRecorder::start(id, &self.name, &event));

        let mut ctx = WorkflowContext::new(event, Arc::clone(&self.services));
        let first_error = self.run_steps(&mut ctx, &mut recorder).await;

        let response = ctx.take_response();
        // Only runs with observable effects leave a debug record behind: a
        // produced response, or a step failure.
        if response.is_some() {
            if let Some(recorder) = recorder.take() {
                recorder.finish(self.services.kv.as_ref(), true, None).await;
            }
            info!(
                workflow = %self.name,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Workflow handled event"
            );
        } else if let Some(error) = first_error
            && let Some(recorder) = recorder.take()
        {
            recorder
                .finish(self.services.kv.as_ref(), false, Some(error))
                .await;
        }

        ExecutionOutcome {
            handled: response.is_some(),
            response,
            allow_continue,
        }
    }

    /// Runs the interpreter loop. Returns the first step error, if any step
    /// failed.
    async fn run_steps(
        &self,
        ctx: &mut WorkflowContext,
        recorder: &mut Option<DebugRecorder>,
    ) -> Option<String> {
        let mut first_error: Option<String> = None;
        let steps = &self.spec.workflow;
        let index_map: HashMap<&str, usize> = steps
            .iter()
            .enumerate()
            .map(|(idx, step)| (step.id.as_str(), idx))
            .collect();

        let mut current = 0usize;
        let mut visited: HashSet<String> = HashSet::new();
        let mut loop_stack: Vec<LoopFrame> = Vec::new();

        while current < steps.len() {
            let step = &steps[current];
            let node_id = step.id.clone();

            if visited.contains(&node_id) {
                error!(workflow = %self.name, node = %node_id, "Jump cycle detected, aborting");
                break;
            }
            visited.insert(node_id.clone());

            let Some(node) = self.registry.instantiate(&step.kind, &step.config) else {
                error!(workflow = %self.name, kind = %step.kind, "Unknown node type");
                if let Some(recorder) = recorder {
                    recorder.record_step(StepRecord {
                        id: node_id,
                        kind: step.kind.clone(),
                        status: "error".into(),
                        input: ctx.snapshot(),
                        output: Value::Null,
                        error: Some(format!("unknown node type '{}'", step.kind)),
                        duration_ms: 0,
                    });
                }
                first_error.get_or_insert_with(|| format!("unknown node type '{}'", step.kind));
                current += 1;
                continue;
            };

            let input_snapshot = recorder.as_ref().map(|_| ctx.snapshot());
            let step_started = std::time::Instant::now();
            let result = node.execute(ctx).await;
            let duration_ms = step_started.elapsed().as_millis() as u64;

            let output = match result {
                Ok(output) => output,
                Err(err) => {
                    error!(
                        workflow = %self.name,
                        node = %node_id,
                        kind = %step.kind,
                        error = %err,
                        "Node execution failed"
                    );
                    if let Some(recorder) = recorder {
                        recorder.record_step(StepRecord {
                            id: node_id,
                            kind: step.kind.clone(),
                            status: "error".into(),
                            input: input_snapshot.unwrap_or(Value::Null),
                            output: Value::Null,
                            error: Some(err.to_string()),
                            duration_ms,
                        });
                    }
                    first_error.get_or_insert_with(|| err.to_string());
                    self.apply_on_fail(step.config.get("on_fail"), ctx);
                    current += 1;
                    continue;
                }
            };

            // Auto-capture: declared outputs are the sole publishing channel.
            for port in node.descriptor().outputs {
                if let Some(value) = output.values.get(port.name)
                    && !value.is_null()
                {
                    ctx.set_variable(port.name, value.clone());
                }
            }

            if let Some(recorder) = recorder {
                recorder.record_step(StepRecord {
                    id: node_id.clone(),
                    kind: step.kind.clone(),
                    status: "success".into(),
                    input: input_snapshot.unwrap_or(Value::Null),
                    output: Value::Object(output.values.clone()),
                    error: None,
                    duration_ms,
                });
            }

            if node.should_break(&output) {
                break;
            }

            match output.control {
                Control::StartLoop { body, end, delay } => {
                    if let Some(&body_index) = index_map.get(body.as_str()) {
                        loop_stack.push(LoopFrame {
                            foreach_index: current,
                            foreach_id: node_id,
                            body_index,
                            end_id: end,
                        });
                        visited.remove(&body);
                        current = body_index;
                        if delay > 0.0 {
                            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                        }
                        continue;
                    }
                    error!(workflow = %self.name, body = %body, "Loop body step not found");
                }
                Control::Jump(target) => {
                    if let Some(&idx) = index_map.get(target.as_str()) {
                        current = idx;
                        continue;
                    }
                    warn!(workflow = %self.name, target = %target, "Jump target not found");
                }
                Control::Stop => break,
                Control::Advance => {}
            }

            if let Some(frame) = loop_stack.last() {
                let next = current + 1;
                let should_return = match &frame.end_id {
                    Some(end_id) => node_id == *end_id,
                    None => {
                        next >= steps.len()
                            || next <= frame.foreach_index
                            || steps[next].kind == "end"
                            || visited.contains(&steps[next].id)
                    }
                };
                if should_return {
                    let frame = loop_stack.pop().expect("frame just observed");
                    visited.remove(&frame.foreach_id);
                    if current >= frame.body_index {
                        for step in &steps[frame.body_index..=current] {
                            visited.remove(&step.id);
                        }
                    }
                    debug!(workflow = %self.name, "Loop iteration complete, returning to foreach");
                    current = frame.foreach_index;
                    continue;
                }
            }

            current += 1;
        }

        first_error
    }

    fn apply_on_fail(&self, on_fail: Option<&Value>, ctx: &mut WorkflowContext) {
        let Some(on_fail) = on_fail else { return };
        if on_fail.get("action").and_then(Value::as_str) == Some("send_message") {
            let message = on_fail
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("processing failed");
            ctx.set_response(Message::text(message));
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use trellis_core::{MessageEvent, MessageScene, ScheduledEvent, Segment, Sender};

    use super::*;

    fn message_event(text: &str) -> BoxedEvent {
        BoxedEvent::new(MessageEvent {
            protocol: "onebot",
            self_id: "10000".into(),
            time: 1_700_000_000,
            scene: MessageScene::Group,
            message_id: "m1".into(),
            sender: Sender {
                user_id: "42".into(),
                nickname: Some("tester".into()),
                role: None,
            },
            group_id: Some("777".into()),
            channel_id: None,
            guild_id: None,
            message: Message::from_segments(vec![Segment::text(text)]),
            to_me: true,
            raw: json!({"post_type": "message"}),
        })
    }

    fn engine_for(config: Value) -> WorkflowEngine {
        let spec = WorkflowSpec::from_value(&config).unwrap();
        WorkflowEngine::new(
            spec,
            "test",
            None,
            Arc::new(NodeRegistry::with_builtins()),
            Arc::new(EngineServices::in_memory()),
        )
    }

    #[tokio::test]
    async fn test_condition_branch_produces_reply() {
        // start → condition(message contains "ping", true→reply) → reply → end
        let engine = engine_for(json!({
            "trigger_type": "message",
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "condition", "config": {
                    "mode": "simple",
                    "variable_name": "message",
                    "condition_type": "contains",
                    "compare_value": "ping",
                    "true_branch": "reply",
                    "false_branch": ""
                }},
                {"id": "reply", "type": "send_message", "config": {
                    "message_type": "text",
                    "content": "pong"
                }},
                {"id": "s4", "type": "end"}
            ]
        }));

        let outcome = engine.execute(message_event("ping now")).await;
        assert!(outcome.handled);
        assert_eq!(outcome.response.unwrap().extract_plain_text(), "pong");
    }

    #[tokio::test]
    async fn test_condition_false_without_branch_aborts() {
        let engine = engine_for(json!({
            "trigger_type": "message",
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "condition", "config": {
                    "variable_name": "message",
                    "condition_type": "contains",
                    "compare_value": "ping"
                }},
                {"id": "s3", "type": "send_message", "config": {"content": "pong"}},
                {"id": "s4", "type": "end"}
            ]
        }));

        let outcome = engine.execute(message_event("hello")).await;
        assert!(!outcome.handled);
        assert!(outcome.response.is_none());
    }

    #[tokio::test]
    async fn test_start_end_only_is_unhandled() {
        let engine = engine_for(json!({
            "trigger_type": "message",
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "end"}
            ]
        }));
        let outcome = engine.execute(message_event("anything")).await;
        assert!(!outcome.handled);
    }

    #[tokio::test]
    async fn test_protocol_gate() {
        let engine = engine_for(json!({
            "trigger_type": "message",
            "protocols": ["qq"],
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "send_message", "config": {"content": "hi"}},
                {"id": "s3", "type": "end"}
            ]
        }));
        // The event's protocol is onebot, which is not allowlisted.
        let outcome = engine.execute(message_event("x")).await;
        assert!(!outcome.handled);
    }

    #[tokio::test]
    async fn test_foreach_iterates_list() {
        // The loop body sits immediately before the end step, so each
        // iteration returns to the foreach; exhaustion jumps to "after".
        let engine = engine_for(json!({
            "trigger_type": "message",
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "set_variable", "config": {
                    "variable_name": "payload",
                    "variable_value": "{\"items\": [{\"name\": \"a\"}, {\"name\": \"b\"}]}"
                }},
                {"id": "s3", "type": "json_extract", "config": {
                    "json_source": "payload",
                    "extract_path": "items",
                    "save_to": "items"
                }},
                {"id": "loop", "type": "foreach", "config": {
                    "list_variable": "items",
                    "item_variable": "item",
                    "loop_body": "body",
                    "next_node": "after"
                }},
                {"id": "after", "type": "send_message", "config": {
                    "content": "{{names}}",
                    "next_node": "s7"
                }},
                {"id": "body", "type": "set_variable", "config": {
                    "variable_name": "names",
                    "variable_value": "{{names}}{{item.name}}"
                }},
                {"id": "s7", "type": "end"}
            ]
        }));

        let outcome = engine.execute(message_event("go")).await;
        assert!(outcome.handled);
        assert_eq!(outcome.response.unwrap().extract_plain_text(), "ab");
    }

    #[tokio::test]
    async fn test_foreach_materialises_map_as_key_value_pairs() {
        // Iterating a map binds each element as {key, value}.
        let engine = engine_for(json!({
            "trigger_type": "message",
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "set_variable", "config": {
                    "variable_name": "scores_json",
                    "variable_value": "{\"alice\": 3, \"bob\": 5}"
                }},
                {"id": "s3", "type": "json_extract", "config": {
                    "json_source": "scores_json",
                    "extract_path": "",
                    "save_to": "scores"
                }},
                {"id": "loop", "type": "foreach", "config": {
                    "list_variable": "scores",
                    "item_variable": "entry",
                    "loop_body": "body",
                    "next_node": "after"
                }},
                {"id": "after", "type": "send_message", "config": {
                    "content": "{{pairs}}",
                    "next_node": "s7"
                }},
                {"id": "body", "type": "set_variable", "config": {
                    "variable_name": "pairs",
                    "variable_value": "{{pairs}}{{entry.key}}={{entry.value}};"
                }},
                {"id": "s7", "type": "end"}
            ]
        }));

        let outcome = engine.execute(message_event("go")).await;
        assert!(outcome.handled);
        // Map keys iterate in sorted order.
        assert_eq!(
            outcome.response.unwrap().extract_plain_text(),
            "alice=3;bob=5;"
        );
    }

    #[tokio::test]
    async fn test_foreach_empty_list_advances_to_next_node() {
        let engine = engine_for(json!({
            "trigger_type": "message",
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "set_variable", "config": {
                    "variable_name": "empty_json",
                    "variable_value": "[]"
                }},
                {"id": "s3", "type": "json_extract", "config": {
                    "json_source": "empty_json",
                    "extract_path": "",
                    "save_to": "items"
                }},
                {"id": "loop", "type": "foreach", "config": {
                    "list_variable": "items",
                    "loop_body": "body",
                    "next_node": "after"
                }},
                {"id": "body", "type": "send_message", "config": {"content": "never"}},
                {"id": "after", "type": "send_message", "config": {"content": "done"}},
                {"id": "s7", "type": "end"}
            ]
        }));

        let outcome = engine.execute(message_event("go")).await;
        assert!(outcome.handled);
        assert_eq!(outcome.response.unwrap().extract_plain_text(), "done");
    }

    #[tokio::test]
    async fn test_jump_cycle_detected() {
        // s2 jumps back to itself through s3; the visited set stops the run.
        let engine = engine_for(json!({
            "trigger_type": "message",
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "condition", "config": {
                    "variable_name": "message",
                    "condition_type": "is_not_empty",
                    "true_branch": "s3"
                }},
                {"id": "s3", "type": "condition", "config": {
                    "variable_name": "message",
                    "condition_type": "is_not_empty",
                    "true_branch": "s2"
                }},
                {"id": "s4", "type": "end"}
            ]
        }));

        let outcome = engine.execute(message_event("loop")).await;
        assert!(!outcome.handled);
    }

    #[tokio::test]
    async fn test_keyword_trigger_breaks_on_miss() {
        let engine = engine_for(json!({
            "trigger_type": "message",
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "keyword_trigger", "config": {
                    "keywords": "weather\nforecast"
                }},
                {"id": "s3", "type": "send_message", "config": {"content": "matched"}},
                {"id": "s4", "type": "end"}
            ]
        }));

        let miss = engine.execute(message_event("hello")).await;
        assert!(!miss.handled);

        let hit = engine.execute(message_event("weather today")).await;
        assert!(hit.handled);
    }

    #[tokio::test]
    async fn test_on_fail_send_message() {
        // The snippet node fails (unknown snippet); on_fail produces a reply.
        let engine = engine_for(json!({
            "trigger_type": "message",
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "snippet", "config": {
                    "name": "missing",
                    "on_fail": {"action": "send_message", "message": "something broke"}
                }},
                {"id": "s3", "type": "end"}
            ]
        }));

        let outcome = engine.execute(message_event("x")).await;
        assert!(outcome.handled);
        assert_eq!(
            outcome.response.unwrap().extract_plain_text(),
            "something broke"
        );
    }

    #[tokio::test]
    async fn test_scheduled_event_runs_schedule_workflow() {
        let engine = engine_for(json!({
            "trigger_type": "schedule",
            "workflow": [
                {"id": "s1", "type": "start"},
                {"id": "s2", "type": "send_message", "config": {"content": "tick"}},
                {"id": "s3", "type": "end"}
            ]
        }));

        let event = BoxedEvent::new(ScheduledEvent {
            protocol: "onebot".into(),
            self_id: "10000".into(),
            time: 1_700_000_000,
            workflow_name: "morning".into(),
        });
        let outcome = engine.execute(event).await;
        assert!(outcome.handled);
        assert_eq!(outcome.response.unwrap().extract_plain_text(), "tick");
    }
}
