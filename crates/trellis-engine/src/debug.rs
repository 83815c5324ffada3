//! Workflow debug recorder.
//!
//! When an engine runs with a workflow id, it records one entry per executed
//! step. The record is persisted to the KV store under
//! `workflow_debug:<workflow_id>` with a one hour TTL, and only when the run
//! produced a response (success) or failed (error) — silent non-matches
//! leave no record behind.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::error;

use trellis_core::{BoxedEvent, Event, KvStore};

/// KV key prefix for debug records.
pub const DEBUG_KEY_PREFIX: &str = "workflow_debug:";

/// Debug record TTL.
pub const DEBUG_TTL: Duration = Duration::from_secs(3600);

const ERROR_LIMIT: usize = 500;

/// One recorded step execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Step id.
    pub id: String,
    /// Node kind.
    #[serde(rename = "type")]
    pub kind: String,
    /// `success` or `error`.
    pub status: String,
    /// Variable snapshot before output capture.
    pub input: Value,
    /// Node output values (truncated).
    pub output: Value,
    /// Error message for failed steps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Step duration in milliseconds.
    pub duration_ms: u64,
}

/// Accumulated record for one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugRecord {
    /// Workflow id.
    pub workflow_id: i64,
    /// Workflow name.
    pub workflow_name: String,
    /// Trigger timestamp (unix seconds).
    pub trigger_time: i64,
    /// Plain text of the triggering message, or a kind marker.
    pub trigger_message: String,
    /// Triggering user, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Triggering group, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// `success` or `error`.
    pub status: String,
    /// Workflow-level error, if the run failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-step records.
    pub nodes: Vec<StepRecord>,
}

/// Collects step records during one engine run.
pub struct DebugRecorder {
    record: DebugRecord,
}

impl DebugRecorder {
    /// Starts recording, capturing trigger details from the event.
    pub fn start(workflow_id: i64, workflow_name: &str, event: &BoxedEvent) -> Self {
        let trigger_message = match event.message() {
            Some(message) => message.extract_plain_text(),
            None => format!("({} event)", event.kind().as_str()),
        };
        Self {
            record: DebugRecord {
                workflow_id,
                workflow_name: workflow_name.to_string(),
                trigger_time: event.time(),
                trigger_message,
                user_id: event.user_id().map(ToString::to_string),
                group_id: event.group_id().map(ToString::to_string),
                status: "running".to_string(),
                error: None,
                nodes: Vec::new(),
            },
        }
    }

    /// Records a completed step.
    pub fn record_step(&mut self, step: StepRecord) {
        self.record.nodes.push(step);
    }

    /// Finalises the record and persists it.
    pub async fn finish(mut self, kv: &dyn KvStore, success: bool, run_error: Option<String>) {
        self.record.status = if success { "success" } else { "error" }.to_string();
        self.record.error = run_error.map(|e| truncate(&e, ERROR_LIMIT));

        let key = format!("{DEBUG_KEY_PREFIX}{}", self.record.workflow_id);
        let payload = match serde_json::to_string(&self.record) {
            Ok(payload) => payload,
            Err(err) => {
                error!(error = %err, "Failed to serialize debug record");
                return;
            }
        };
        if let Err(err) = kv.set(&key, &payload, Some(DEBUG_TTL)).await {
            error!(error = %err, "Failed to save debug record");
        }
    }
}

/// Loads the latest debug record of a workflow.
pub async fn get_debug_record(kv: &dyn KvStore, workflow_id: i64) -> Option<DebugRecord> {
    let key = format!("{DEBUG_KEY_PREFIX}{workflow_id}");
    let payload = kv.get(&key).await.ok()??;
    serde_json::from_str(&payload).ok()
}

fn truncate(s: &str, limit: usize) -> String {
    if s.len() <= limit {
        return s.to_string();
    }
    let mut end = limit;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use trellis_core::{MemoryKv, ScheduledEvent};

    use super::*;

    #[tokio::test]
    async fn test_record_round_trip() {
        let kv = MemoryKv::new();
        let event = BoxedEvent::new(ScheduledEvent {
            protocol: "qq".into(),
            self_id: "1".into(),
            time: 1_700_000_000,
            workflow_name: "morning".into(),
        });

        let mut recorder = DebugRecorder::start(7, "morning", &event);
        recorder.record_step(StepRecord {
            id: "s1".into(),
            kind: "start".into(),
            status: "success".into(),
            input: json!({}),
            output: json!({"message": "hi"}),
            error: None,
            duration_ms: 3,
        });
        recorder.finish(&kv, true, None).await;

        let record = get_debug_record(&kv, 7).await.unwrap();
        assert_eq!(record.workflow_id, 7);
        assert_eq!(record.status, "success");
        assert_eq!(record.nodes.len(), 1);
        assert_eq!(record.trigger_message, "(scheduled event)");
    }
}
