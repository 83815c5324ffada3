//! Workflow configuration format.
//!
//! Workflows are persisted as an opaque JSON blob in `workflows.config`;
//! [`WorkflowSpec`] is the typed view the engine, cache, and scheduler share.
//!
//! ```json
//! { "trigger_type": "message",
//!   "protocols": ["qq"],
//!   "allow_continue": true,
//!   "event_filter": ["group_increase"],
//!   "schedule": { "type": "cron", "cron": "0 8 * * *" },
//!   "workflow": [ { "id": "s1", "type": "start", "config": {} }, ... ] }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::EventKind;

/// What kind of events a workflow fires on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Chat messages.
    #[default]
    Message,
    /// Notice events.
    Notice,
    /// Request events.
    Request,
    /// Scheduler ticks.
    Schedule,
}

impl TriggerType {
    /// Maps an event kind to the trigger type it activates.
    pub fn for_event(kind: EventKind) -> Option<Self> {
        match kind {
            EventKind::Message => Some(TriggerType::Message),
            EventKind::Notice => Some(TriggerType::Notice),
            EventKind::Request => Some(TriggerType::Request),
            EventKind::Scheduled => Some(TriggerType::Schedule),
            EventKind::Meta => None,
        }
    }

    /// Returns the canonical name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::Message => "message",
            TriggerType::Notice => "notice",
            TriggerType::Request => "request",
            TriggerType::Schedule => "schedule",
        }
    }
}

/// A schedule attached to a `trigger_type = "schedule"` workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// 5-field cron expression (minute hour day month weekday).
    Cron {
        /// The cron expression.
        cron: String,
    },
    /// Fixed interval in minutes.
    Interval {
        /// Interval length in minutes.
        interval_minutes: u64,
    },
}

/// One step descriptor in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    /// Stable step id; used for loop membership and jump targets.
    pub id: String,
    /// Node kind selecting the behaviour.
    #[serde(rename = "type")]
    pub kind: String,
    /// Node-specific configuration.
    #[serde(default)]
    pub config: Value,
}

/// Typed view of a workflow's stored config blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowSpec {
    /// Optional display name embedded in the blob.
    pub name: Option<String>,
    /// What the workflow fires on.
    pub trigger_type: TriggerType,
    /// Protocol allowlist; empty means all protocols.
    pub protocols: Vec<String>,
    /// Whether later workflows may still handle the same event. Advisory:
    /// the dispatcher drains every spawned workflow regardless.
    #[serde(default = "default_true")]
    pub allow_continue: bool,
    /// Notice/request sub-kind allowlist; empty means all.
    pub event_filter: Vec<String>,
    /// Schedule, for `trigger_type = "schedule"`.
    pub schedule: Option<ScheduleSpec>,
    /// Ordered step list. The first step must be a `start` node.
    pub workflow: Vec<StepSpec>,
}

fn default_true() -> bool {
    true
}

impl Default for WorkflowSpec {
    fn default() -> Self {
        Self {
            name: None,
            trigger_type: TriggerType::default(),
            protocols: Vec::new(),
            allow_continue: true,
            event_filter: Vec::new(),
            schedule: None,
            workflow: Vec::new(),
        }
    }
}

impl WorkflowSpec {
    /// Parses a stored config blob, tolerating unknown fields.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }

    /// Returns true if the event's protocol passes this workflow's
    /// allowlist.
    pub fn allows_protocol(&self, protocol: &str) -> bool {
        self.protocols.is_empty() || self.protocols.iter().any(|p| p == protocol)
    }

    /// Returns true if the notice/request sub-name passes the event filter.
    pub fn allows_event(&self, sub_name: &str) -> bool {
        self.event_filter.is_empty() || self.event_filter.iter().any(|e| e == sub_name)
    }

    /// Structural validation: non-empty step list beginning with `start`.
    pub fn validate(&self) -> Result<(), String> {
        let Some(first) = self.workflow.first() else {
            return Err("workflow has no steps".into());
        };
        if first.kind != "start" {
            return Err(format!(
                "first step must be 'start', found '{}'",
                first.kind
            ));
        }
        Ok(())
    }
}
