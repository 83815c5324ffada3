//! Time utility nodes: delay, timestamp, schedule window check.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Timelike, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::error::NodeResult;
use crate::node::{Descriptor, Node, NodeOutput, Port};
use crate::nodes::{lenient_f64, parse_config};

// ============================================================================
// DelayNode
// ============================================================================

pub(crate) static DELAY_DESCRIPTOR: Descriptor = Descriptor {
    kind: "delay",
    name: "Delay",
    description: "Pauses the workflow for a number of seconds",
    category: "time",
    inputs: &[],
    outputs: &[],
};

fn default_delay() -> Value {
    Value::String("1".to_string())
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct DelayConfig {
    #[serde(default = "default_delay")]
    delay_seconds: Value,
}

/// Async sleep for a fractional number of seconds.
pub struct DelayNode {
    config: DelayConfig,
}

impl DelayNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(DelayNode {
            config: parse_config(config),
        })
    }
}

#[async_trait]
impl Node for DelayNode {
    fn descriptor(&self) -> &'static Descriptor {
        &DELAY_DESCRIPTOR
    }

    async fn execute(&self, _ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let Some(seconds) = lenient_f64(&self.config.delay_seconds) else {
            return Ok(NodeOutput::advance()
                .with("success", false)
                .with("error", "Invalid delay value"));
        };
        if seconds > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        }
        Ok(NodeOutput::advance()
            .with("success", true)
            .with("delayed", seconds))
    }
}

// ============================================================================
// TimestampNode
// ============================================================================

pub(crate) static TIMESTAMP_DESCRIPTOR: Descriptor = Descriptor {
    kind: "timestamp",
    name: "Timestamp",
    description: "Publishes the current time in the configured timezone",
    category: "time",
    inputs: &[],
    outputs: &[
        Port { name: "timestamp", label: "timestamp - unix seconds" },
        Port { name: "datetime", label: "datetime - formatted date-time" },
        Port { name: "date", label: "date - YYYY-MM-DD" },
        Port { name: "time", label: "time - HH:MM:SS" },
        Port { name: "year", label: "year" },
        Port { name: "month", label: "month" },
        Port { name: "day", label: "day" },
        Port { name: "hour", label: "hour" },
        Port { name: "minute", label: "minute" },
        Port { name: "weekday", label: "weekday - day name" },
    ],
};

fn default_format() -> String {
    "%Y-%m-%d %H:%M:%S".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct TimestampConfig {
    #[serde(default = "default_format")]
    format: String,
}

/// Current time decomposed into workflow variables.
pub struct TimestampNode {
    config: TimestampConfig,
}

impl TimestampNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(TimestampNode {
            config: parse_config(config),
        })
    }
}

#[async_trait]
impl Node for TimestampNode {
    fn descriptor(&self) -> &'static Descriptor {
        &TIMESTAMP_DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let now = Utc::now().with_timezone(&ctx.services.timezone);
        let weekday = now.format("%A").to_string();

        Ok(NodeOutput::advance()
            .with("success", true)
            .with("timestamp", now.timestamp())
            .with("datetime", now.format(&self.config.format).to_string())
            .with("date", now.format("%Y-%m-%d").to_string())
            .with("time", now.format("%H:%M:%S").to_string())
            .with("year", now.year())
            .with("month", now.month())
            .with("day", now.day())
            .with("hour", now.hour())
            .with("minute", now.minute())
            .with("weekday", weekday))
    }
}

// ============================================================================
// ScheduleCheckNode
// ============================================================================

pub(crate) static SCHEDULE_CHECK_DESCRIPTOR: Descriptor = Descriptor {
    kind: "schedule_check",
    name: "Schedule check",
    description: "Tests whether the current time falls in a daily window",
    category: "time",
    inputs: &[],
    outputs: &[
        Port { name: "in_schedule", label: "in_schedule - inside the window" },
        Port { name: "current_time", label: "current_time - HH:MM:SS" },
    ],
};

fn default_start() -> String {
    "00:00".to_string()
}

fn default_end() -> String {
    "23:59".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ScheduleCheckConfig {
    #[serde(default = "default_start")]
    start_time: String,
    #[serde(default = "default_end")]
    end_time: String,
    weekdays_only: bool,
}

/// HH:MM window check with an optional weekday restriction.
pub struct ScheduleCheckNode {
    config: ScheduleCheckConfig,
}

impl ScheduleCheckNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(ScheduleCheckNode {
            config: parse_config(config),
        })
    }
}

fn parse_minutes(hhmm: &str) -> Option<u32> {
    let (h, m) = hhmm.split_once(':')?;
    let h: u32 = h.trim().parse().ok()?;
    let m: u32 = m.trim().parse().ok()?;
    Some(h * 60 + m)
}

#[async_trait]
impl Node for ScheduleCheckNode {
    fn descriptor(&self) -> &'static Descriptor {
        &SCHEDULE_CHECK_DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let now = Utc::now().with_timezone(&ctx.services.timezone);
        let current_time = now.format("%H:%M:%S").to_string();

        if self.config.weekdays_only
            && now.weekday().number_from_monday() >= 6
        {
            return Ok(NodeOutput::advance()
                .with("success", true)
                .with("in_schedule", false)
                .with("current_time", current_time)
                .with("reason", "weekend"));
        }

        let (Some(start), Some(end)) = (
            parse_minutes(&self.config.start_time),
            parse_minutes(&self.config.end_time),
        ) else {
            return Ok(NodeOutput::advance()
                .with("success", false)
                .with("in_schedule", false)
                .with("current_time", current_time)
                .with("error", "invalid time format, expected HH:MM"));
        };

        let current = now.hour() * 60 + now.minute();
        let in_schedule = start <= current && current <= end;

        Ok(NodeOutput::advance()
            .with("success", true)
            .with("in_schedule", in_schedule)
            .with("current_time", current_time))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minutes() {
        assert_eq!(parse_minutes("09:00"), Some(540));
        assert_eq!(parse_minutes("23:59"), Some(1439));
        assert_eq!(parse_minutes("bogus"), None);
        assert_eq!(parse_minutes("9"), None);
    }
}
