//! Condition node: branch selection over variable comparisons.

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::error::NodeResult;
use crate::node::{Control, Descriptor, Node, NodeOutput, Port};
use crate::nodes::parse_config;

pub(crate) static DESCRIPTOR: Descriptor = Descriptor {
    kind: "condition",
    name: "Condition",
    description: "Branches on variable comparisons",
    category: "logic",
    inputs: &[
        Port { name: "variable_name", label: "Variable to test" },
        Port { name: "compare_value", label: "Comparison target" },
    ],
    outputs: &[Port { name: "result", label: "result - comparison outcome" }],
};

fn default_mode() -> String {
    "simple".to_string()
}

fn default_operator() -> String {
    "equals".to_string()
}

fn default_logic() -> String {
    "AND".to_string()
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConditionConfig {
    #[serde(default = "default_mode")]
    mode: String,
    variable_name: String,
    #[serde(default = "default_operator")]
    condition_type: String,
    compare_value: String,
    #[serde(default = "default_logic")]
    logic_type: String,
    conditions: String,
    true_branch: String,
    false_branch: String,
    stop_after_branch: bool,
}

/// Evaluates a single comparison or a line-delimited condition list and
/// selects `true_branch` / `false_branch`.
///
/// A false result with an empty `false_branch` aborts the workflow (see
/// [`Node::should_break`]).
pub struct ConditionNode {
    config: ConditionConfig,
}

impl ConditionNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(ConditionNode {
            config: parse_config(config),
        })
    }

    fn evaluate_simple(&self, ctx: &WorkflowContext) -> bool {
        let value = ctx.get_string(&self.config.variable_name);
        let target = ctx.render_template(&self.config.compare_value);
        evaluate_operator(&self.config.condition_type, &value, &target)
    }

    fn evaluate_advanced(&self, ctx: &WorkflowContext) -> bool {
        let mut results = Vec::new();
        for line in self.config.conditions.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.splitn(3, '|');
            let (Some(variable), Some(operator)) = (parts.next(), parts.next()) else {
                continue;
            };
            let target_raw = parts.next().unwrap_or("").trim();

            let variable = variable.trim();
            let value = if variable.contains("{{") {
                ctx.render_template(variable)
            } else {
                ctx.get_string(variable)
            };
            let target = ctx.render_template(target_raw);
            results.push(evaluate_operator(operator.trim(), &value, &target));
        }

        if results.is_empty() {
            // No usable conditions defaults to pass.
            return true;
        }
        if self.config.logic_type.eq_ignore_ascii_case("OR") {
            results.into_iter().any(|r| r)
        } else {
            results.into_iter().all(|r| r)
        }
    }
}

#[async_trait]
impl Node for ConditionNode {
    fn descriptor(&self) -> &'static Descriptor {
        &DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let result = if self.config.mode == "advanced" {
            self.evaluate_advanced(ctx)
        } else {
            self.evaluate_simple(ctx)
        };

        let branch = if result {
            &self.config.true_branch
        } else {
            &self.config.false_branch
        };

        let control = if !branch.is_empty() {
            Control::Jump(branch.clone())
        } else if self.config.stop_after_branch {
            Control::Stop
        } else {
            Control::Advance
        };

        Ok(NodeOutput::advance()
            .with("success", true)
            .with("result", result)
            .with_control(control))
    }

    fn should_break(&self, output: &NodeOutput) -> bool {
        // Condition false with nowhere to go aborts the workflow.
        let result = output.get("result").and_then(Value::as_bool).unwrap_or(false);
        !result && matches!(output.control, Control::Advance)
    }
}

/// Evaluates one comparison operator over rendered string values.
pub(crate) fn evaluate_operator(operator: &str, value: &str, target: &str) -> bool {
    match operator {
        "equals" => value == target,
        "not_equals" => value != target,
        "contains" => value.contains(target),
        "not_contains" => !value.contains(target),
        "starts_with" => value.starts_with(target),
        "ends_with" => value.ends_with(target),
        "greater_than" => match (value.parse::<f64>(), target.parse::<f64>()) {
            (Ok(a), Ok(b)) => a > b,
            _ => false,
        },
        "less_than" => match (value.parse::<f64>(), target.parse::<f64>()) {
            (Ok(a), Ok(b)) => a < b,
            _ => false,
        },
        "is_empty" => value.trim().is_empty(),
        "is_not_empty" => !value.trim().is_empty(),
        "regex" => Regex::new(target)
            .map(|re| re.is_match(value))
            .unwrap_or(false),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operators() {
        assert!(evaluate_operator("equals", "a", "a"));
        assert!(evaluate_operator("not_equals", "a", "b"));
        assert!(evaluate_operator("contains", "ping now", "ping"));
        assert!(evaluate_operator("not_contains", "pong", "ping"));
        assert!(evaluate_operator("starts_with", "hello world", "hello"));
        assert!(evaluate_operator("ends_with", "hello world", "world"));
        assert!(evaluate_operator("greater_than", "3.5", "2"));
        assert!(!evaluate_operator("greater_than", "abc", "2"));
        assert!(evaluate_operator("less_than", "1", "2"));
        assert!(evaluate_operator("is_empty", "   ", ""));
        assert!(evaluate_operator("is_not_empty", "x", ""));
        assert!(evaluate_operator("regex", "order-1234", r"order-\d+"));
        assert!(!evaluate_operator("regex", "x", "(unclosed"));
        assert!(!evaluate_operator("no_such_op", "a", "a"));
    }
}
