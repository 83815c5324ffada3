//! Per-execution workflow context.
//!
//! A [`WorkflowContext`] is created fresh for every engine invocation and is
//! never shared across workflows. It holds the triggering event, the variable
//! map, the response slot, and a handle to the shared
//! [`EngineServices`](crate::services::EngineServices).
//!
//! # Variable resolution
//!
//! [`WorkflowContext::get_variable`] checks the literal key first, then
//! descends dotted paths through objects (and arrays by numeric index), and
//! finally falls back to the caller's default.
//!
//! # Templates
//!
//! [`WorkflowContext::render_template`] renders `{{expr}}` substitutions over
//! the variable map plus the `global.*` namespace. Control flow belongs to
//! the node graph, not to templates. A `json_safe` filter is provided for
//! embedding strings inside JSON literals.

use std::collections::HashMap;
use std::sync::Arc;

use minijinja::Environment;
use serde_json::{Map, Value, json};

use trellis_core::{BoxedEvent, Event, Message};

use crate::services::EngineServices;

/// Variables exceeding this length are truncated in debug snapshots.
const SNAPSHOT_VALUE_LIMIT: usize = 500;

/// The per-execution variable store and response slot.
pub struct WorkflowContext {
    /// The triggering event (borrowed semantics: weak bot handle inside).
    pub event: BoxedEvent,
    /// Shared collaborator bundle.
    pub services: Arc<EngineServices>,
    variables: HashMap<String, Value>,
    response: Option<Message>,
}

impl WorkflowContext {
    /// Creates a context for one engine invocation.
    pub fn new(event: BoxedEvent, services: Arc<EngineServices>) -> Self {
        let mut variables = HashMap::new();
        // The original payload is always reachable for extraction nodes.
        if let Some(raw) = event.raw() {
            variables.insert("raw_data".to_string(), raw.clone());
        }
        Self {
            event,
            services,
            variables,
            response: None,
        }
    }

    /// Sets a variable.
    pub fn set_variable(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.variables.insert(key.into(), value.into());
    }

    /// Removes a variable.
    pub fn remove_variable(&mut self, key: &str) {
        self.variables.remove(key);
    }

    /// Gets a variable, supporting dotted access into nested values.
    pub fn get_variable(&self, key: &str) -> Option<Value> {
        // The literal key wins over any dotted interpretation.
        if let Some(value) = self.variables.get(key) {
            return Some(value.clone());
        }
        if !key.contains('.') {
            return None;
        }

        let mut parts = key.split('.');
        let mut current = self.variables.get(parts.next()?)?.clone();
        for part in parts {
            let next = match &current {
                Value::Object(map) => map.get(part).cloned(),
                Value::Array(items) => part.parse::<usize>().ok().and_then(|i| items.get(i).cloned()),
                _ => None,
            };
            match next {
                Some(Value::Null) | None => return None,
                Some(value) => current = value,
            }
        }
        Some(current)
    }

    /// Gets a variable rendered as a display string (objects/arrays as JSON).
    pub fn get_string(&self, key: &str) -> String {
        match self.get_variable(key) {
            Some(Value::String(s)) => s,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// Renders a `{{...}}` template over the variables and `global.*`.
    ///
    /// Render failures return the template unchanged so a workflow keeps
    /// producing output even with a malformed template in one field.
    pub fn render_template(&self, template: &str) -> String {
        if !template.contains("{{") {
            return template.to_string();
        }

        let mut env = Environment::new();
        env.add_filter("json_safe", json_safe);

        let mut scope = Map::new();
        for (key, value) in &self.variables {
            if key.starts_with('_') {
                continue;
            }
            scope.insert(key.clone(), value.clone());
        }
        scope.insert("global".to_string(), json!(self.services.globals.get_all()));

        match env.render_str(template, Value::Object(scope)) {
            Ok(rendered) => rendered,
            Err(err) => {
                tracing::debug!(error = %err, "Template render failed, returning raw template");
                template.to_string()
            }
        }
    }

    /// Sets the response message and marks the run as handled.
    pub fn set_response(&mut self, message: Message) {
        self.response = Some(message);
        self.variables.insert("_handled".to_string(), json!(true));
    }

    /// Returns the response, if one was produced.
    pub fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    /// Takes the response out of the context.
    pub fn take_response(&mut self) -> Option<Message> {
        self.response.take()
    }

    /// Serializable snapshot of the variables for debug records.
    ///
    /// Internal (`_`-prefixed) keys are dropped; long strings are truncated.
    pub fn snapshot(&self) -> Value {
        let mut map = Map::new();
        for (key, value) in &self.variables {
            if key.starts_with('_') {
                continue;
            }
            let value = match value {
                Value::String(s) if s.len() > SNAPSHOT_VALUE_LIMIT => {
                    let cut = truncate_utf8(s, SNAPSHOT_VALUE_LIMIT);
                    Value::String(format!("{cut}..."))
                }
                other => other.clone(),
            };
            map.insert(key.clone(), value);
        }
        Value::Object(map)
    }
}

fn truncate_utf8(s: &str, limit: usize) -> &str {
    if s.len() <= limit {
        return s;
    }
    let mut end = limit;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Escapes a string for safe embedding inside a JSON literal: the JSON
/// encoding of the string without the surrounding quotes.
fn json_safe(value: String) -> String {
    if value.is_empty() {
        return String::new();
    }
    let encoded = serde_json::to_string(&value).unwrap_or_default();
    encoded
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(&encoded)
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;
    use trellis_core::ScheduledEvent;

    use super::*;

    fn test_context() -> WorkflowContext {
        let event = BoxedEvent::new(ScheduledEvent {
            protocol: "onebot".into(),
            self_id: "1".into(),
            time: 0,
            workflow_name: "test".into(),
        });
        WorkflowContext::new(event, Arc::new(EngineServices::in_memory()))
    }

    #[test]
    fn test_literal_key_wins_over_dotted() {
        let mut ctx = test_context();
        ctx.set_variable("sender.user_id", json!("42"));
        ctx.set_variable("sender", json!({"user_id": "99"}));
        assert_eq!(ctx.get_variable("sender.user_id"), Some(json!("42")));
    }

    #[test]
    fn test_dotted_descent() {
        let mut ctx = test_context();
        ctx.set_variable(
            "response_json",
            json!({"items": [{"name": "a"}, {"name": "b"}], "code": 0}),
        );
        assert_eq!(
            ctx.get_variable("response_json.items.1.name"),
            Some(json!("b"))
        );
        assert_eq!(ctx.get_variable("response_json.code"), Some(json!(0)));
        assert_eq!(ctx.get_variable("response_json.missing"), None);
    }

    #[test]
    fn test_render_template() {
        let mut ctx = test_context();
        ctx.set_variable("user_id", json!("42"));
        ctx.set_variable("item", json!({"name": "widget"}));
        assert_eq!(ctx.render_template("hi {{user_id}}"), "hi 42");
        assert_eq!(ctx.render_template("{{item.name}}"), "widget");
        assert_eq!(ctx.render_template("no template"), "no template");
    }

    #[test]
    fn test_render_template_globals() {
        let ctx = test_context();
        ctx.services.globals.put_cached("api_key", "secret");
        assert_eq!(ctx.render_template("key={{global.api_key}}"), "key=secret");
    }

    #[test]
    fn test_render_failure_returns_raw() {
        let ctx = test_context();
        let raw = "{{ unclosed";
        assert_eq!(ctx.render_template(raw), raw);
    }

    #[test]
    fn test_json_safe_filter() {
        let mut ctx = test_context();
        ctx.set_variable("msg", json!("line\n\"quoted\""));
        assert_eq!(
            ctx.render_template("{{msg|json_safe}}"),
            "line\\n\\\"quoted\\\""
        );
    }

    #[test]
    fn test_set_response_marks_handled() {
        let mut ctx = test_context();
        assert!(ctx.response().is_none());
        ctx.set_response(Message::text("pong"));
        assert_eq!(ctx.get_variable("_handled"), Some(json!(true)));
        assert!(ctx.response().is_some());
    }

    #[test]
    fn test_snapshot_filters_internal_keys() {
        let mut ctx = test_context();
        ctx.set_variable("visible", json!(1));
        ctx.set_variable("_handled", json!(true));
        ctx.set_variable("long", json!("x".repeat(600)));

        let snap = ctx.snapshot();
        assert!(snap.get("visible").is_some());
        assert!(snap.get("_handled").is_none());
        let long = snap.get("long").unwrap().as_str().unwrap();
        assert!(long.len() < 600);
        assert!(long.ends_with("..."));
    }
}
