//! Snippet node: a capability slot for user-supplied logic.
//!
//! Instead of executing interpreted scripts, snippets are native handlers
//! implementing [`Snippet`] and registered by name at build time. A snippet
//! receives the full execution context and may read variables, set
//! variables, and produce the response.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::context::WorkflowContext;
use crate::error::{EngineError, NodeResult};
use crate::node::{Descriptor, Node, NodeOutput};
use crate::nodes::parse_config;

/// A named, user-supplied handler runnable from a workflow step.
#[async_trait]
pub trait Snippet: Send + Sync {
    /// Runs against the execution context. The returned value is published
    /// as the `snippet_result` variable.
    async fn run(&self, ctx: &mut WorkflowContext) -> NodeResult<Value>;
}

/// Registry of snippet handlers, populated before the runtime starts.
#[derive(Default)]
pub struct SnippetRegistry {
    snippets: HashMap<String, Arc<dyn Snippet>>,
}

impl SnippetRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a snippet under a name.
    pub fn register(&mut self, name: impl Into<String>, snippet: Arc<dyn Snippet>) {
        self.snippets.insert(name.into(), snippet);
    }

    /// Looks up a snippet.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Snippet>> {
        self.snippets.get(name).cloned()
    }

    /// Lists the registered names.
    pub fn names(&self) -> Vec<&str> {
        self.snippets.keys().map(String::as_str).collect()
    }
}

pub(crate) static DESCRIPTOR: Descriptor = Descriptor {
    kind: "snippet",
    name: "Snippet",
    description: "Runs a registered snippet handler",
    category: "action",
    inputs: &[],
    outputs: &[crate::node::Port {
        name: "snippet_result",
        label: "snippet_result - handler return value",
    }],
};

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct SnippetConfig {
    name: String,
}

/// Runs the snippet named in the step config.
pub struct SnippetNode {
    config: SnippetConfig,
}

impl SnippetNode {
    /// Registry constructor.
    pub fn create(config: &Value) -> Box<dyn Node> {
        Box::new(SnippetNode {
            config: parse_config(config),
        })
    }
}

#[async_trait]
impl Node for SnippetNode {
    fn descriptor(&self) -> &'static Descriptor {
        &DESCRIPTOR
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput> {
        let snippet = ctx
            .services
            .snippets
            .get(&self.config.name)
            .ok_or_else(|| EngineError::Node(format!("unknown snippet '{}'", self.config.name)))?;

        let result = snippet.run(ctx).await?;
        Ok(NodeOutput::advance()
            .with("success", true)
            .with("snippet_result", result))
    }
}
