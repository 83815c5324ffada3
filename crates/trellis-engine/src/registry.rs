//! Node registry.
//!
//! An explicit registration table `type string → constructor` paired with
//! each kind's static [`Descriptor`], so the admin surface can enumerate the
//! node library without instantiating anything.

use std::collections::HashMap;

use serde_json::Value;

use crate::node::{Descriptor, Node};
use crate::nodes;

/// Node constructor registered per kind.
pub type NodeCtor = fn(&Value) -> Box<dyn Node>;

/// Registry of available node kinds.
pub struct NodeRegistry {
    entries: HashMap<&'static str, (NodeCtor, &'static Descriptor)>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Creates a registry populated with every built-in node kind.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();

        registry.register(nodes::start::StartNode::create, &nodes::start::START_DESCRIPTOR);
        registry.register(nodes::start::EndNode::create, &nodes::start::END_DESCRIPTOR);
        registry.register(nodes::actions::SendMessageNode::create, &nodes::actions::DESCRIPTOR);
        registry.register(nodes::condition::ConditionNode::create, &nodes::condition::DESCRIPTOR);
        registry.register(nodes::foreach::ForeachNode::create, &nodes::foreach::DESCRIPTOR);
        registry.register(
            nodes::data::SetVariableNode::create,
            &nodes::data::SET_VARIABLE_DESCRIPTOR,
        );
        registry.register(
            nodes::data::StringOperationNode::create,
            &nodes::data::STRING_OP_DESCRIPTOR,
        );
        registry.register(
            nodes::data::JsonExtractNode::create,
            &nodes::data::JSON_EXTRACT_DESCRIPTOR,
        );
        registry.register(nodes::http::HttpRequestNode::create, &nodes::http::DESCRIPTOR);
        registry.register(nodes::storage::DataStorageNode::create, &nodes::storage::DESCRIPTOR);
        registry.register(nodes::render::HtmlRenderNode::create, &nodes::render::DESCRIPTOR);
        registry.register(nodes::snippet::SnippetNode::create, &nodes::snippet::DESCRIPTOR);
        registry.register(nodes::time::DelayNode::create, &nodes::time::DELAY_DESCRIPTOR);
        registry.register(nodes::time::TimestampNode::create, &nodes::time::TIMESTAMP_DESCRIPTOR);
        registry.register(
            nodes::time::ScheduleCheckNode::create,
            &nodes::time::SCHEDULE_CHECK_DESCRIPTOR,
        );
        registry.register(nodes::endpoint::EndpointNode::create, &nodes::endpoint::DESCRIPTOR);
        registry.register(
            nodes::triggers::KeywordTriggerNode::create,
            &nodes::triggers::DESCRIPTOR,
        );

        // Workflow blobs authored against the legacy script node name still
        // resolve.
        registry.register_alias("python_snippet", "snippet");

        registry
    }

    /// Registers a node kind under its descriptor's type string.
    pub fn register(&mut self, ctor: NodeCtor, descriptor: &'static Descriptor) {
        self.entries.insert(descriptor.kind, (ctor, descriptor));
    }

    /// Registers an alternate type string for an already registered kind.
    pub fn register_alias(&mut self, alias: &'static str, kind: &str) {
        if let Some(entry) = self.entries.get(kind).copied() {
            self.entries.insert(alias, entry);
        }
    }

    /// Instantiates a node of `kind` with the given step config.
    pub fn instantiate(&self, kind: &str, config: &Value) -> Option<Box<dyn Node>> {
        self.entries.get(kind).map(|(ctor, _)| ctor(config))
    }

    /// Returns the descriptor of a node kind.
    pub fn descriptor(&self, kind: &str) -> Option<&'static Descriptor> {
        self.entries.get(kind).map(|(_, d)| *d)
    }

    /// Lists all registered descriptors, sorted by kind. Aliases collapse
    /// into their canonical entry.
    pub fn descriptors(&self) -> Vec<&'static Descriptor> {
        let mut all: Vec<_> = self.entries.values().map(|(_, d)| *d).collect();
        all.sort_by_key(|d| d.kind);
        all.dedup_by_key(|d| d.kind);
        all
    }

    /// Lists the distinct categories.
    pub fn categories(&self) -> Vec<&'static str> {
        let mut cats: Vec<_> = self.entries.values().map(|(_, d)| d.category).collect();
        cats.sort_unstable();
        cats.dedup();
        cats
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_builtins_registered() {
        let registry = NodeRegistry::with_builtins();
        for kind in [
            "start",
            "end",
            "send_message",
            "condition",
            "foreach",
            "set_variable",
            "string_operation",
            "json_extract",
            "http_request",
            "data_storage",
            "html_render",
            "snippet",
            "delay",
            "timestamp",
            "schedule_check",
            "endpoint",
            "keyword_trigger",
        ] {
            assert!(registry.descriptor(kind).is_some(), "missing {kind}");
            assert!(registry.instantiate(kind, &json!({})).is_some());
        }
        assert!(registry.instantiate("bogus", &json!({})).is_none());
        // The legacy script node name resolves to the snippet node.
        assert!(registry.instantiate("python_snippet", &json!({})).is_some());
        assert_eq!(registry.descriptors().len(), 17);
    }
}
