//! Node contract.
//!
//! A node is one step behaviour in a workflow. Each node kind declares a
//! static [`Descriptor`] (name, category, input/output ports) so the admin
//! surface can enumerate the library without instantiating anything, and
//! implements [`Node::execute`] against the per-run
//! [`WorkflowContext`](crate::context::WorkflowContext).
//!
//! # Output capture
//!
//! `execute` returns a [`NodeOutput`]: a value map plus a [`Control`]
//! directive. After a successful step the engine copies every value whose key
//! matches a declared output port into the context. This is the only way
//! declared outputs reach downstream steps; undeclared keys in the map are
//! visible to the engine (and the debug recorder) but not published.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::context::WorkflowContext;
use crate::error::NodeResult;

/// One named input or output port of a node.
#[derive(Debug, Clone, Copy)]
pub struct Port {
    /// Variable name.
    pub name: &'static str,
    /// Human-readable label for the admin surface.
    pub label: &'static str,
}

/// Static metadata describing a node kind.
#[derive(Debug, Clone, Copy)]
pub struct Descriptor {
    /// Type string used in step configs.
    pub kind: &'static str,
    /// Display name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Category for grouping (`core`, `logic`, `control`, `action`, `data`,
    /// `network`, `time`, `trigger`, `other`).
    pub category: &'static str,
    /// Declared input variables.
    pub inputs: &'static [Port],
    /// Declared output variables; only these are auto-captured.
    pub outputs: &'static [Port],
}

/// Control directive attached to a node's output.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Control {
    /// Continue with the next step in the list.
    #[default]
    Advance,
    /// Jump to the step with the given id.
    Jump(String),
    /// Enter a loop: push a frame and jump to the body step.
    StartLoop {
        /// Step id where each iteration begins.
        body: String,
        /// Optional explicit loop end step id.
        end: Option<String>,
        /// Pause between iterations, in seconds.
        delay: f64,
    },
    /// Stop the whole run after this step.
    Stop,
}

/// The result of one node execution.
#[derive(Debug, Clone, Default)]
pub struct NodeOutput {
    /// Produced values, auto-captured per the descriptor's output ports.
    pub values: Map<String, Value>,
    /// Flow control directive.
    pub control: Control,
}

impl NodeOutput {
    /// An empty output that advances to the next step.
    pub fn advance() -> Self {
        Self::default()
    }

    /// An empty output with the given control directive.
    pub fn control(control: Control) -> Self {
        Self {
            values: Map::new(),
            control,
        }
    }

    /// Adds a value.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Replaces the control directive.
    pub fn with_control(mut self, control: Control) -> Self {
        self.control = control;
        self
    }

    /// Jump to `next` when it is set and non-empty, otherwise advance.
    pub fn jump_or_advance(self, next: Option<&str>) -> Self {
        match next {
            Some(id) if !id.is_empty() => self.with_control(Control::Jump(id.to_string())),
            _ => self,
        }
    }

    /// Reads a produced value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }
}

/// One step behaviour.
#[async_trait]
pub trait Node: Send + Sync {
    /// Returns the static descriptor for this node kind.
    fn descriptor(&self) -> &'static Descriptor;

    /// Runs the node against the execution context.
    async fn execute(&self, ctx: &mut WorkflowContext) -> NodeResult<NodeOutput>;

    /// Asks whether the run should stop after this step's output.
    ///
    /// The default never breaks; terminal and gate nodes override this.
    fn should_break(&self, _output: &NodeOutput) -> bool {
        false
    }
}
