//! # Trellis Engine
//!
//! The workflow execution engine of the Trellis bot platform.
//!
//! A workflow is an ordered list of typed steps with jump targets. The
//! [`WorkflowEngine`] interprets that list against a per-run
//! [`WorkflowContext`]: conditional branching, loops with explicit body
//! handling, variable scoping with template rendering, and per-step debug
//! instrumentation.
//!
//! ## Layout
//!
//! - [`engine`]: the interpreter loop
//! - [`node`] / [`registry`] / [`nodes`]: the node contract and the
//!   built-in node library
//! - [`context`]: variables, templates, response slot
//! - [`cache`]: precompiled-workflow snapshot used by dispatch
//! - [`debug`]: per-step execution records persisted to the KV store
//! - [`globals`]: the `global.*` template namespace
//! - [`services`]: the collaborator bundle nodes may reach
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trellis_engine::{EngineServices, NodeRegistry, WorkflowEngine};
//!
//! let engine = WorkflowEngine::new(
//!     spec,
//!     "ping",
//!     Some(workflow_id),
//!     Arc::new(NodeRegistry::with_builtins()),
//!     Arc::new(EngineServices::in_memory()),
//! );
//! let outcome = engine.execute(event).await;
//! if outcome.handled {
//!     // send outcome.response through the originating adapter
//! }
//! ```

pub mod cache;
pub mod context;
pub mod debug;
pub mod engine;
pub mod error;
pub mod globals;
pub mod node;
pub mod nodes;
pub mod registry;
pub mod services;

pub use cache::{CachedWorkflow, WorkflowCache};
pub use context::WorkflowContext;
pub use debug::{get_debug_record, DebugRecord, DebugRecorder, StepRecord};
pub use engine::{ExecutionOutcome, WorkflowEngine};
pub use error::{EngineError, NodeResult};
pub use globals::GlobalVariables;
pub use node::{Control, Descriptor, Node, NodeOutput, Port};
pub use nodes::render::HtmlRenderer;
pub use nodes::snippet::{Snippet, SnippetRegistry};
pub use registry::{NodeCtor, NodeRegistry};
pub use services::EngineServices;
