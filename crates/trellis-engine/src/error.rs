//! Engine error types.

use thiserror::Error;

/// Errors surfaced by node execution and the engine loop.
///
/// Node failures do not abort the workflow: the engine records them, runs the
/// step's `on_fail` side effect if one is configured, and advances.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The step references a node kind the registry does not know.
    #[error("unknown node type '{0}'")]
    UnknownNode(String),

    /// The node's configuration is unusable.
    #[error("node config error: {0}")]
    Config(String),

    /// The node ran and failed.
    #[error("{0}")]
    Node(String),

    /// File I/O failure (data storage node).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Outbound platform API failure.
    #[error(transparent)]
    Api(#[from] trellis_core::ApiError),
}

/// Result type for node execution.
pub type NodeResult<T> = Result<T, EngineError>;
