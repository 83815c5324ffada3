//! Unified error types for the Trellis core.
//!
//! Errors are grouped by behavioural class rather than by origin: transport
//! failures may be retried by the owning adapter, adapter errors surface to
//! the bot manager, API errors surface to the calling workflow node, and
//! store errors surface to whoever queried the store.

use thiserror::Error;

// =============================================================================
// Transport Errors
// =============================================================================

/// Errors that can occur in transport operations.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {url} - {reason}")]
    ConnectionFailed {
        /// The URL that failed to connect.
        url: String,
        /// Reason for failure.
        reason: String,
    },

    /// Connection closed.
    #[error("connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for closure.
        reason: String,
    },

    /// Message send failed.
    #[error("failed to send message: {0}")]
    SendFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

// =============================================================================
// Adapter Errors
// =============================================================================

/// Errors that can occur in adapter operations.
#[derive(Debug, Clone, Error)]
pub enum AdapterError {
    /// The requested protocol has no registered adapter.
    #[error("unknown protocol '{0}'")]
    UnknownProtocol(String),

    /// Adapter configuration was rejected at start.
    #[error("invalid adapter config: {0}")]
    InvalidConfig(String),

    /// Adapter failed to start within its budget.
    #[error("adapter start timed out after {0}s")]
    StartTimeout(u64),

    /// Event parsing failed.
    #[error("failed to parse event: {reason}")]
    ParseError {
        /// Reason for failure.
        reason: String,
    },

    /// Internal adapter error.
    #[error("adapter error: {0}")]
    Internal(String),

    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

// =============================================================================
// API Errors
// =============================================================================

/// Error type for outbound platform API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The bot is not connected.
    #[error("bot is not connected")]
    NotConnected,
    /// The API call timed out.
    #[error("API call timed out")]
    Timeout,
    /// The platform returned an error.
    #[error("API error ({code}): {message}")]
    Platform { code: i64, message: String },
    /// The platform rejected authentication.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// Failed to serialize/deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The event does not carry the session info needed to route a send.
    #[error("missing session info")]
    MissingSession,
    /// The action is not supported by this adapter.
    #[error("unsupported action '{0}'")]
    UnsupportedAction(String),
    /// Transport error.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors surfaced by the record and key-value stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The backing store failed.
    #[error("store backend error: {0}")]
    Backend(String),
    /// A stored value could not be decoded.
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Result type for adapter operations.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
