//! Adapter contract.
//!
//! An adapter owns everything protocol-specific for one bot: the connection
//! (or the inbound webhook registration), the bot instance, and the
//! translation between wire payloads and the core [`Event`](crate::event::Event)
//! / [`Message`](crate::message::Message) model.
//!
//! # Lifecycle
//!
//! ```text
//! stopped ──start()──▶ starting ──▶ running ──stop()──▶ stopping ──▶ stopped
//!                          │
//!                          └─(failure, last_error set)──▶ stopped
//! ```
//!
//! A crashed run-loop flips the adapter back to `stopped` but never restarts
//! itself; the bot manager's restart command is the only reopener.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::bot::Bot;
use crate::error::{AdapterResult, ApiResult};
use crate::event::BoxedEvent;

/// How long an adapter may spend establishing its connection in `start`.
pub const START_BUDGET_SECS: u64 = 10;

/// Callback invoked for every parsed inbound event.
pub type EventHandler = Arc<dyn Fn(BoxedEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Adapter lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// Not running.
    Stopped,
    /// `start` in progress.
    Starting,
    /// Connected and handling events.
    Running,
    /// `stop` in progress.
    Stopping,
}

/// A point-in-time snapshot of an adapter's runtime state.
#[derive(Debug, Clone)]
pub struct AdapterStatus {
    /// Lifecycle state.
    pub state: AdapterState,
    /// Last start/run error, if any.
    pub last_error: Option<String>,
    /// Number of events handled since start.
    pub message_count: u64,
    /// Unix timestamp of the last successful start.
    pub started_at: Option<i64>,
}

impl AdapterStatus {
    /// A stopped adapter with no history.
    pub fn stopped() -> Self {
        Self {
            state: AdapterState::Stopped,
            last_error: None,
            message_count: 0,
            started_at: None,
        }
    }
}

/// The protocol adapter contract.
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Returns the protocol name (`"qq"`, `"onebot"`).
    fn protocol_name(&self) -> &'static str;

    /// Returns the config field that routes inbound webhooks to this bot
    /// (e.g. `"app_id"`), or `None` for client-initiated protocols.
    fn cache_key_field(&self) -> Option<&'static str> {
        None
    }

    /// Starts the adapter: validates config, establishes the connection,
    /// creates the bot instance. Must complete (or fail) within
    /// [`START_BUDGET_SECS`].
    async fn start(&self) -> AdapterResult<()>;

    /// Stops the adapter. Best-effort: sets the stop flag, closes the
    /// connection, and tears down background tasks.
    async fn stop(&self);

    /// Parses a raw wire payload into an event, or `None` if the payload is
    /// not an event (API responses, unknown types).
    fn parse_event(&self, raw: &Value) -> Option<BoxedEvent>;

    /// Calls a platform API action on behalf of this adapter's bot.
    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value>;

    /// Installs the handler invoked per parsed inbound event.
    fn set_event_handler(&self, handler: EventHandler);

    /// Returns the installed event handler, if any.
    fn event_handler(&self) -> Option<EventHandler>;

    /// Returns true if an event handler is installed.
    fn has_event_handler(&self) -> bool {
        self.event_handler().is_some()
    }

    /// Returns the adapter's bot instance while running.
    fn bot(&self) -> Option<Arc<dyn Bot>>;

    /// Returns a snapshot of the runtime state.
    fn status(&self) -> AdapterStatus;
}
