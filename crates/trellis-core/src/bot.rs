//! Bot contract.
//!
//! A [`Bot`] represents one connected account on one protocol. It is owned by
//! its adapter; events carry only a weak handle to it.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ApiResult;
use crate::event::Event;
use crate::message::Message;

/// A connected bot account.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Returns the id of the bot's store record. Dispatch resolves the
    /// owning user through it.
    fn bot_id(&self) -> i64;

    /// Returns the bot's account id on the platform.
    fn self_id(&self) -> &str;

    /// Returns the protocol this bot speaks.
    fn protocol(&self) -> &'static str;

    /// Sends a message back into the conversational context of `event`.
    ///
    /// The target (user, group, channel) is derived from the event. Returns
    /// the platform message id when the platform reports one.
    async fn send(&self, event: &dyn Event, message: &Message) -> ApiResult<Value>;

    /// Calls a raw platform API action.
    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value>;

    /// Returns self as `Any` for protocol-specific downcasting.
    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
