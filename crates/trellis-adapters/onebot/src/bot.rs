//! OneBot bot: outbound sends over the shared socket.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use trellis_core::{ApiError, ApiResult, Bot, Event, Message, MessageEvent, MessageScene};

use crate::caller::WsCaller;
use crate::events::to_wire_message;

/// One connected OneBot account.
pub struct OneBotBot {
    bot_id: i64,
    self_id: String,
    caller: Arc<WsCaller>,
}

impl OneBotBot {
    /// Creates a bot over the connection's caller.
    pub fn new(bot_id: i64, self_id: impl Into<String>, caller: Arc<WsCaller>) -> Self {
        Self {
            bot_id,
            self_id: self_id.into(),
            caller,
        }
    }
}

/// Converts an id that is numeric on the wire but a string in the core
/// model.
fn wire_id(id: &str) -> Value {
    id.parse::<i64>().map(Value::from).unwrap_or_else(|_| json!(id))
}

#[async_trait]
impl Bot for OneBotBot {
    fn bot_id(&self) -> i64 {
        self.bot_id
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }

    fn protocol(&self) -> &'static str {
        "onebot"
    }

    async fn send(&self, event: &dyn Event, message: &Message) -> ApiResult<Value> {
        let message_event = event
            .as_any()
            .downcast_ref::<MessageEvent>()
            .ok_or(ApiError::MissingSession)?;

        let (action, params) = match message_event.scene {
            MessageScene::Group => {
                let group_id = message_event
                    .group_id
                    .as_deref()
                    .ok_or(ApiError::MissingSession)?;
                (
                    "send_group_msg",
                    json!({
                        "group_id": wire_id(group_id),
                        "message": to_wire_message(message),
                    }),
                )
            }
            _ => (
                "send_private_msg",
                json!({
                    "user_id": wire_id(&message_event.sender.user_id),
                    "message": to_wire_message(message),
                }),
            ),
        };

        self.call_api(action, params).await
    }

    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value> {
        let response = self.caller.call(action, params).await?;

        let ok = response.get("status").and_then(Value::as_str) == Some("ok")
            || response.get("retcode").and_then(Value::as_i64) == Some(0);
        if !ok {
            let retcode = response.get("retcode").and_then(Value::as_i64).unwrap_or(-1);
            let message = response
                .get("message")
                .or_else(|| response.get("wording"))
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string();
            return Err(ApiError::Platform {
                code: retcode,
                message,
            });
        }

        Ok(response.get("data").cloned().unwrap_or(Value::Null))
    }

    fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_id() {
        assert_eq!(wire_id("777"), json!(777));
        assert_eq!(wire_id("openid-x"), json!("openid-x"));
    }
}
