//! QQ adapter: lifecycle and event parsing.
//!
//! The QQ protocol is server-initiated: the platform POSTs callbacks to the
//! shared webhook route (see [`crate::webhook`]), so `start` only validates
//! config and performs the initial token exchange. Inbound routing from the
//! webhook to this adapter happens via the `app_id` cache key.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, warn};

use trellis_core::{
    Adapter, AdapterError, AdapterResult, AdapterState, AdapterStatus, ApiError, ApiResult, Bot,
    BoxedEvent, EventHandler, START_BUDGET_SECS,
};

use crate::client::QqApiClient;
use crate::config::QqConfig;
use crate::events::{Envelope, OP_DISPATCH, build_event};
use crate::bot::QqBot;

/// The QQ webhook protocol adapter for one bot.
pub struct QqAdapter {
    bot_id: i64,
    config: QqConfig,
    client: Arc<QqApiClient>,
    bot: RwLock<Option<Arc<QqBot>>>,
    handler: RwLock<Option<EventHandler>>,
    state: RwLock<AdapterState>,
    last_error: RwLock<Option<String>>,
    message_count: AtomicU64,
    started_at: RwLock<Option<i64>>,
}

impl QqAdapter {
    /// Registry constructor for the adapter manager.
    pub fn create(bot_id: i64, config: Value) -> AdapterResult<Arc<dyn Adapter>> {
        let config = QqConfig::from_value(&config)?;
        let client = Arc::new(QqApiClient::new(
            config.app_id.clone(),
            config.app_secret.clone(),
            config.sandbox,
        ));
        Ok(Arc::new(Self {
            bot_id,
            config,
            client,
            bot: RwLock::new(None),
            handler: RwLock::new(None),
            state: RwLock::new(AdapterState::Stopped),
            last_error: RwLock::new(None),
            message_count: AtomicU64::new(0),
            started_at: RwLock::new(None),
        }))
    }

    /// Returns the bot's application id.
    pub fn app_id(&self) -> &str {
        &self.config.app_id
    }

    /// Returns the application secret, used by the webhook for signature
    /// verification.
    pub fn app_secret(&self) -> &str {
        &self.config.app_secret
    }

    /// Returns the API client.
    pub fn client(&self) -> &Arc<QqApiClient> {
        &self.client
    }
}

#[async_trait]
impl Adapter for QqAdapter {
    fn protocol_name(&self) -> &'static str {
        "qq"
    }

    fn cache_key_field(&self) -> Option<&'static str> {
        Some("app_id")
    }

    async fn start(&self) -> AdapterResult<()> {
        *self.state.write() = AdapterState::Starting;

        let auth = tokio::time::timeout(
            std::time::Duration::from_secs(START_BUDGET_SECS),
            self.client.authenticate(),
        )
        .await;

        let result = match auth {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(AdapterError::Internal(err.to_string())),
            Err(_) => Err(AdapterError::StartTimeout(START_BUDGET_SECS)),
        };

        match result {
            Ok(()) => {
                *self.bot.write() = Some(Arc::new(QqBot::new(self.bot_id, Arc::clone(&self.client))));
                *self.state.write() = AdapterState::Running;
                *self.started_at.write() = Some(Utc::now().timestamp());
                *self.last_error.write() = None;
                info!(bot_id = self.bot_id, app_id = %self.config.app_id, "QQ adapter started");
                Ok(())
            }
            Err(err) => {
                *self.last_error.write() = Some(err.to_string());
                *self.state.write() = AdapterState::Stopped;
                warn!(bot_id = self.bot_id, error = %err, "QQ adapter failed to start");
                Err(err)
            }
        }
    }

    async fn stop(&self) {
        *self.state.write() = AdapterState::Stopping;
        *self.bot.write() = None;
        *self.state.write() = AdapterState::Stopped;
        info!(bot_id = self.bot_id, "QQ adapter stopped");
    }

    fn parse_event(&self, raw: &Value) -> Option<BoxedEvent> {
        let envelope: Envelope = serde_json::from_value(raw.clone()).ok()?;
        if envelope.op != OP_DISPATCH {
            return None;
        }
        let event_type = envelope.t.as_deref()?;
        let event = build_event(event_type, &envelope.d, &self.config.app_id)?;
        self.message_count.fetch_add(1, Ordering::Relaxed);

        let bot = self.bot.read().clone()?;
        Some(event.with_bot(&(bot as Arc<dyn Bot>)))
    }

    async fn call_api(&self, action: &str, params: Value) -> ApiResult<Value> {
        let bot = self.bot.read().clone().ok_or(ApiError::NotConnected)?;
        bot.call_api(action, params).await
    }

    fn set_event_handler(&self, handler: EventHandler) {
        *self.handler.write() = Some(handler);
    }

    fn event_handler(&self) -> Option<EventHandler> {
        self.handler.read().clone()
    }

    fn bot(&self) -> Option<Arc<dyn Bot>> {
        self.bot.read().clone().map(|bot| bot as Arc<dyn Bot>)
    }

    fn status(&self) -> AdapterStatus {
        AdapterStatus {
            state: *self.state.read(),
            last_error: self.last_error.read().clone(),
            message_count: self.message_count.load(Ordering::Relaxed),
            started_at: *self.started_at.read(),
        }
    }
}
