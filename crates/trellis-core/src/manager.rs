//! Adapter manager: registry and per-bot runtime map.
//!
//! All mutations of a bot's runtime state (start/stop/restart) serialise
//! through a per-bot async lock. The locks map itself is protected by an
//! outer mutex; acquisition order is always outer-then-inner.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::adapter::{Adapter, AdapterStatus, EventHandler};
use crate::error::{AdapterError, AdapterResult};

/// Constructor registered per protocol.
pub type AdapterCtor =
    Arc<dyn Fn(i64, Value) -> AdapterResult<Arc<dyn Adapter>> + Send + Sync>;

/// Registry `protocol → constructor` plus runtime map `bot_id → adapter`.
///
/// At most one adapter instance runs per bot id; re-entrant starts are
/// idempotent.
#[derive(Default)]
pub struct AdapterManager {
    constructors: RwLock<HashMap<String, AdapterCtor>>,
    running: RwLock<HashMap<i64, Arc<dyn Adapter>>>,
    start_locks: SyncMutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl AdapterManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an adapter constructor for a protocol.
    pub fn register<F>(&self, protocol: impl Into<String>, ctor: F)
    where
        F: Fn(i64, Value) -> AdapterResult<Arc<dyn Adapter>> + Send + Sync + 'static,
    {
        let protocol = protocol.into();
        info!(protocol = %protocol, "Adapter registered");
        self.constructors.write().insert(protocol, Arc::new(ctor));
    }

    /// Lists the registered protocol names.
    pub fn protocols(&self) -> Vec<String> {
        self.constructors.read().keys().cloned().collect()
    }

    /// Starts an adapter for `bot_id`, or attaches the handler to an already
    /// running one.
    ///
    /// Guarded by the per-bot lock: two concurrent starts for the same bot
    /// serialise, and the loser observes the winner's adapter and returns
    /// success without constructing a second instance.
    pub async fn start_adapter(
        &self,
        bot_id: i64,
        protocol: &str,
        config: Value,
        handler: Option<EventHandler>,
    ) -> AdapterResult<()> {
        let ctor = self
            .constructors
            .read()
            .get(protocol)
            .cloned()
            .ok_or_else(|| AdapterError::UnknownProtocol(protocol.to_string()))?;

        let bot_lock = self.lock_for(bot_id);
        let _guard = bot_lock.lock().await;

        // Re-check under the lock: another task may have finished starting
        // while we were waiting.
        if let Some(existing) = self.running.read().get(&bot_id).cloned() {
            if let Some(handler) = handler
                && !existing.has_event_handler()
            {
                debug!(bot_id, "Adapter already running, attaching event handler");
                existing.set_event_handler(handler);
            } else {
                debug!(bot_id, "Adapter already running, skipping start");
            }
            return Ok(());
        }

        let adapter = ctor(bot_id, config)?;
        if let Some(handler) = handler {
            adapter.set_event_handler(handler);
        }

        adapter.start().await?;

        self.running.write().insert(bot_id, Arc::clone(&adapter));
        info!(bot_id, protocol = %protocol, "Adapter started");
        Ok(())
    }

    /// Stops and removes the adapter for `bot_id`. Returns true if one was
    /// running.
    pub async fn stop_adapter(&self, bot_id: i64) -> bool {
        let bot_lock = self.lock_for(bot_id);
        let _guard = bot_lock.lock().await;

        let Some(adapter) = self.running.write().remove(&bot_id) else {
            return false;
        };
        adapter.stop().await;
        info!(bot_id, "Adapter stopped");
        true
    }

    /// Restarts the adapter for `bot_id` with a fresh config.
    pub async fn restart_adapter(
        &self,
        bot_id: i64,
        protocol: &str,
        config: Value,
        handler: Option<EventHandler>,
    ) -> AdapterResult<()> {
        self.stop_adapter(bot_id).await;
        self.start_adapter(bot_id, protocol, config, handler).await
    }

    /// Returns the running adapter for `bot_id`.
    pub fn adapter(&self, bot_id: i64) -> Option<Arc<dyn Adapter>> {
        self.running.read().get(&bot_id).cloned()
    }

    /// Returns true if an adapter runs for `bot_id`.
    pub fn is_running(&self, bot_id: i64) -> bool {
        self.running.read().contains_key(&bot_id)
    }

    /// Lists `(bot_id, protocol)` for all running adapters.
    pub fn running_adapters(&self) -> Vec<(i64, String)> {
        self.running
            .read()
            .iter()
            .map(|(id, a)| (*id, a.protocol_name().to_string()))
            .collect()
    }

    /// Returns the status snapshot for `bot_id`, if running.
    pub fn adapter_status(&self, bot_id: i64) -> Option<AdapterStatus> {
        self.running.read().get(&bot_id).map(|a| a.status())
    }

    /// Stops all running adapters.
    pub async fn stop_all(&self) {
        let ids: Vec<i64> = self.running.read().keys().copied().collect();
        for bot_id in ids {
            if !self.stop_adapter(bot_id).await {
                warn!(bot_id, "Adapter vanished during shutdown");
            }
        }
    }

    fn lock_for(&self, bot_id: i64) -> Arc<AsyncMutex<()>> {
        let mut locks = self.start_locks.lock();
        Arc::clone(locks.entry(bot_id).or_default())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::adapter::AdapterState;
    use crate::bot::Bot;
    use crate::error::ApiResult;
    use crate::event::BoxedEvent;

    struct StubAdapter {
        handler: parking_lot::Mutex<Option<EventHandler>>,
    }

    #[async_trait]
    impl Adapter for StubAdapter {
        fn protocol_name(&self) -> &'static str {
            "stub"
        }

        async fn start(&self) -> AdapterResult<()> {
            Ok(())
        }

        async fn stop(&self) {}

        fn parse_event(&self, _raw: &Value) -> Option<BoxedEvent> {
            None
        }

        async fn call_api(&self, _action: &str, _params: Value) -> ApiResult<Value> {
            Ok(Value::Null)
        }

        fn set_event_handler(&self, handler: EventHandler) {
            *self.handler.lock() = Some(handler);
        }

        fn event_handler(&self) -> Option<EventHandler> {
            self.handler.lock().clone()
        }

        fn bot(&self) -> Option<Arc<dyn Bot>> {
            None
        }

        fn status(&self) -> AdapterStatus {
            AdapterStatus {
                state: AdapterState::Running,
                last_error: None,
                message_count: 0,
                started_at: None,
            }
        }
    }

    #[allow(dead_code)]
    struct StubBot;

    #[async_trait]
    impl Bot for StubBot {
        fn bot_id(&self) -> i64 {
            0
        }

        fn self_id(&self) -> &str {
            "stub"
        }

        fn protocol(&self) -> &'static str {
            "stub"
        }

        async fn send(
            &self,
            _event: &dyn crate::event::Event,
            _message: &crate::message::Message,
        ) -> ApiResult<Value> {
            Ok(Value::Null)
        }

        async fn call_api(&self, _action: &str, _params: Value) -> ApiResult<Value> {
            Ok(Value::Null)
        }

        fn as_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    fn manager() -> (AdapterManager, Arc<AtomicUsize>) {
        let constructed = Arc::new(AtomicUsize::new(0));
        let manager = AdapterManager::new();
        let counter = Arc::clone(&constructed);
        manager.register("stub", move |_bot_id, _config| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(StubAdapter {
                handler: parking_lot::Mutex::new(None),
            }) as Arc<dyn Adapter>)
        });
        (manager, constructed)
    }

    fn noop_handler() -> EventHandler {
        Arc::new(|_event| Box::pin(async {}))
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (manager, constructed) = manager();

        manager
            .start_adapter(1, "stub", Value::Null, None)
            .await
            .unwrap();
        // Second start attaches the handler instead of building a new adapter.
        manager
            .start_adapter(1, "stub", Value::Null, Some(noop_handler()))
            .await
            .unwrap();

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
        assert!(manager.adapter(1).unwrap().has_event_handler());
        assert!(manager.is_running(1));
    }

    #[tokio::test]
    async fn test_unknown_protocol_rejected() {
        let (manager, _) = manager();
        let err = manager
            .start_adapter(1, "nope", Value::Null, None)
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::UnknownProtocol(_)));
    }

    #[tokio::test]
    async fn test_stop_removes_adapter() {
        let (manager, _) = manager();
        manager
            .start_adapter(7, "stub", Value::Null, None)
            .await
            .unwrap();
        assert!(manager.stop_adapter(7).await);
        assert!(!manager.is_running(7));
        assert!(!manager.stop_adapter(7).await);
    }

    #[tokio::test]
    async fn test_concurrent_starts_build_one_instance() {
        let (manager, constructed) = manager();
        let manager = Arc::new(manager);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&manager);
                tokio::spawn(async move { m.start_adapter(99, "stub", Value::Null, None).await })
            })
            .collect();
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(constructed.load(Ordering::SeqCst), 1);
    }
}
