//! Runtime assembly and lifecycle.
//!
//! [`TrellisRuntime`] owns the process singletons and initialises them in a
//! fixed order: KV client → record store → workflow cache → global variables
//! → scheduler → adapter registrations → webhook server. Everything is
//! exposed through explicit handles; nothing reaches for hidden globals.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::Router;
use parking_lot::RwLock;
use tokio::signal;
use tracing::{error, info, warn};

use trellis_core::{
    AdapterManager, AdapterResult, AdapterStatus, Adapter, KvStore, MemoryKv, MemoryStore,
    RecordStore, StoreResult,
};
use trellis_engine::{
    EngineServices, GlobalVariables, HtmlRenderer, NodeRegistry, SnippetRegistry, WorkflowCache,
};

use crate::config::TrellisConfig;
use crate::dispatch::Dispatcher;
use crate::logging::LoggingBuilder;
use crate::scheduler::Scheduler;

static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Builder for [`TrellisRuntime`].
pub struct RuntimeBuilder {
    config: TrellisConfig,
    store: Option<Arc<dyn RecordStore>>,
    kv: Option<Arc<dyn KvStore>>,
    renderer: Option<Arc<dyn HtmlRenderer>>,
    snippets: SnippetRegistry,
}

impl RuntimeBuilder {
    /// Provides the persistent record store. Defaults to an in-memory store.
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Provides the TTL key-value store. Defaults to an in-memory store.
    pub fn with_kv(mut self, kv: Arc<dyn KvStore>) -> Self {
        self.kv = Some(kv);
        self
    }

    /// Wires the external HTML render collaborator.
    pub fn with_renderer(mut self, renderer: Arc<dyn HtmlRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Registers snippet handlers available to workflow steps.
    pub fn with_snippets(mut self, snippets: SnippetRegistry) -> Self {
        self.snippets = snippets;
        self
    }

    /// Assembles the runtime.
    pub fn build(self) -> TrellisRuntime {
        TrellisRuntime::assemble(
            self.config,
            self.kv.unwrap_or_else(|| Arc::new(MemoryKv::new())),
            self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            self.renderer,
            self.snippets,
        )
    }
}

/// The assembled Trellis runtime.
pub struct TrellisRuntime {
    config: TrellisConfig,
    kv: Arc<dyn KvStore>,
    store: Arc<dyn RecordStore>,
    manager: Arc<AdapterManager>,
    registry: Arc<NodeRegistry>,
    services: Arc<EngineServices>,
    globals: Arc<GlobalVariables>,
    cache: Arc<WorkflowCache>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<Scheduler>,
    webhook_router: RwLock<Option<Router>>,
    running: AtomicBool,
}

impl TrellisRuntime {
    /// Starts a builder over a configuration.
    pub fn builder(config: TrellisConfig) -> RuntimeBuilder {
        Self::init_logging(&config);
        RuntimeBuilder {
            config,
            store: None,
            kv: None,
            renderer: None,
            snippets: SnippetRegistry::new(),
        }
    }

    fn init_logging(config: &TrellisConfig) {
        if LOGGING_INITIALIZED
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let mut builder = LoggingBuilder::new().with_level_str(&config.logging.level);
            if let Some(dir) = &config.logging.directory {
                builder = builder.with_file_output(dir);
            }
            // A test harness may have installed a subscriber already.
            let _ = builder.try_init();
        }
    }

    fn assemble(
        config: TrellisConfig,
        kv: Arc<dyn KvStore>,
        store: Arc<dyn RecordStore>,
        renderer: Option<Arc<dyn HtmlRenderer>>,
        snippets: SnippetRegistry,
    ) -> Self {
        let timezone = config.parsed_timezone().unwrap_or(chrono_tz::UTC);

        let globals = Arc::new(GlobalVariables::new(
            Arc::clone(&store),
            Arc::clone(&kv),
        ));

        let mut services = EngineServices::new(Arc::clone(&kv), Arc::clone(&globals))
            .with_data_dir(config.data_dir())
            .with_timezone(timezone)
            .with_snippets(snippets);
        if let Some(renderer) = renderer {
            services = services.with_renderer(renderer);
        }
        let services = Arc::new(services);

        let registry = Arc::new(NodeRegistry::with_builtins());
        let cache = Arc::new(WorkflowCache::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&services),
        ));
        let dispatcher = Dispatcher::new(Arc::clone(&cache), Arc::clone(&store));
        let manager = Arc::new(AdapterManager::new());
        let scheduler = Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            Arc::clone(&manager),
            timezone,
        );

        Self {
            config,
            kv,
            store,
            manager,
            registry,
            services,
            globals,
            cache,
            dispatcher,
            scheduler,
            webhook_router: RwLock::new(None),
            running: AtomicBool::new(false),
        }
    }

    // ------------------------------------------------------------------
    // Handles
    // ------------------------------------------------------------------

    /// The runtime configuration.
    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    /// The key-value store.
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    /// The record store.
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// The adapter manager.
    pub fn manager(&self) -> &Arc<AdapterManager> {
        &self.manager
    }

    /// The node registry (for admin enumeration).
    pub fn node_registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// The engine service bundle.
    pub fn services(&self) -> &Arc<EngineServices> {
        &self.services
    }

    /// The global variable cache.
    pub fn globals(&self) -> &Arc<GlobalVariables> {
        &self.globals
    }

    /// The workflow cache.
    pub fn workflow_cache(&self) -> &Arc<WorkflowCache> {
        &self.cache
    }

    /// The dispatcher.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The scheduler.
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Whether the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    /// Registers a protocol adapter constructor.
    pub fn register_adapter<F>(&self, protocol: &str, ctor: F)
    where
        F: Fn(i64, serde_json::Value) -> AdapterResult<Arc<dyn Adapter>> + Send + Sync + 'static,
    {
        self.manager.register(protocol, ctor);
    }

    /// Mounts the webhook router served by [`TrellisRuntime::run`].
    pub fn set_webhook_router(&self, router: Router) {
        *self.webhook_router.write() = Some(router);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Loads caches and installs scheduler jobs. Fixed order: workflow cache
    /// → globals → scheduler.
    pub async fn init(&self) -> StoreResult<()> {
        let workflows = self.cache.reload().await?;
        let globals = self.globals.load().await?;
        let jobs = self.scheduler.reload();
        info!(workflows, globals, jobs, "Runtime initialised");
        Ok(())
    }

    /// Reloads workflows and reinstalls scheduler jobs; called after admin
    /// edits.
    pub async fn reload_workflows(&self) -> StoreResult<usize> {
        let count = self.cache.reload().await?;
        self.scheduler.reload();
        Ok(count)
    }

    /// Starts the adapter for one bot from its store record.
    pub async fn start_bot(&self, bot_id: i64) -> AdapterResult<()> {
        let record = self
            .store
            .bot(bot_id)
            .await
            .map_err(|err| trellis_core::AdapterError::Internal(err.to_string()))?
            .ok_or_else(|| {
                trellis_core::AdapterError::Internal(format!("bot {bot_id} not found"))
            })?;
        if !record.enabled {
            return Err(trellis_core::AdapterError::Internal(format!(
                "bot {bot_id} is disabled"
            )));
        }

        self.manager
            .start_adapter(
                record.id,
                &record.protocol,
                record.config.clone(),
                Some(Arc::clone(&self.dispatcher).handler()),
            )
            .await
    }

    /// Stops the adapter for one bot.
    pub async fn stop_bot(&self, bot_id: i64) -> bool {
        self.manager.stop_adapter(bot_id).await
    }

    /// Restarts one bot. The only reopener for a crashed adapter.
    pub async fn restart_bot(&self, bot_id: i64) -> AdapterResult<()> {
        self.manager.stop_adapter(bot_id).await;
        self.start_bot(bot_id).await
    }

    /// Returns a bot's adapter status.
    pub fn bot_status(&self, bot_id: i64) -> Option<AdapterStatus> {
        self.manager.adapter_status(bot_id)
    }

    /// Starts every enabled bot. Individual failures are logged, not fatal.
    pub async fn start_enabled_bots(&self) -> StoreResult<usize> {
        let bots = self.store.enabled_bots().await?;
        let mut started = 0usize;
        for record in bots {
            match self
                .manager
                .start_adapter(
                    record.id,
                    &record.protocol,
                    record.config.clone(),
                    Some(Arc::clone(&self.dispatcher).handler()),
                )
                .await
            {
                Ok(()) => started += 1,
                Err(err) => {
                    error!(bot_id = record.id, error = %err, "Bot failed to start");
                }
            }
        }
        Ok(started)
    }

    /// Runs until Ctrl+C / SIGTERM: init, start bots, serve the webhook,
    /// wait, then tear down.
    pub async fn run(&self) -> StoreResult<()> {
        self.init().await?;
        self.running.store(true, Ordering::SeqCst);

        let started = self.start_enabled_bots().await?;
        info!(started, "Bots started");

        let webhook = self.webhook_router.write().take();
        let server = match (self.config.webhook.enabled, webhook) {
            (true, Some(router)) => {
                let bind = self.config.webhook.bind.clone();
                Some(tokio::spawn(async move {
                    match tokio::net::TcpListener::bind(&bind).await {
                        Ok(listener) => {
                            info!(bind = %bind, "Webhook server listening");
                            if let Err(err) = axum::serve(listener, router).await {
                                error!(error = %err, "Webhook server error");
                            }
                        }
                        Err(err) => {
                            error!(bind = %bind, error = %err, "Webhook server failed to bind");
                        }
                    }
                }))
            }
            (true, None) => {
                warn!("Webhook enabled but no router mounted");
                None
            }
            _ => None,
        };

        wait_for_shutdown().await;

        self.shutdown().await;
        if let Some(server) = server {
            server.abort();
        }
        Ok(())
    }

    /// Stops the scheduler and all adapters.
    pub async fn shutdown(&self) {
        info!("Stopping Trellis runtime");
        self.scheduler.stop();
        self.manager.stop_all().await;
        self.running.store(false, Ordering::SeqCst);
        info!("Runtime stopped");
    }
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(error = %err, "Failed to register SIGTERM handler");
                let _ = signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use serde_json::json;

    use trellis_core::{BotRecord, GlobalVariableRecord, MemoryStore, WorkflowRecord};

    use super::*;

    fn store_with_fixtures() -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store.put_bot(BotRecord {
            id: 1,
            name: "bot".into(),
            protocol: "stub".into(),
            config: json!({}),
            owner_id: 10,
            enabled: true,
        });
        store.put_workflow(WorkflowRecord {
            id: 1,
            name: "wf".into(),
            enabled: true,
            priority: 1,
            config: json!({
                "trigger_type": "message",
                "workflow": [{"id": "s1", "type": "start"}, {"id": "s2", "type": "end"}]
            }),
            creator_id: 10,
        });
        store.put_global(GlobalVariableRecord {
            key: "api_key".into(),
            value: "k".into(),
            is_secret: false,
        });
        store
    }

    #[tokio::test]
    async fn test_init_order_loads_everything() {
        let runtime = TrellisRuntime::builder(TrellisConfig::default())
            .with_store(store_with_fixtures())
            .build();

        runtime.init().await.unwrap();
        assert_eq!(runtime.workflow_cache().snapshot().len(), 1);
        assert_eq!(runtime.globals().get("api_key").as_deref(), Some("k"));
        assert!(runtime.scheduler().jobs_info().is_empty());
    }

    #[tokio::test]
    async fn test_start_bot_requires_known_enabled_record() {
        let store = store_with_fixtures();
        store.put_bot(BotRecord {
            id: 2,
            name: "disabled".into(),
            protocol: "stub".into(),
            config: json!({}),
            owner_id: 10,
            enabled: false,
        });

        let runtime = TrellisRuntime::builder(TrellisConfig::default())
            .with_store(store)
            .build();

        // Unknown protocol: the registry has no "stub" constructor.
        assert!(runtime.start_bot(1).await.is_err());
        // Disabled bots never start.
        assert!(runtime.start_bot(2).await.is_err());
        // Unknown id.
        assert!(runtime.start_bot(99).await.is_err());
    }
}
