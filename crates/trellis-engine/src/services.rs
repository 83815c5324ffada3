//! Shared services injected into every workflow execution.
//!
//! One [`EngineServices`] instance is built at application start and shared
//! by all precompiled engines. It bundles the collaborators nodes are allowed
//! to reach: the KV store, global variables, an HTTP client, the data
//! directory for the storage node, the optional render collaborator, and the
//! snippet registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono_tz::Tz;
use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use trellis_core::{KvStore, MemoryKv};

use crate::globals::GlobalVariables;
use crate::nodes::render::HtmlRenderer;
use crate::nodes::snippet::SnippetRegistry;

/// Collaborator bundle shared by all engines.
pub struct EngineServices {
    /// TTL key-value store (dedup keys, debug records, globals mirror).
    pub kv: Arc<dyn KvStore>,
    /// Global variable cache exposed as the `global.*` template namespace.
    pub globals: Arc<GlobalVariables>,
    /// HTTP client for the `http_request` node.
    pub http: reqwest::Client,
    /// Root directory for `data_storage` node files (`<data_dir>/<name>.json`).
    pub data_dir: PathBuf,
    /// External HTML-to-image collaborator, when wired.
    pub renderer: Option<Arc<dyn HtmlRenderer>>,
    /// Named snippet handlers.
    pub snippets: SnippetRegistry,
    /// Timezone applied by time nodes and the scheduler.
    pub timezone: Tz,

    // One async mutex per storage name serialises file writes.
    storage_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl EngineServices {
    /// Creates services with the given stores and defaults elsewhere.
    pub fn new(kv: Arc<dyn KvStore>, globals: Arc<GlobalVariables>) -> Self {
        Self {
            kv,
            globals,
            http: reqwest::Client::new(),
            data_dir: PathBuf::from("Data"),
            renderer: None,
            snippets: SnippetRegistry::new(),
            timezone: chrono_tz::UTC,
            storage_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Fully in-memory services for tests and embedding.
    pub fn in_memory() -> Self {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let globals = Arc::new(GlobalVariables::detached());
        Self::new(kv, globals)
    }

    /// Sets the storage node data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Sets the timezone used by time nodes.
    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.timezone = tz;
        self
    }

    /// Wires the render collaborator.
    pub fn with_renderer(mut self, renderer: Arc<dyn HtmlRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Registers snippet handlers.
    pub fn with_snippets(mut self, snippets: SnippetRegistry) -> Self {
        self.snippets = snippets;
        self
    }

    /// Returns the per-storage-name write lock, creating it on first use.
    pub fn storage_lock(&self, name: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.storage_locks.lock();
        Arc::clone(locks.entry(name.to_string()).or_default())
    }
}
