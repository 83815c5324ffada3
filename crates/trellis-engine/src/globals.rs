//! Global variable cache.
//!
//! Process-wide configuration visible to workflow templates under the
//! `global.*` namespace. The authoritative copy lives in the record store;
//! reads go through an in-process map behind a single lock, and writes also
//! mirror the full map to the KV store under `workflow:globals` so external
//! consumers can observe it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{error, info};

use trellis_core::{GlobalVariableRecord, KvStore, RecordStore, StoreResult};

/// KV key holding the JSON mirror of the global variable map.
pub const GLOBALS_CACHE_KEY: &str = "workflow:globals";

/// Cached view of the `global_variables` records.
pub struct GlobalVariables {
    cache: RwLock<HashMap<String, String>>,
    backing: Option<Backing>,
}

struct Backing {
    store: Arc<dyn RecordStore>,
    kv: Arc<dyn KvStore>,
}

impl GlobalVariables {
    /// Creates a cache backed by the record store and KV mirror.
    pub fn new(store: Arc<dyn RecordStore>, kv: Arc<dyn KvStore>) -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            backing: Some(Backing { store, kv }),
        }
    }

    /// Creates a purely in-memory cache with no backing store. Used by tests
    /// and embedded setups without persistence.
    pub fn detached() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
            backing: None,
        }
    }

    /// Loads all variables from the record store, replacing the cache, and
    /// refreshes the KV mirror. Returns the number of variables loaded.
    pub async fn load(&self) -> StoreResult<usize> {
        let Some(backing) = &self.backing else {
            return Ok(self.cache.read().len());
        };

        let records = backing.store.global_variables().await?;
        let map: HashMap<String, String> = records
            .into_iter()
            .map(|r| (r.key, r.value))
            .collect();
        let count = map.len();

        *self.cache.write() = map;
        self.mirror(backing).await;

        info!(count, "Global variables loaded");
        Ok(count)
    }

    /// Reloads from the record store.
    pub async fn reload(&self) -> StoreResult<usize> {
        self.load().await
    }

    /// Gets one variable.
    pub fn get(&self, key: &str) -> Option<String> {
        self.cache.read().get(key).cloned()
    }

    /// Returns a copy of the whole map.
    pub fn get_all(&self) -> HashMap<String, String> {
        self.cache.read().clone()
    }

    /// Sets a variable in the store, the cache, and the KV mirror.
    pub async fn set(&self, key: &str, value: &str, is_secret: bool) -> StoreResult<()> {
        if let Some(backing) = &self.backing {
            backing
                .store
                .set_global_variable(GlobalVariableRecord {
                    key: key.to_string(),
                    value: value.to_string(),
                    is_secret,
                })
                .await?;
        }
        self.cache
            .write()
            .insert(key.to_string(), value.to_string());
        if let Some(backing) = &self.backing {
            self.mirror(backing).await;
        }
        Ok(())
    }

    /// Deletes a variable from the store, the cache, and the KV mirror.
    pub async fn delete(&self, key: &str) -> StoreResult<()> {
        if let Some(backing) = &self.backing {
            backing.store.delete_global_variable(key).await?;
        }
        self.cache.write().remove(key);
        if let Some(backing) = &self.backing {
            self.mirror(backing).await;
        }
        Ok(())
    }

    /// Test/embedding helper: writes straight into the cache.
    pub fn put_cached(&self, key: &str, value: &str) {
        self.cache
            .write()
            .insert(key.to_string(), value.to_string());
    }

    async fn mirror(&self, backing: &Backing) {
        let payload = serde_json::to_string(&self.get_all()).unwrap_or_default();
        if let Err(err) = backing.kv.set(GLOBALS_CACHE_KEY, &payload, None).await {
            error!(error = %err, "Failed to mirror global variables to KV");
        }
    }
}

#[cfg(test)]
mod tests {
    use trellis_core::{MemoryKv, MemoryStore};

    use super::*;

    #[tokio::test]
    async fn test_load_and_mirror() {
        let store = Arc::new(MemoryStore::new());
        store.put_global(GlobalVariableRecord {
            key: "api_key".into(),
            value: "k1".into(),
            is_secret: true,
        });
        let kv = Arc::new(MemoryKv::new());
        let globals = GlobalVariables::new(store, Arc::clone(&kv) as Arc<dyn KvStore>);

        assert_eq!(globals.load().await.unwrap(), 1);
        assert_eq!(globals.get("api_key").as_deref(), Some("k1"));

        let mirrored = kv.get(GLOBALS_CACHE_KEY).await.unwrap().unwrap();
        assert!(mirrored.contains("api_key"));
    }

    #[tokio::test]
    async fn test_set_and_delete_round_trip() {
        let store = Arc::new(MemoryStore::new());
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let globals = GlobalVariables::new(Arc::clone(&store) as Arc<dyn RecordStore>, kv);

        globals.set("greeting", "hello", false).await.unwrap();
        assert_eq!(globals.get("greeting").as_deref(), Some("hello"));
        assert_eq!(store.global_variables().await.unwrap().len(), 1);

        globals.delete("greeting").await.unwrap();
        assert_eq!(globals.get("greeting"), None);
        assert!(store.global_variables().await.unwrap().is_empty());
    }
}
