//! Key-value store abstraction with TTL.
//!
//! Backs event deduplication, workflow debug records, and the global
//! variable mirror. [`MemoryKv`] is the in-process implementation; a Redis
//! backend implements the same trait.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::error::StoreResult;

/// Async key-value store with optional per-key TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Gets a value; expired keys read as absent.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Sets a value with an optional time-to-live.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()>;

    /// Deletes a key.
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// In-memory [`KvStore`] with lazy expiry.
///
/// Expired entries are dropped on read and swept opportunistically on write
/// once the map grows past a threshold. Uses [`tokio::time::Instant`] so
/// TTLs participate in `tokio::time::pause` during tests.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

const SWEEP_THRESHOLD: usize = 4096;

impl MemoryKv {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (possibly expired, not yet swept) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, Some(deadline))) if *deadline <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> StoreResult<()> {
        let deadline = ttl.map(|t| Instant::now() + t);
        let mut entries = self.entries.lock();
        if entries.len() > SWEEP_THRESHOLD {
            let now = Instant::now();
            entries.retain(|_, (_, d)| d.is_none_or(|d| d > now));
        }
        entries.insert(key.to_string(), (value.to_string(), deadline));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_delete() {
        let kv = MemoryKv::new();
        kv.set("a", "1", None).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap().as_deref(), Some("1"));
        kv.delete("a").await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let kv = MemoryKv::new();
        kv.set("dedup", "true", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(kv.get("dedup").await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(kv.get("dedup").await.unwrap().is_none());
    }
}
