//! Persistence adapter for the router's recently-seen set.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{MeshError, Result};

/// `load / save(id, ts) / prune(expire_before)` over millisecond timestamps.
///
/// The router only ever calls `save` and `prune` fire-and-forget; failures are
/// logged, never surfaced to the sender.
#[async_trait]
pub trait SeenStore: Send + Sync + 'static {
    async fn load(&self) -> Result<HashMap<String, u64>>;
    async fn save(&self, id: &str, first_seen: u64) -> Result<()>;
    async fn prune(&self, expire_before: u64) -> Result<()>;
}

/// In-memory store, used in tests and when no durable store is configured.
#[derive(Debug, Default)]
pub struct MemorySeenStore {
    entries: Mutex<HashMap<String, u64>>,
}

impl MemorySeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(entries: HashMap<String, u64>) -> Self {
        Self {
            entries: Mutex::new(entries),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, u64>>> {
        self.entries
            .lock()
            .map_err(|_| MeshError::Store("seen store lock poisoned".into()))
    }
}

#[async_trait]
impl SeenStore for MemorySeenStore {
    async fn load(&self) -> Result<HashMap<String, u64>> {
        Ok(self.lock()?.clone())
    }

    async fn save(&self, id: &str, first_seen: u64) -> Result<()> {
        self.lock()?.entry(id.to_string()).or_insert(first_seen);
        Ok(())
    }

    async fn prune(&self, expire_before: u64) -> Result<()> {
        self.lock()?.retain(|_, ts| *ts >= expire_before);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_keeps_first_timestamp() {
        let store = MemorySeenStore::new();
        store.save("a", 10).await.unwrap();
        store.save("a", 20).await.unwrap();
        assert_eq!(store.load().await.unwrap()["a"], 10);
    }

    #[tokio::test]
    async fn prune_drops_old_entries() {
        let store = MemorySeenStore::new();
        store.save("old", 10).await.unwrap();
        store.save("new", 100).await.unwrap();
        store.prune(50).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert!(!loaded.contains_key("old"));
        assert!(loaded.contains_key("new"));
    }
}
