//! Coordination store: shared key-value service for cross-process
//! endpoint publication.
//!
//! The store is optional. Its presence switches deploy scheduling to the
//! asynchronous path and lets a module in one process discover the
//! address of a server deployed by another. Keys are module identifiers;
//! writes are last-writer-wins, reads are eventually consistent.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::core::errors::Result;

/// Shared key-value store used for endpoint publication. No transactional
/// guarantees are assumed; the discovery poll loop is the only
/// consistency mechanism.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Fetch the value under `key`, `None` when unset or empty.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Publish `value` under `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory store for tests and single-process deployments.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .get(key)
            .map(|v| v.clone())
            .filter(|v| !v.is_empty()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.unwrap(), None);
        store.set("k", "http://127.0.0.1:9000").await.unwrap();
        assert_eq!(
            store.get("k").await.unwrap().as_deref(),
            Some("http://127.0.0.1:9000")
        );
        // empty values read back as unset
        store.set("k", "").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }
}
