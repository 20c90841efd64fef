//! Lazy, possibly cross-process endpoint resolution.
//!
//! A module deployed in a worker process publishes its address to the
//! coordination store under its module identifier; a module object in
//! another process blocks on `get` until that address appears. Without a
//! store the endpoint must already be known locally.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error};

use crate::core::errors::{ModError, Result};
use crate::module::node::ModuleId;
use crate::remote::store::CoordinationStore;

/// Delay between discovery polls before jitter is applied.
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_millis(500);

/// Shared endpoint cell. An outer module and its deploy task hold clones
/// of the same slot so publication is visible to both.
#[derive(Clone, Default)]
pub struct EndpointSlot(Arc<RwLock<Option<String>>>);

impl EndpointSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(url: impl Into<String>) -> Self {
        Self(Arc::new(RwLock::new(Some(url.into()))))
    }

    pub fn peek(&self) -> Option<String> {
        self.0.read().unwrap().clone()
    }

    fn store(&self, url: String) {
        *self.0.write().unwrap() = Some(url);
    }
}

/// Resolves a module's network address, polling the coordination store
/// when it is not yet locally known.
#[derive(Clone)]
pub struct EndpointLocator {
    slot: EndpointSlot,
    key: ModuleId,
    store: Option<Arc<dyn CoordinationStore>>,
    poll_delay: Duration,
}

impl EndpointLocator {
    pub fn new(
        key: ModuleId,
        slot: EndpointSlot,
        store: Option<Arc<dyn CoordinationStore>>,
    ) -> Self {
        Self {
            slot,
            key,
            store,
            poll_delay: DEFAULT_POLL_DELAY,
        }
    }

    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Current known URL. Returns the cached value immediately when set;
    /// otherwise, with a store, polls under the module identifier until a
    /// non-empty value appears. Store access failures are logged and
    /// returned as discovery errors, fatal. Without a store an unset
    /// endpoint yields `None`.
    pub async fn get(&self) -> Result<Option<String>> {
        if let Some(url) = self.slot.peek() {
            return Ok(Some(url));
        }
        let Some(store) = &self.store else {
            return Ok(None);
        };
        loop {
            match store.get(self.key.as_str()).await {
                Ok(Some(url)) if !url.is_empty() => {
                    self.slot.store(url.clone());
                    return Ok(Some(url));
                }
                Ok(_) => sleep(jittered(self.poll_delay)).await,
                Err(e) => {
                    error!(module_id = %self.key, error = %e, "coordination store access failed");
                    return Err(ModError::discovery_with_source(
                        self.key.as_str(),
                        "coordination store access failed",
                        e,
                    ));
                }
            }
        }
    }

    /// Publish the endpoint locally and, when a store is present, write
    /// it through so other processes can discover it.
    pub async fn set(&self, url: &str) -> Result<()> {
        if let Some(store) = &self.store {
            store.set(self.key.as_str(), url).await?;
        }
        debug!(module_id = %self.key, url, "endpoint published");
        self.slot.store(url.to_string());
        Ok(())
    }
}

/// Poll delay with ±10% jitter so many waiters do not hammer the store in
/// lockstep.
fn jittered(delay: Duration) -> Duration {
    let jitter = (fastrand::u32(..) as f64 / u32::MAX as f64) * 0.2 - 0.1;
    delay.mul_f64(1.0 + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::store::MemoryStore;
    use tokio::time::Duration;

    #[tokio::test]
    async fn test_local_set_then_get() {
        let slot = EndpointSlot::new();
        let locator = EndpointLocator::new(ModuleId::new(), slot.clone(), None);
        assert_eq!(locator.get().await.unwrap(), None);
        locator.set("http://127.0.0.1:8080").await.unwrap();
        assert_eq!(
            locator.get().await.unwrap().as_deref(),
            Some("http://127.0.0.1:8080")
        );
        // the shared slot observes the same value
        assert_eq!(slot.peek().as_deref(), Some("http://127.0.0.1:8080"));
    }

    #[tokio::test]
    async fn test_get_blocks_until_published_by_other_actor() {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());
        let key = ModuleId::new();
        let locator = EndpointLocator::new(key.clone(), EndpointSlot::new(), Some(store.clone()))
            .with_poll_delay(Duration::from_millis(5));

        let publisher = {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                store.set(key.as_str(), "http://10.0.0.2:7000").await.unwrap();
            })
        };

        let url = locator.get().await.unwrap();
        assert_eq!(url.as_deref(), Some("http://10.0.0.2:7000"));
        publisher.await.unwrap();

        // never empty or stale after publication
        assert_eq!(
            locator.get().await.unwrap().as_deref(),
            Some("http://10.0.0.2:7000")
        );
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_as_discovery_error() {
        struct BrokenStore;

        #[async_trait::async_trait]
        impl CoordinationStore for BrokenStore {
            async fn get(&self, _key: &str) -> Result<Option<String>> {
                Err(ModError::internal("connection reset"))
            }

            async fn set(&self, _key: &str, _value: &str) -> Result<()> {
                Ok(())
            }
        }

        let key = ModuleId::new();
        let locator = EndpointLocator::new(key.clone(), EndpointSlot::new(), Some(Arc::new(BrokenStore)));
        let err = locator.get().await.unwrap_err();
        assert!(matches!(err, ModError::Discovery { .. }));
        let text = err.to_string();
        assert!(text.contains(key.as_str()));
        // the underlying store error stays reachable through the source chain
        use std::error::Error;
        assert!(err.source().unwrap().to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_set_writes_through_to_store() {
        let store = Arc::new(MemoryStore::new());
        let key = ModuleId::new();
        let locator = EndpointLocator::new(
            key.clone(),
            EndpointSlot::new(),
            Some(store.clone() as Arc<dyn CoordinationStore>),
        );
        locator.set("http://127.0.0.1:9001").await.unwrap();
        assert_eq!(
            store.get(key.as_str()).await.unwrap().as_deref(),
            Some("http://127.0.0.1:9001")
        );
    }
}
