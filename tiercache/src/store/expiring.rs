use super::Store;
use crate::error::{CacheError, Result};
use crate::ttl;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Configuration for the expiring map store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExpiringStoreConfig {
    /// TTL applied by `set`; zero means entries written by `set` never expire
    pub default_ttl_ms: u64,
    /// Interval between background sweeps; zero disables the sweeper.
    /// Only used by `start` and `start_cleanup`; a store built with `new`
    /// expires entries lazily on read and never sweeps.
    pub cleanup_interval_ms: u64,
}

impl Default for ExpiringStoreConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: 0,
            cleanup_interval_ms: 1000,
        }
    }
}

impl ExpiringStoreConfig {
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_ms = ttl.as_millis() as u64;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = interval.as_millis() as u64;
        self
    }
}

#[derive(Clone)]
struct StoredValue<V> {
    value: V,
    expires_at: Option<Instant>,
}

impl<V> StoredValue<V> {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Simple in-process map with per-entry expiry.
///
/// Expired entries are hidden on read and removed by a background sweeper.
/// The sweeper is owned by the store and aborted when the last clone drops.
pub struct ExpiringStore<V> {
    data: Arc<RwLock<HashMap<String, StoredValue<V>>>>,
    config: ExpiringStoreConfig,
    sweeper: Arc<SweeperHandle>,
}

impl<V> Clone for ExpiringStore<V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            config: self.config.clone(),
            sweeper: Arc::clone(&self.sweeper),
        }
    }
}

#[derive(Default)]
struct SweeperHandle(Mutex<Option<JoinHandle<()>>>);

impl SweeperHandle {
    fn stop(&self) {
        if let Some(handle) = self.0.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl<V> ExpiringStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a store without a sweeper; expiry is enforced lazily on read
    pub fn new(config: ExpiringStoreConfig) -> Self {
        info!(
            "Initializing expiring store with default_ttl={}ms, cleanup_interval={}ms",
            config.default_ttl_ms, config.cleanup_interval_ms
        );

        Self {
            data: Arc::new(RwLock::new(HashMap::new())),
            config,
            sweeper: Arc::new(SweeperHandle::default()),
        }
    }

    /// Create a store and start its background sweeper.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: ExpiringStoreConfig) -> Self {
        let store = Self::new(config);
        store.start_cleanup();
        store
    }

    /// Start the background sweeper if it is not running yet
    pub fn start_cleanup(&self) {
        let interval_ms = self.config.cleanup_interval_ms;
        if interval_ms == 0 {
            return;
        }

        let mut slot = self.sweeper.0.lock();
        if slot.is_some() {
            return;
        }

        info!("Starting expiring store sweeper (interval={}ms)", interval_ms);

        // The task only holds a weak reference so it never keeps the map alive
        let data = Arc::downgrade(&self.data);
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                interval.tick().await;
                let Some(map) = data.upgrade() else {
                    break;
                };
                Self::cleanup_expired(&map);
            }
        }));
    }

    /// Stop the background sweeper
    pub fn stop_cleanup(&self) {
        self.sweeper.stop();
    }

    fn cleanup_expired(data: &RwLock<HashMap<String, StoredValue<V>>>) -> usize {
        let mut data = data.write();
        let before = data.len();
        data.retain(|_, stored| !stored.is_expired());
        let count = before - data.len();
        if count > 0 {
            debug!("Cleaning up {} expired keys", count);
        }
        count
    }

    /// Remove expired entries now, returning how many were dropped
    pub fn purge_expired(&self) -> usize {
        Self::cleanup_expired(&self.data)
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Store a value without going through the async contract
    pub fn insert(&self, key: &str, value: V, ttl: Duration) {
        debug!("SET key={}, ttl={:?}", key, ttl::expiry(ttl));
        let stored = StoredValue {
            value,
            expires_at: ttl::deadline(ttl),
        };
        self.data.write().insert(key.to_string(), stored);
    }

    fn lookup(&self, key: &str) -> Result<(V, Option<Duration>)> {
        let data = self.data.read();
        match data.get(key) {
            Some(stored) if !stored.is_expired() => {
                Ok((stored.value.clone(), ttl::remaining(stored.expires_at)))
            }
            _ => Err(CacheError::KeyNotFound(key.to_string())),
        }
    }
}

#[async_trait]
impl<V> Store<V> for ExpiringStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<V> {
        self.lookup(key).map(|(value, _)| value)
    }

    async fn get_with_ttl(&self, key: &str) -> Result<(V, Option<Duration>)> {
        self.lookup(key)
    }

    async fn set(&self, key: &str, value: V) -> Result<()> {
        self.insert(key, value, Duration::from_millis(self.config.default_ttl_ms));
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<()> {
        debug!("DELETE key={}", key);
        self.data.write().remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.data.write().clear();
        Ok(())
    }

    async fn wait(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get() {
        let store = ExpiringStore::new(ExpiringStoreConfig::default());

        store.set("key1", 42u32).await.unwrap();

        assert_eq!(store.get("key1").await.unwrap(), 42);
    }

    #[test]
    fn test_insert_without_runtime() {
        let store = ExpiringStore::new(ExpiringStoreConfig::default());

        store.insert("seeded", "v".to_string(), Duration::ZERO);

        let (value, remaining) = store.lookup("seeded").unwrap();
        assert_eq!(value, "v");
        assert_eq!(remaining, None);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store: ExpiringStore<u32> = ExpiringStore::new(ExpiringStoreConfig::default());

        assert!(store.get("missing").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_ttl_expiration_is_lazy() {
        let store = ExpiringStore::new(ExpiringStoreConfig::default());

        store
            .set_with_ttl("key1", "value1", Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(store.get("key1").await.unwrap(), "value1");

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(store.get("key1").await.unwrap_err().is_not_found());
        // Still physically present until swept
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_sweeper_removes_expired_keys() {
        let store = ExpiringStore::start(
            ExpiringStoreConfig::default().with_cleanup_interval(Duration::from_millis(10)),
        );

        store
            .set_with_ttl("key1", 1u8, Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.is_empty());

        store.stop_cleanup();
    }

    #[tokio::test]
    async fn test_new_ignores_cleanup_interval() {
        let store = ExpiringStore::new(
            ExpiringStoreConfig::default().with_cleanup_interval(Duration::from_millis(10)),
        );

        store.insert("key1", 1u8, Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(100)).await;

        // No sweeper without start: the expired entry stays until read or purged
        assert_eq!(store.len(), 1);
        assert!(store.get("key1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_default_ttl_applies_to_set() {
        let store = ExpiringStore::new(
            ExpiringStoreConfig::default().with_default_ttl(Duration::from_secs(60)),
        );

        store.set("key1", 1u8).await.unwrap();

        let (_, remaining) = store.get_with_ttl("key1").await.unwrap();
        let remaining = remaining.unwrap();
        assert!(remaining > Duration::from_secs(55));
        assert!(remaining <= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_zero_ttl_never_expires() {
        let store = ExpiringStore::new(ExpiringStoreConfig::default());

        store.set_with_ttl("key1", 1u8, Duration::ZERO).await.unwrap();

        let (value, remaining) = store.get_with_ttl("key1").await.unwrap();
        assert_eq!(value, 1);
        assert_eq!(remaining, None);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = ExpiringStore::new(ExpiringStoreConfig::default());

        store.set("a", 1u8).await.unwrap();
        store.set("b", 2u8).await.unwrap();
        store.clear().await.unwrap();

        assert!(store.is_empty());
    }
}
