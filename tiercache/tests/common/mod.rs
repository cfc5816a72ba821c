//! Common test utilities

use async_trait::async_trait;
use mockito::{Server, ServerGuard};
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tiercache::{
    Cache, CacheError, CacheKey, DelegateCache, ExpiringStore, ExpiringStoreConfig, RemoteConfig,
    RemoteStore, Result,
};

/// Setup a remote store pointing to a mock Synap server
#[allow(dead_code)] // Used by other test modules
pub async fn setup_remote_store<V>() -> (RemoteStore<V>, ServerGuard)
where
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    let server = Server::new_async().await;
    let config = RemoteConfig::new(server.url()).with_timeout(Duration::from_secs(5));
    let store = RemoteStore::new(config).unwrap();
    (store, server)
}

/// In-process layer backed by the expiring map store
#[allow(dead_code)]
pub fn expiring_layer() -> Arc<DelegateCache<ExpiringStore<String>, String>> {
    Arc::new(DelegateCache::new(ExpiringStore::new(
        ExpiringStoreConfig::default(),
    )))
}

/// Cache double that records traffic and can be told to refuse writes
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingCache {
    values: Mutex<HashMap<String, (String, Option<Duration>)>>,
    pub gets: AtomicUsize,
    pub sets: AtomicUsize,
    fail_writes: AtomicBool,
}

#[allow(dead_code)]
impl RecordingCache {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let cache = Self::default();
        cache.fail_writes.store(true, Ordering::SeqCst);
        Arc::new(cache)
    }

    /// Seed a value without counting it as a write
    pub fn seed(&self, key: &str, value: &str) {
        self.values
            .lock()
            .insert(key.to_string(), (value.to_string(), None));
    }

    pub fn peek(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).map(|(value, _)| value.clone())
    }

    pub fn ttl_of(&self, key: &str) -> Option<Duration> {
        self.values.lock().get(key).and_then(|(_, ttl)| *ttl)
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    fn write(&self, key: &CacheKey, value: String, ttl: Option<Duration>) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CacheError::Remote(format!("write refused for {}", key)));
        }
        self.values.lock().insert(key.to_string(), (value, ttl));
        Ok(())
    }
}

#[async_trait]
impl Cache<String> for RecordingCache {
    async fn get(&self, key: &CacheKey) -> Result<String> {
        self.get_with_ttl(key).await.map(|(value, _)| value)
    }

    async fn get_with_ttl(&self, key: &CacheKey) -> Result<(String, Option<Duration>)> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.values
            .lock()
            .get(key.as_str())
            .cloned()
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    async fn set(&self, key: &CacheKey, value: String) -> Result<()> {
        self.write(key, value, None)
    }

    async fn set_with_ttl(&self, key: &CacheKey, value: String, ttl: Duration) -> Result<()> {
        self.write(key, value, tiercache::ttl::expiry(ttl))
    }

    async fn del(&self, key: &CacheKey) -> Result<()> {
        self.values.lock().remove(key.as_str());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.values.lock().clear();
        Ok(())
    }

    async fn wait(&self) -> Result<()> {
        Ok(())
    }
}
