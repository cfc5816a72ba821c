use super::Cache;
use crate::error::Result;
use crate::key::CacheKey;
use crate::store::Store;
use async_trait::async_trait;
use std::marker::PhantomData;
use std::time::Duration;

/// Exposes a single [`Store`] through the typed [`Cache`] contract.
///
/// Keys are handed to the store in their normalized form and values pass
/// through unchanged; a store that cannot decode a value reports
/// `ConversionMismatch` instead of fabricating a default.
pub struct DelegateCache<S, V> {
    store: S,
    _marker: PhantomData<fn() -> V>,
}

impl<S, V> DelegateCache<S, V>
where
    S: Store<V>,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            _marker: PhantomData,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }
}

#[async_trait]
impl<S, V> Cache<V> for DelegateCache<S, V>
where
    S: Store<V>,
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<V> {
        self.store.get(key.as_str()).await
    }

    async fn get_with_ttl(&self, key: &CacheKey) -> Result<(V, Option<Duration>)> {
        self.store.get_with_ttl(key.as_str()).await
    }

    async fn set(&self, key: &CacheKey, value: V) -> Result<()> {
        self.store.set(key.as_str(), value).await
    }

    async fn set_with_ttl(&self, key: &CacheKey, value: V, ttl: Duration) -> Result<()> {
        self.store.set_with_ttl(key.as_str(), value, ttl).await
    }

    async fn del(&self, key: &CacheKey) -> Result<()> {
        self.store.del(key.as_str()).await
    }

    async fn clear(&self) -> Result<()> {
        self.store.clear().await
    }

    async fn wait(&self) -> Result<()> {
        self.store.wait().await
    }
}
