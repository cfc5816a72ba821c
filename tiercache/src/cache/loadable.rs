//! Loadable (cache-aside) cache
//!
//! Reads try the inner cache first. On a miss the loader is called, the
//! loaded value is returned right away and a write-back is queued for a
//! single background worker, so the inner cache converges asynchronously.
//! Loader failures are returned unchanged and never cached.

use super::Cache;
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::propagate::{BackpressurePolicy, PropagationStats, Propagator};
use crate::ttl;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Produces a value for a key the inner cache does not hold
#[async_trait]
pub trait Loader<V>: Send + Sync {
    async fn load(&self, key: &CacheKey) -> anyhow::Result<V>;
}

#[async_trait]
impl<V, F, Fut> Loader<V> for F
where
    F: Fn(CacheKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<V>> + Send,
    V: Send + 'static,
{
    async fn load(&self, key: &CacheKey) -> anyhow::Result<V> {
        (self)(key.clone()).await
    }
}

/// Write-back queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoadableConfig {
    /// Maximum number of pending write-backs
    pub queue_capacity: usize,
    /// What a reader does when the write-back queue is full
    pub backpressure: BackpressurePolicy,
    /// TTL of written-back values in milliseconds; zero means no expiry
    pub write_back_ttl_ms: u64,
}

impl Default for LoadableConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            backpressure: BackpressurePolicy::Block,
            write_back_ttl_ms: 0,
        }
    }
}

impl LoadableConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }

    pub fn with_write_back_ttl(mut self, ttl: Duration) -> Self {
        self.write_back_ttl_ms = ttl.as_millis() as u64;
        self
    }

    fn write_back_ttl(&self) -> Duration {
        Duration::from_millis(self.write_back_ttl_ms)
    }
}

struct WriteBack<V> {
    key: CacheKey,
    value: V,
}

/// Cache-aside wrapper around one typed cache.
///
/// Once [`close`](LoadableCache::close) has returned, the cache should no
/// longer be read from. Reads still answer, but loaded values are no longer
/// written back.
pub struct LoadableCache<V, C>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<C>,
    loader: Arc<dyn Loader<V>>,
    write_back: Propagator<WriteBack<V>>,
    write_back_ttl: Duration,
}

impl<V, C> LoadableCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Cache<V> + 'static,
{
    /// Wrap `inner` with `loader` using default write-back settings.
    ///
    /// Spawns the write-back worker, so it must be called within a Tokio runtime.
    pub fn new<L>(inner: C, loader: L) -> Self
    where
        L: Loader<V> + 'static,
    {
        Self::with_config(inner, loader, LoadableConfig::default())
    }

    pub fn with_config<L>(inner: C, loader: L, config: LoadableConfig) -> Self
    where
        L: Loader<V> + 'static,
    {
        let inner = Arc::new(inner);
        let write_back_ttl = config.write_back_ttl();

        info!(
            "Building loadable cache (write_back_ttl={:?})",
            ttl::expiry(write_back_ttl)
        );

        let worker_inner = Arc::clone(&inner);
        let write_back = Propagator::spawn(
            "loadable write-back",
            config.queue_capacity,
            config.backpressure,
            move |message: WriteBack<V>| {
                let inner = Arc::clone(&worker_inner);
                async move {
                    debug!("Writing back loaded key: {}", message.key);
                    inner
                        .set_with_ttl(&message.key, message.value, write_back_ttl)
                        .await
                }
            },
        );

        Self {
            inner,
            loader: Arc::new(loader),
            write_back,
            write_back_ttl,
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn write_back_stats(&self) -> PropagationStats {
        self.write_back.stats()
    }

    /// Stop accepting write-backs, drain the queue and join the worker.
    ///
    /// Reading after `close` is unsupported: values are still returned but
    /// loaded values are discarded instead of written back.
    pub async fn close(&self) {
        self.write_back.close().await;
    }

    async fn lookup(&self, key: &CacheKey) -> Result<(V, Option<Duration>)> {
        match self.inner.get_with_ttl(key).await {
            Ok(found) => return Ok(found),
            Err(e) if !e.is_not_found() => {
                debug!("Inner cache read failed for {}, loading: {}", key, e);
            }
            Err(_) => {}
        }

        let value = self.loader.load(key).await.map_err(CacheError::Load)?;
        debug!("Loaded key: {}", key);

        let message = WriteBack {
            key: key.clone(),
            value: value.clone(),
        };
        self.write_back.enqueue(message).await;

        Ok((value, ttl::expiry(self.write_back_ttl)))
    }
}

#[async_trait]
impl<V, C> Cache<V> for LoadableCache<V, C>
where
    V: Clone + Send + Sync + 'static,
    C: Cache<V> + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<V> {
        self.lookup(key).await.map(|(value, _)| value)
    }

    async fn get_with_ttl(&self, key: &CacheKey) -> Result<(V, Option<Duration>)> {
        self.lookup(key).await
    }

    async fn set(&self, key: &CacheKey, value: V) -> Result<()> {
        self.inner.set(key, value).await
    }

    async fn set_with_ttl(&self, key: &CacheKey, value: V, ttl: Duration) -> Result<()> {
        self.inner.set_with_ttl(key, value, ttl).await
    }

    async fn del(&self, key: &CacheKey) -> Result<()> {
        self.inner.del(key).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    /// Flush pending write-backs, then wait on the inner cache
    async fn wait(&self) -> Result<()> {
        self.write_back.flush().await?;
        self.inner.wait().await
    }
}
