//! Chain cache
//!
//! An ordered list of independently built caches, fastest first. Reads scan
//! the layers in order and return the first hit immediately; when the hit
//! comes from a slower layer, a backfill message is queued and a single
//! background worker writes the value into every layer in front of the one
//! that produced it.
//!
//! Writes fan out synchronously, layer by layer. A failing layer does not
//! undo the layers that succeeded, so layers may diverge after a partial
//! failure.
//!
//! Backfills are applied in enqueue order, which is not necessarily read
//! recency: two concurrent reads of the same key can land in either order.

use super::Cache;
use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::propagate::{BackpressurePolicy, PropagationStats, Propagator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque identity of a chain layer, used only to bound backfill propagation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId(Uuid);

impl LayerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Backfill queue settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainConfig {
    /// Maximum number of pending backfill messages
    pub queue_capacity: usize,
    /// What a reader does when the backfill queue is full
    pub backpressure: BackpressurePolicy,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            backpressure: BackpressurePolicy::Block,
        }
    }
}

impl ChainConfig {
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_backpressure(mut self, policy: BackpressurePolicy) -> Self {
        self.backpressure = policy;
        self
    }
}

struct Layer<V> {
    id: LayerId,
    cache: Arc<dyn Cache<V>>,
}

struct Backfill<V> {
    key: CacheKey,
    value: V,
    ttl: Option<Duration>,
    origin: LayerId,
}

/// Ordered, self-promoting chain of caches
pub struct ChainCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    layers: Arc<Vec<Layer<V>>>,
    backfill: Propagator<Backfill<V>>,
}

impl<V> ChainCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Build a chain with the default backfill settings.
    ///
    /// Spawns the backfill worker, so it must be called within a Tokio runtime.
    pub fn new(layers: Vec<Arc<dyn Cache<V>>>) -> Self {
        Self::with_config(layers, ChainConfig::default())
    }

    pub fn with_config(layers: Vec<Arc<dyn Cache<V>>>, config: ChainConfig) -> Self {
        let layers: Arc<Vec<Layer<V>>> = Arc::new(
            layers
                .into_iter()
                .map(|cache| Layer {
                    id: LayerId::new(),
                    cache,
                })
                .collect(),
        );

        info!("Building cache chain with {} layers", layers.len());

        let worker_layers = Arc::clone(&layers);
        let backfill = Propagator::spawn(
            "chain backfill",
            config.queue_capacity,
            config.backpressure,
            move |message: Backfill<V>| {
                let layers = Arc::clone(&worker_layers);
                async move { Self::apply_backfill(&layers, message).await }
            },
        );

        Self { layers, backfill }
    }

    /// Identities of the layers, in construction order
    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.layers.iter().map(|layer| layer.id).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn backfill_stats(&self) -> PropagationStats {
        self.backfill.stats()
    }

    /// Stop the backfill worker after draining pending backfills.
    ///
    /// Reads keep working afterwards but no longer promote values.
    pub async fn close(&self) {
        self.backfill.close().await;
    }

    /// Write into every layer in front of `origin`, never into it or past it
    async fn apply_backfill(layers: &[Layer<V>], message: Backfill<V>) -> Result<()> {
        let Backfill {
            key,
            value,
            ttl,
            origin,
        } = message;

        let mut failed = 0;
        let mut total = 0;
        for layer in layers.iter().take_while(|layer| layer.id != origin) {
            total += 1;
            let result = match ttl {
                Some(ttl) => layer.cache.set_with_ttl(&key, value.clone(), ttl).await,
                None => layer.cache.set(&key, value.clone()).await,
            };
            if let Err(e) = result {
                warn!("Backfill of {} into layer {} failed: {}", key, layer.id, e);
                failed += 1;
            }
        }

        debug!("Backfilled {} into {} layers", key, total - failed);

        if failed > 0 {
            Err(CacheError::AggregateWrite { failed, total })
        } else {
            Ok(())
        }
    }

    async fn lookup(&self, key: &CacheKey) -> Result<(V, Option<Duration>)> {
        let mut last_err = None;

        for (idx, layer) in self.layers.iter().enumerate() {
            match layer.cache.get_with_ttl(key).await {
                Ok((value, ttl)) => {
                    debug!("Chain HIT for key: {} (layer {})", key, idx);
                    // An entry reported with no time left must not be
                    // promoted, a zero TTL would read as "never expires"
                    if idx > 0 && ttl != Some(Duration::ZERO) {
                        let message = Backfill {
                            key: key.clone(),
                            value: value.clone(),
                            ttl,
                            origin: layer.id,
                        };
                        self.backfill.enqueue(message).await;
                    }
                    return Ok((value, ttl));
                }
                Err(e) => {
                    if !e.is_not_found() {
                        debug!("Chain layer {} read failed for {}: {}", idx, key, e);
                    }
                    last_err = Some(e);
                }
            }
        }

        debug!("Chain MISS for key: {}", key);
        Err(last_err.unwrap_or_else(|| CacheError::KeyNotFound(key.to_string())))
    }

    async fn fan_out_write(&self, key: &CacheKey, value: V, ttl: Option<Duration>) -> Result<()> {
        let mut failed = 0;

        for layer in self.layers.iter() {
            let result = match ttl {
                Some(ttl) => layer.cache.set_with_ttl(key, value.clone(), ttl).await,
                None => layer.cache.set(key, value.clone()).await,
            };
            if let Err(e) = result {
                warn!("Write of {} to layer {} failed: {}", key, layer.id, e);
                failed += 1;
            }
        }

        if failed > 0 {
            Err(CacheError::AggregateWrite {
                failed,
                total: self.layers.len(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<V> Cache<V> for ChainCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<V> {
        self.lookup(key).await.map(|(value, _)| value)
    }

    async fn get_with_ttl(&self, key: &CacheKey) -> Result<(V, Option<Duration>)> {
        self.lookup(key).await
    }

    async fn set(&self, key: &CacheKey, value: V) -> Result<()> {
        self.fan_out_write(key, value, None).await
    }

    async fn set_with_ttl(&self, key: &CacheKey, value: V, ttl: Duration) -> Result<()> {
        self.fan_out_write(key, value, Some(ttl)).await
    }

    /// Absence in any single layer is expected, so per-layer failures are ignored
    async fn del(&self, key: &CacheKey) -> Result<()> {
        for layer in self.layers.iter() {
            if let Err(e) = layer.cache.del(key).await {
                debug!("Delete of {} from layer {} failed: {}", key, layer.id, e);
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        for layer in self.layers.iter() {
            if let Err(e) = layer.cache.clear().await {
                warn!("Clear of layer {} failed: {}", layer.id, e);
            }
        }
        Ok(())
    }

    /// Flush pending backfills, then wait on every layer
    async fn wait(&self) -> Result<()> {
        self.backfill.flush().await?;

        let mut first_err = None;
        for layer in self.layers.iter() {
            if let Err(e) = layer.cache.wait().await {
                first_err.get_or_insert(e);
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
