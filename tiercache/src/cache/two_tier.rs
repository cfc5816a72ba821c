use super::Cache;
use crate::error::Result;
use crate::key::CacheKey;
use crate::store::{CostStore, CostStoreConfig, CostStoreStats, Store};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::time::Duration;
use tracing::{debug, info};

/// Two-tier cache configuration, fixed at construction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TwoTierConfig {
    /// Route every operation straight to the remote tier
    pub disable_local: bool,
    pub num_counters: usize,
    pub max_cost: u64,
    pub buffer_items: usize,
}

impl Default for TwoTierConfig {
    fn default() -> Self {
        let local = CostStoreConfig::default();
        Self {
            disable_local: false,
            num_counters: local.num_counters,
            max_cost: local.max_cost,
            buffer_items: local.buffer_items,
        }
    }
}

impl TwoTierConfig {
    pub fn without_local(mut self) -> Self {
        self.disable_local = true;
        self
    }

    pub fn with_max_cost(mut self, max_cost: u64) -> Self {
        self.max_cost = max_cost;
        self
    }

    /// Sizing handed to the local cost-aware store
    pub fn local_store_config(&self) -> CostStoreConfig {
        CostStoreConfig::default()
            .with_num_counters(self.num_counters)
            .with_max_cost(self.max_cost)
            .with_buffer_items(self.buffer_items)
    }
}

/// Local cost-aware store in front of one remote typed cache.
///
/// Reads hit local first and fall through to remote on a miss. Writes go to
/// remote first and are mirrored locally only once remote accepted them.
pub struct TwoTierCache<V, R> {
    local: Option<CostStore<V>>,
    remote: R,
    _marker: PhantomData<fn() -> V>,
}

impl<V, R> TwoTierCache<V, R>
where
    V: Clone + Send + Sync + 'static,
    R: Cache<V>,
{
    pub fn new(config: TwoTierConfig, remote: R) -> Self {
        let local = if config.disable_local {
            info!("Two-tier cache built with local tier disabled");
            None
        } else {
            Some(CostStore::new(config.local_store_config()))
        };

        Self {
            local,
            remote,
            _marker: PhantomData,
        }
    }

    pub fn local_enabled(&self) -> bool {
        self.local.is_some()
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn local_stats(&self) -> Option<CostStoreStats> {
        self.local.as_ref().map(CostStore::stats)
    }

    /// Mirror a value that remote already accepted. A local rejection only
    /// means the value is served from remote.
    async fn mirror(&self, key: &CacheKey, value: V, ttl: Duration) {
        if let Some(local) = &self.local {
            if let Err(e) = local.set_with_ttl(key.as_str(), value, ttl).await {
                debug!("Local tier did not keep {}: {}", key, e);
            }
        }
    }
}

#[async_trait]
impl<V, R> Cache<V> for TwoTierCache<V, R>
where
    V: Clone + Send + Sync + 'static,
    R: Cache<V>,
{
    async fn get(&self, key: &CacheKey) -> Result<V> {
        if let Some(local) = &self.local {
            if let Some((value, _)) = local.lookup(key.as_str()) {
                return Ok(value);
            }
        }
        self.remote.get(key).await
    }

    async fn get_with_ttl(&self, key: &CacheKey) -> Result<(V, Option<Duration>)> {
        if let Some(local) = &self.local {
            if let Some(found) = local.lookup(key.as_str()) {
                return Ok(found);
            }
        }
        self.remote.get_with_ttl(key).await
    }

    async fn set(&self, key: &CacheKey, value: V) -> Result<()> {
        match &self.local {
            Some(_) => {
                self.remote.set(key, value.clone()).await?;
                self.mirror(key, value, Duration::ZERO).await;
                Ok(())
            }
            None => self.remote.set(key, value).await,
        }
    }

    async fn set_with_ttl(&self, key: &CacheKey, value: V, ttl: Duration) -> Result<()> {
        match &self.local {
            Some(_) => {
                self.remote.set_with_ttl(key, value.clone(), ttl).await?;
                self.mirror(key, value, ttl).await;
                Ok(())
            }
            None => self.remote.set_with_ttl(key, value, ttl).await,
        }
    }

    async fn del(&self, key: &CacheKey) -> Result<()> {
        if let Some(local) = &self.local {
            local.remove(key.as_str());
        }
        self.remote.del(key).await
    }

    async fn clear(&self) -> Result<()> {
        if let Some(local) = &self.local {
            local.purge();
        }
        self.remote.clear().await
    }

    async fn wait(&self) -> Result<()> {
        if let Some(local) = &self.local {
            local.flush_access();
        }
        self.remote.wait().await
    }
}
