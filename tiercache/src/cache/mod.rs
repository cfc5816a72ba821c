//! Cache Module
//!
//! The typed cache contract and its compositions:
//! - Delegate: a single store behind the typed contract
//! - TwoTier: local cost-aware store in front of one remote cache
//! - Chain: ordered layers with asynchronous read-promotion
//! - Loadable: cache-aside wrapper with a miss-triggered loader

pub mod chain;
pub mod delegate;
pub mod loadable;
pub mod two_tier;

pub use chain::{ChainCache, ChainConfig, LayerId};
pub use delegate::DelegateCache;
pub use loadable::{LoadableCache, LoadableConfig, Loader};
pub use two_tier::{TwoTierCache, TwoTierConfig};

use crate::error::Result;
use crate::key::CacheKey;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Typed cache contract
///
/// This is the only surface the rest of an application depends on. A zero
/// TTL means no expiry. `get` reports
/// [`CacheError::KeyNotFound`](crate::CacheError::KeyNotFound) on a miss.
#[async_trait]
pub trait Cache<V>: Send + Sync
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &CacheKey) -> Result<V>;

    /// Value plus remaining TTL (`None` = no expiry)
    async fn get_with_ttl(&self, key: &CacheKey) -> Result<(V, Option<Duration>)>;

    async fn set(&self, key: &CacheKey, value: V) -> Result<()>;

    async fn set_with_ttl(&self, key: &CacheKey, value: V, ttl: Duration) -> Result<()>;

    async fn del(&self, key: &CacheKey) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Block until all previously issued asynchronous writes are applied
    async fn wait(&self) -> Result<()>;
}

#[async_trait]
impl<V, C> Cache<V> for Arc<C>
where
    V: Clone + Send + Sync + 'static,
    C: Cache<V> + ?Sized,
{
    async fn get(&self, key: &CacheKey) -> Result<V> {
        (**self).get(key).await
    }

    async fn get_with_ttl(&self, key: &CacheKey) -> Result<(V, Option<Duration>)> {
        (**self).get_with_ttl(key).await
    }

    async fn set(&self, key: &CacheKey, value: V) -> Result<()> {
        (**self).set(key, value).await
    }

    async fn set_with_ttl(&self, key: &CacheKey, value: V, ttl: Duration) -> Result<()> {
        (**self).set_with_ttl(key, value, ttl).await
    }

    async fn del(&self, key: &CacheKey) -> Result<()> {
        (**self).del(key).await
    }

    async fn clear(&self) -> Result<()> {
        (**self).clear().await
    }

    async fn wait(&self) -> Result<()> {
        (**self).wait().await
    }
}
