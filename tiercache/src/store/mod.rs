//! Store Module
//!
//! A store is the raw backing mechanism behind a cache:
//! - CostStore: in-process, sharded, cost-aware memory with bounded budget
//! - RemoteStore: distributed KV service over the Synap command protocol
//! - ExpiringStore: simple in-process map with per-entry deadlines
//!
//! Stores are generic over the value type, so in-process stores never need a
//! runtime conversion. Stores that serialize report a failed decode as
//! [`CacheError::ConversionMismatch`](crate::CacheError::ConversionMismatch).

pub mod cost;
pub mod expiring;
pub mod remote;

pub use cost::{CostFn, CostStore, CostStoreConfig, CostStoreStats};
pub use expiring::{ExpiringStore, ExpiringStoreConfig};
pub use remote::{RemoteConfig, RemoteStore};

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

/// Operations every backing store must support
///
/// `get` reports [`CacheError::KeyNotFound`](crate::CacheError::KeyNotFound)
/// for an absent or expired key. A zero TTL means no expiry.
#[async_trait]
pub trait Store<V>: Send + Sync
where
    V: Send + Sync + 'static,
{
    /// Get the value stored under `key`
    async fn get(&self, key: &str) -> Result<V>;

    /// Get the value together with its remaining TTL (`None` = no expiry)
    async fn get_with_ttl(&self, key: &str) -> Result<(V, Option<Duration>)>;

    /// Store a value without expiry
    async fn set(&self, key: &str, value: V) -> Result<()>;

    /// Store a value that expires after `ttl`
    async fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) -> Result<()>;

    /// Remove a key
    async fn del(&self, key: &str) -> Result<()>;

    /// Remove every entry, or do nothing where the backend has no bulk clear
    async fn clear(&self) -> Result<()>;

    /// Block until every previously issued asynchronous write is applied
    async fn wait(&self) -> Result<()>;
}
