//! Cost-aware in-process store
//!
//! Entries carry a cost and the store keeps the sum of costs under a fixed
//! budget. Hits are buffered per shard and folded into a bounded frequency
//! table; when the budget is exceeded a small sample of entries is inspected
//! and the least frequently used one is evicted.

use super::Store;
use crate::error::{CacheError, Result};
use crate::ttl;
use ahash::RandomState;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Number of entries inspected when picking an eviction victim
const EVICTION_SAMPLE: usize = 5;

/// Cost function applied when a value is stored without an explicit cost
pub type CostFn<V> = Arc<dyn Fn(&V) -> u64 + Send + Sync>;

/// Sizing of a [`CostStore`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CostStoreConfig {
    /// Number of distinct keys tracked by the frequency table
    pub num_counters: usize,
    /// Total cost budget
    pub max_cost: u64,
    /// Buffered hits per shard before they are folded into the frequency table
    pub buffer_items: usize,
    /// Number of independently locked shards
    pub shards: usize,
}

impl Default for CostStoreConfig {
    fn default() -> Self {
        Self {
            num_counters: 100_000,
            max_cost: 10_000,
            buffer_items: 64,
            shards: 16,
        }
    }
}

impl CostStoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_num_counters(mut self, num_counters: usize) -> Self {
        self.num_counters = num_counters;
        self
    }

    pub fn with_max_cost(mut self, max_cost: u64) -> Self {
        self.max_cost = max_cost;
        self
    }

    pub fn with_buffer_items(mut self, buffer_items: usize) -> Self {
        self.buffer_items = buffer_items;
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }
}

/// Snapshot of store counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CostStoreStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub rejections: u64,
    pub cost_used: u64,
    pub entries: usize,
}

impl CostStoreStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Entry<V> {
    value: V,
    cost: u64,
    deadline: Option<Instant>,
}

impl<V> Entry<V> {
    fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|at| Instant::now() >= at)
    }
}

struct Shard<V> {
    entries: RwLock<HashMap<String, Entry<V>, RandomState>>,
    access: Mutex<Vec<u64>>,
}

/// Bounded frequency counters with periodic halving so old popularity fades
struct FrequencyTable {
    counts: HashMap<u64, u32, RandomState>,
    capacity: usize,
    increments: usize,
}

impl FrequencyTable {
    fn new(capacity: usize) -> Self {
        Self {
            counts: HashMap::with_hasher(RandomState::new()),
            capacity: capacity.max(1),
            increments: 0,
        }
    }

    fn increment(&mut self, hash: u64) {
        if !self.counts.contains_key(&hash) && self.counts.len() >= self.capacity {
            self.age();
            if self.counts.len() >= self.capacity {
                return;
            }
        }
        let count = self.counts.entry(hash).or_insert(0);
        *count = count.saturating_add(1);

        self.increments += 1;
        if self.increments >= self.capacity.saturating_mul(10) {
            self.age();
        }
    }

    fn estimate(&self, hash: u64) -> u32 {
        self.counts.get(&hash).copied().unwrap_or(0)
    }

    fn age(&mut self) {
        self.counts.retain(|_, count| {
            *count /= 2;
            *count > 0
        });
        self.increments = 0;
    }

    fn clear(&mut self) {
        self.counts.clear();
        self.increments = 0;
    }
}

struct Inner<V> {
    shards: Vec<Shard<V>>,
    frequency: Mutex<FrequencyTable>,
    hasher: RandomState,
    config: CostStoreConfig,
    cost_fn: Option<CostFn<V>>,
    cost_used: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    rejections: AtomicU64,
}

/// Sharded, cost-aware in-process store
pub struct CostStore<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CostStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> CostStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a store where every entry costs 1
    pub fn new(config: CostStoreConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a store that prices entries with `cost_fn`
    pub fn with_cost_fn<F>(config: CostStoreConfig, cost_fn: F) -> Self
    where
        F: Fn(&V) -> u64 + Send + Sync + 'static,
    {
        Self::build(config, Some(Arc::new(cost_fn)))
    }

    fn build(config: CostStoreConfig, cost_fn: Option<CostFn<V>>) -> Self {
        info!(
            "Initializing cost store with max_cost={}, num_counters={}, shards={}, buffer_items={}",
            config.max_cost, config.num_counters, config.shards, config.buffer_items
        );

        let shard_count = config.shards.max(1);
        let shards = (0..shard_count)
            .map(|_| Shard {
                entries: RwLock::new(HashMap::with_hasher(RandomState::new())),
                access: Mutex::new(Vec::with_capacity(config.buffer_items)),
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                shards,
                frequency: Mutex::new(FrequencyTable::new(config.num_counters)),
                hasher: RandomState::new(),
                config,
                cost_fn,
                cost_used: AtomicU64::new(0),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                evictions: AtomicU64::new(0),
                rejections: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &CostStoreConfig {
        &self.inner.config
    }

    fn key_hash(&self, key: &str) -> u64 {
        self.inner.hasher.hash_one(key)
    }

    fn shard_index(&self, hash: u64) -> usize {
        (hash % self.inner.shards.len() as u64) as usize
    }

    /// Look up a live entry, returning the value and its remaining TTL
    pub fn lookup(&self, key: &str) -> Option<(V, Option<Duration>)> {
        let hash = self.key_hash(key);
        let shard = &self.inner.shards[self.shard_index(hash)];

        let live = {
            let entries = shard.entries.read();
            match entries.get(key) {
                Some(entry) if !entry.is_expired() => {
                    Some((entry.value.clone(), ttl::remaining(entry.deadline)))
                }
                Some(_) => None,
                None => {
                    self.inner.misses.fetch_add(1, Ordering::Relaxed);
                    return None;
                }
            }
        };

        if let Some(found) = live {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            self.record_access(shard, hash);
            return Some(found);
        }

        debug!("Cost store key expired: {}", key);
        {
            let mut entries = shard.entries.write();
            if entries.get(key).is_some_and(|entry| entry.is_expired()) {
                if let Some(entry) = entries.remove(key) {
                    self.inner.cost_used.fetch_sub(entry.cost, Ordering::Relaxed);
                }
            }
        }

        self.inner.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert a value with an explicit cost, evicting until the budget holds
    pub fn insert(&self, key: &str, value: V, cost: u64, ttl: Duration) -> Result<()> {
        let max_cost = self.inner.config.max_cost;
        if cost > max_cost {
            self.inner.rejections.fetch_add(1, Ordering::Relaxed);
            debug!("Cost store REJECT: {} (cost={})", key, cost);
            return Err(CacheError::Rejected { cost, max_cost });
        }

        let hash = self.key_hash(key);
        let shard = &self.inner.shards[self.shard_index(hash)];
        {
            let mut entries = shard.entries.write();
            let entry = Entry {
                value,
                cost,
                deadline: ttl::deadline(ttl),
            };
            if let Some(old) = entries.insert(key.to_string(), entry) {
                self.inner.cost_used.fetch_sub(old.cost, Ordering::Relaxed);
            }
            self.inner.cost_used.fetch_add(cost, Ordering::Relaxed);
        }
        self.record_access(shard, hash);

        debug!("Cost store PUT: {} (cost={})", key, cost);
        self.evict_over_budget(key);
        Ok(())
    }

    fn cost_of(&self, value: &V) -> u64 {
        self.inner.cost_fn.as_ref().map_or(1, |cost_fn| cost_fn(value))
    }

    /// Store a value with an explicit cost instead of the configured cost function
    pub async fn set_with_cost(&self, key: &str, value: V, cost: u64, ttl: Duration) -> Result<()> {
        self.insert(key, value, cost, ttl)
    }

    /// Remove a key, reporting whether it was present
    pub fn remove(&self, key: &str) -> bool {
        let hash = self.key_hash(key);
        let shard = &self.inner.shards[self.shard_index(hash)];
        let removed = shard.entries.write().remove(key);

        match removed {
            Some(entry) => {
                self.inner.cost_used.fetch_sub(entry.cost, Ordering::Relaxed);
                debug!("Cost store DELETE: {}", key);
                true
            }
            None => false,
        }
    }

    /// Drop every entry and all frequency history
    pub fn purge(&self) {
        let mut count = 0;
        for shard in &self.inner.shards {
            let mut entries = shard.entries.write();
            for entry in entries.values() {
                self.inner.cost_used.fetch_sub(entry.cost, Ordering::Relaxed);
            }
            count += entries.len();
            entries.clear();
            shard.access.lock().clear();
        }
        self.inner.frequency.lock().clear();

        debug!("Cost store PURGE ({} entries)", count);
    }

    /// Fold every shard's buffered hits into the frequency table
    pub fn flush_access(&self) {
        for shard in &self.inner.shards {
            let pending: Vec<u64> = std::mem::take(&mut *shard.access.lock());
            self.apply_access(&pending);
        }
    }

    pub fn stats(&self) -> CostStoreStats {
        let entries = self
            .inner
            .shards
            .iter()
            .map(|shard| shard.entries.read().len())
            .sum();

        CostStoreStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            evictions: self.inner.evictions.load(Ordering::Relaxed),
            rejections: self.inner.rejections.load(Ordering::Relaxed),
            cost_used: self.inner.cost_used.load(Ordering::Relaxed),
            entries,
        }
    }

    fn record_access(&self, shard: &Shard<V>, hash: u64) {
        let full = {
            let mut access = shard.access.lock();
            access.push(hash);
            if access.len() >= self.inner.config.buffer_items.max(1) {
                Some(std::mem::take(&mut *access))
            } else {
                None
            }
        };

        if let Some(pending) = full {
            self.apply_access(&pending);
        }
    }

    fn apply_access(&self, hashes: &[u64]) {
        if hashes.is_empty() {
            return;
        }
        let mut frequency = self.inner.frequency.lock();
        for &hash in hashes {
            frequency.increment(hash);
        }
    }

    fn evict_over_budget(&self, protected: &str) {
        let max_cost = self.inner.config.max_cost;

        while self.inner.cost_used.load(Ordering::Relaxed) > max_cost {
            let Some((shard_idx, victim)) = self.pick_victim(protected) else {
                break;
            };

            let removed = self.inner.shards[shard_idx].entries.write().remove(&victim);
            if let Some(entry) = removed {
                self.inner.cost_used.fetch_sub(entry.cost, Ordering::Relaxed);
                self.inner.evictions.fetch_add(1, Ordering::Relaxed);
                debug!("Cost store EVICT: {} (cost={})", victim, entry.cost);
            }
        }
    }

    /// Sample a handful of entries and return the least frequently used one.
    /// Expired entries are preferred over everything else.
    fn pick_victim(&self, protected: &str) -> Option<(usize, String)> {
        let shard_count = self.inner.shards.len();
        let start = self.shard_index(self.key_hash(protected));
        let mut sample: Vec<(usize, String, bool, u64)> = Vec::with_capacity(EVICTION_SAMPLE);

        for offset in 1..=shard_count {
            let idx = (start + offset) % shard_count;
            let entries = self.inner.shards[idx].entries.read();
            for (key, entry) in entries.iter() {
                if key == protected {
                    continue;
                }
                sample.push((idx, key.clone(), entry.is_expired(), self.key_hash(key)));
                if sample.len() >= EVICTION_SAMPLE {
                    break;
                }
            }
            if sample.len() >= EVICTION_SAMPLE {
                break;
            }
        }

        let frequency = self.inner.frequency.lock();
        sample
            .into_iter()
            .min_by_key(|(_, _, expired, hash)| (!*expired, frequency.estimate(*hash)))
            .map(|(idx, key, _, _)| (idx, key))
    }
}

#[async_trait]
impl<V> Store<V> for CostStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<V> {
        self.lookup(key)
            .map(|(value, _)| value)
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    async fn get_with_ttl(&self, key: &str) -> Result<(V, Option<Duration>)> {
        self.lookup(key)
            .ok_or_else(|| CacheError::KeyNotFound(key.to_string()))
    }

    async fn set(&self, key: &str, value: V) -> Result<()> {
        let cost = self.cost_of(&value);
        self.insert(key, value, cost, Duration::ZERO)
    }

    async fn set_with_ttl(&self, key: &str, value: V, ttl: Duration) -> Result<()> {
        let cost = self.cost_of(&value);
        self.insert(key, value, cost, ttl)
    }

    async fn del(&self, key: &str) -> Result<()> {
        self.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.purge();
        Ok(())
    }

    async fn wait(&self) -> Result<()> {
        self.flush_access();
        Ok(())
    }
}
