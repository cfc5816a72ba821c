pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod propagate;
pub mod store;
pub mod ttl;

// Re-export commonly used types
pub use cache::{
    Cache, ChainCache, ChainConfig, DelegateCache, LayerId, LoadableCache, LoadableConfig, Loader,
    TwoTierCache, TwoTierConfig,
};
pub use config::TierCacheConfig;
pub use error::{CacheError, Result};
pub use key::{CacheKey, Digested, KeySource, Stable, StableKey};
pub use logging::{LogFormat, LoggingConfig, build_subscriber, init_tracing};
pub use propagate::{BackpressurePolicy, PropagationStats, Propagator};
pub use store::{
    CostStore, CostStoreConfig, CostStoreStats, ExpiringStore, ExpiringStoreConfig, RemoteConfig,
    RemoteStore, Store,
};
