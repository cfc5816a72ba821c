use anyhow::{Context, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use url::Url;

use crate::cache::{ChainConfig, LoadableConfig, TwoTierConfig};
use crate::logging::LoggingConfig;
use crate::store::{CostStoreConfig, ExpiringStoreConfig, RemoteConfig};

/// File-level configuration for every adapter and composite cache.
///
/// Missing sections fall back to their defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TierCacheConfig {
    pub logging: LoggingConfig,
    pub cost_store: CostStoreConfig,
    pub expiring: ExpiringStoreConfig,
    pub remote: RemoteConfig,
    pub two_tier: TwoTierConfig,
    pub chain: ChainConfig,
    pub loadable: LoadableConfig,
}

impl TierCacheConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a YAML document
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let config: TierCacheConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.cost_store.max_cost == 0 {
            bail!("cost_store.max_cost must be greater than zero");
        }
        if self.two_tier.max_cost == 0 && !self.two_tier.disable_local {
            bail!("two_tier.max_cost must be greater than zero when the local tier is enabled");
        }
        if self.chain.queue_capacity == 0 {
            bail!("chain.queue_capacity must be greater than zero");
        }
        if self.loadable.queue_capacity == 0 {
            bail!("loadable.queue_capacity must be greater than zero");
        }
        Url::parse(&self.remote.base_url)
            .with_context(|| format!("Invalid remote.base_url: {}", self.remote.base_url))?;
        Ok(())
    }

    /// Sizing of the standalone cost-aware store
    pub fn to_cost_config(&self) -> CostStoreConfig {
        self.cost_store.clone()
    }

    /// Sizing of the local tier of a two-tier cache
    pub fn to_local_tier_config(&self) -> CostStoreConfig {
        self.two_tier.local_store_config()
    }

    pub fn to_remote_config(&self) -> RemoteConfig {
        self.remote.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogFormat;
    use crate::propagate::BackpressurePolicy;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = TierCacheConfig::from_yaml("{}").unwrap();
        assert_eq!(config, TierCacheConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let yaml = r#"
logging:
  level: debug
  format: json
chain:
  queue_capacity: 16
  backpressure: drop_newest
remote:
  base_url: http://cache.internal:15500
  timeout_ms: 250
  auth_token: secret
"#;
        let config = TierCacheConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.chain.queue_capacity, 16);
        assert_eq!(config.chain.backpressure, BackpressurePolicy::DropNewest);
        assert_eq!(config.to_remote_config().timeout_ms, 250);
        assert_eq!(config.to_remote_config().auth_token.as_deref(), Some("secret"));
        assert_eq!(config.loadable, LoadableConfig::default());
    }

    #[test]
    fn test_validation_rejects_zero_budget() {
        let yaml = r#"
cost_store:
  num_counters: 100
  max_cost: 0
  buffer_items: 4
  shards: 2
"#;
        let err = TierCacheConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("cost_store.max_cost"));
    }

    #[test]
    fn test_validation_rejects_bad_url() {
        let mut config = TierCacheConfig::default();
        config.remote.base_url = "not a url".to_string();

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_local_tier_conversion() {
        let mut config = TierCacheConfig::default();
        config.two_tier.max_cost = 42;

        assert_eq!(config.to_local_tier_config().max_cost, 42);
        assert_eq!(config.to_cost_config(), CostStoreConfig::default());
    }
}
