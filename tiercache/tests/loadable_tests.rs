//! Cache-aside behaviour of the loadable cache

mod common;

#[cfg(test)]
mod tests {
    use super::common::{RecordingCache, expiring_layer};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tiercache::{Cache, CacheError, CacheKey, ChainCache, LoadableCache};

    #[tokio::test]
    async fn test_loader_called_once_per_missing_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let inner = RecordingCache::new();

        let cache: LoadableCache<String, _> =
            LoadableCache::new(Arc::clone(&inner), move |key: CacheKey| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(format!("db:{key}"))
                }
            });
        let key = CacheKey::from("user:7");

        assert_eq!(cache.get(&key).await.unwrap(), "db:user:7");
        cache.wait().await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), "db:user:7");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(inner.peek("user:7").as_deref(), Some("db:user:7"));
        assert_eq!(cache.write_back_stats().applied, 1);
    }

    #[tokio::test]
    async fn test_loader_failure_is_returned_unchanged() {
        let inner = RecordingCache::new();
        let cache: LoadableCache<String, _> =
            LoadableCache::new(Arc::clone(&inner), |key: CacheKey| async move {
                Err::<String, _>(anyhow::anyhow!("no row for {key}"))
            });

        let err = cache.get(&CacheKey::from("missing")).await.unwrap_err();

        assert!(matches!(err, CacheError::Load(_)));
        assert_eq!(err.to_string(), "no row for missing");
        cache.wait().await.unwrap();
        assert_eq!(inner.set_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_back_does_not_affect_reader() {
        let inner = RecordingCache::failing();
        let cache: LoadableCache<String, _> =
            LoadableCache::new(Arc::clone(&inner), |_key: CacheKey| async move {
                Ok::<_, anyhow::Error>("fresh".to_string())
            });

        assert_eq!(cache.get(&CacheKey::from("k")).await.unwrap(), "fresh");
        cache.wait().await.unwrap();

        let stats = cache.write_back_stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.applied, 0);
    }

    #[tokio::test]
    async fn test_loadable_over_chain_fills_every_layer() {
        let local = expiring_layer();
        let remote = RecordingCache::new();
        let chain: ChainCache<String> = ChainCache::new(vec![
            Arc::clone(&local) as Arc<dyn Cache<String>>,
            Arc::clone(&remote) as Arc<dyn Cache<String>>,
        ]);

        let cache = LoadableCache::new(chain, |_key: CacheKey| async move {
            Ok::<_, anyhow::Error>("computed".to_string())
        });
        let key = CacheKey::from("report");

        assert_eq!(cache.get(&key).await.unwrap(), "computed");
        cache.wait().await.unwrap();

        assert_eq!(local.get(&key).await.unwrap(), "computed");
        assert_eq!(remote.peek("report").as_deref(), Some("computed"));
    }

    #[tokio::test]
    async fn test_close_drains_pending_write_backs() {
        let inner = RecordingCache::new();
        let cache: LoadableCache<String, _> =
            LoadableCache::new(Arc::clone(&inner), |key: CacheKey| async move {
                Ok::<_, anyhow::Error>(key.to_string())
            });

        for n in 0..10 {
            cache.get(&CacheKey::from(format!("k{n}"))).await.unwrap();
        }
        cache.close().await;

        for n in 0..10 {
            let key = format!("k{n}");
            assert_eq!(inner.peek(&key), Some(key.clone()));
        }
    }

    #[tokio::test]
    async fn test_value_survives_close_without_second_load() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let cache: LoadableCache<String, _> =
            LoadableCache::new(expiring_layer(), move |_key: CacheKey| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>("x".to_string())
                }
            });
        let key = CacheKey::from("k");

        assert_eq!(cache.get(&key).await.unwrap(), "x");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        cache.close().await;

        assert_eq!(cache.get(&key).await.unwrap(), "x");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_writes_pass_through_to_inner() {
        let inner = RecordingCache::new();
        let cache: LoadableCache<String, _> =
            LoadableCache::new(Arc::clone(&inner), |_key: CacheKey| async move {
                Ok::<_, anyhow::Error>("loaded".to_string())
            });
        let key = CacheKey::from("k");

        cache.set(&key, "direct".to_string()).await.unwrap();
        assert_eq!(inner.peek("k").as_deref(), Some("direct"));
        assert_eq!(cache.get(&key).await.unwrap(), "direct");

        cache.del(&key).await.unwrap();
        assert_eq!(inner.peek("k"), None);
    }
}
