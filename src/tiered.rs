//! Session tier over a shared tier
//!
//! - Session: scoped to one unit of work, cleared by [`TieredCache::end_unit_of_work`]
//! - Shared: lives across units of work, self-populating from the loader
//!
//! A lookup that misses the session tier reads through the shared tier and
//! promotes the value into the session tier.

use std::{future::Future, sync::Arc};
use tracing::debug;

use crate::{
    BoxError, CacheConfig, CacheError, CacheStatistics, Cacheable, Key, Loader, SingleFlightCache,
    Tier, TierConfig,
};

/// Two-tier self-populating cache
pub struct TieredCache<K, V>
where
    K: Key,
    V: Cacheable,
{
    session: SingleFlightCache<K, V>,
    shared: SingleFlightCache<K, V>,
    session_config: TierConfig,
}

impl<K, V> Clone for TieredCache<K, V>
where
    K: Key,
    V: Cacheable,
{
    /// The clone belongs to the same unit of work. See [`TieredCache::open_session`].
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            shared: self.shared.clone(),
            session_config: self.session_config.clone(),
        }
    }
}

impl<K, V> TieredCache<K, V>
where
    K: Key,
    V: Cacheable,
{
    /// Create a tiered cache whose shared tier loads through `loader`
    pub fn new<L>(config: CacheConfig, loader: L) -> Self
    where
        L: Loader<K, V> + 'static,
    {
        let stats = Arc::new(CacheStatistics::new(config.statistics_enabled));
        let shared = SingleFlightCache::with_loader(Tier::Shared, &config.shared, stats, loader);
        Self::over(shared, config.session)
    }

    /// Put a fresh session tier in front of an existing shared tier.
    /// Statistics are those of the shared tier.
    pub fn over(shared: SingleFlightCache<K, V>, session_config: TierConfig) -> Self {
        let session = SingleFlightCache::new(
            Tier::Session,
            &session_config,
            Arc::clone(shared.statistics()),
        );
        Self {
            session,
            shared,
            session_config,
        }
    }

    /// Start another unit of work: an empty session tier sharing this
    /// cache's shared tier and statistics.
    pub fn open_session(&self) -> Self {
        Self::over(self.shared.clone(), self.session_config.clone())
    }

    pub fn session(&self) -> &SingleFlightCache<K, V> {
        &self.session
    }

    pub fn shared(&self) -> &SingleFlightCache<K, V> {
        &self.shared
    }

    pub fn statistics(&self) -> &Arc<CacheStatistics> {
        self.shared.statistics()
    }

    /// Get value by key: session, then shared, then the loader
    pub async fn get(&self, key: &K) -> Result<Arc<V>, CacheError> {
        if let Some(value) = self.session.peek(key).await {
            return Ok(value);
        }
        let value = self.shared.get(key).await?;
        self.promote(key, &value).await;
        Ok(value)
    }

    /// Like [`Self::get`], loading a shared miss with `load` instead of the
    /// bound loader
    pub async fn get_with<F, Fut>(&self, key: &K, load: F) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>, BoxError>> + Send + 'static,
    {
        if let Some(value) = self.session.peek(key).await {
            return Ok(value);
        }
        let value = self.shared.get_with(key, load).await?;
        self.promote(key, &value).await;
        Ok(value)
    }

    async fn promote(&self, key: &K, value: &Arc<V>) {
        debug!("Populating session from shared for key: {}", key);
        self.session.put_arc(key.clone(), Arc::clone(value)).await;
    }

    /// Write-through: store an authoritative value in both tiers
    pub async fn put(&self, key: K, value: V) {
        let value = Arc::new(value);
        self.shared.put_arc(key.clone(), Arc::clone(&value)).await;
        self.session.put_arc(key, value).await;
    }

    /// Invalidate the key in both tiers, session first.
    ///
    /// Neither tier cancels an in-flight load, so a load completing after
    /// this call may still store its value. A concurrent `get` running
    /// between the two steps can likewise promote the old shared value.
    pub async fn invalidate(&self, key: &K) {
        self.session.invalidate(key).await;
        self.shared.invalidate(key).await;
    }

    /// Drop one key from the session tier only
    pub async fn evict_session(&self, key: &K) {
        self.session.invalidate(key).await;
    }

    /// Discard the whole session tier; the shared tier is untouched.
    pub fn end_unit_of_work(&self) {
        debug!("Ending unit of work, clearing session tier");
        self.session.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{StatsSnapshot, TierSnapshot, loader_fn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    type Employees = TieredCache<i64, String>;

    fn employees() -> (Employees, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = loader_fn({
            let calls = Arc::clone(&calls);
            move |id: i64| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    match id {
                        0 => Err::<Option<String>, BoxError>("sor down".into()),
                        id if id > 100 => Ok(None),
                        id => Ok(Some(format!("Name{id}"))),
                    }
                }
            }
        });
        (TieredCache::new(CacheConfig::default(), loader), calls)
    }

    fn snap(cache: &Employees) -> StatsSnapshot {
        cache.statistics().snapshot()
    }

    #[tokio::test]
    async fn miss_in_both_tiers_loads_once_and_fills_both() {
        let (cache, calls) = employees();

        assert_eq!(*cache.get(&1).await.unwrap(), "Name1");
        assert!(cache.session().contains(&1));
        assert!(cache.shared().contains(&1));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stats = snap(&cache);
        assert_eq!(
            stats.session,
            TierSnapshot {
                fetches: 0,
                hits: 0,
                misses: 1,
                puts: 1
            }
        );
        assert_eq!(
            stats.shared,
            TierSnapshot {
                fetches: 1,
                hits: 0,
                misses: 1,
                puts: 1
            }
        );
    }

    #[tokio::test]
    async fn shared_hit_is_promoted_into_session() {
        let (cache, calls) = employees();
        cache.shared().put(5, "Preloaded".to_owned()).await;
        cache.statistics().reset();

        assert_eq!(*cache.get(&5).await.unwrap(), "Preloaded");
        let stats = snap(&cache);
        assert_eq!((stats.session.misses, stats.shared.hits), (1, 1));
        assert_eq!(stats.session.hits, 0);
        assert_eq!(stats.shared.misses, 0);

        assert_eq!(*cache.get(&5).await.unwrap(), "Preloaded");
        let after = snap(&cache);
        assert_eq!(after.session.hits, 1);
        assert_eq!(after.shared, stats.shared);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn end_of_unit_of_work_keeps_shared_tier() {
        let (cache, calls) = employees();
        cache.get(&1).await.unwrap();
        cache.get(&2).await.unwrap();

        cache.end_unit_of_work();
        assert!(!cache.session().contains(&1));
        assert!(!cache.session().contains(&2));
        assert!(cache.shared().contains(&1));
        assert!(cache.shared().contains(&2));

        let before = snap(&cache);
        assert_eq!(*cache.get(&1).await.unwrap(), "Name1");
        let after = snap(&cache);
        assert_eq!(after.shared.hits, before.shared.hits + 1);
        assert_eq!(after.session.misses, before.session.misses + 1);
        assert_eq!(after.total_fetches(), before.total_fetches());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn invalidate_clears_both_tiers() {
        let (cache, calls) = employees();
        cache.put(3, "Old".to_owned()).await;
        assert_eq!(*cache.get(&3).await.unwrap(), "Old");

        cache.invalidate(&3).await;
        assert!(!cache.session().contains(&3));
        assert!(!cache.shared().contains(&3));

        assert_eq!(*cache.get(&3).await.unwrap(), "Name3");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn evicting_from_session_reads_through_shared() {
        let (cache, calls) = employees();
        cache.get(&1).await.unwrap();
        cache.evict_session(&1).await;

        let before = snap(&cache);
        cache.get(&1).await.unwrap();
        let after = snap(&cache);
        assert_eq!(after.shared.hits, before.shared.hits + 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn other_session_shares_the_shared_tier() {
        let (cache, calls) = employees();
        cache.get(&1).await.unwrap();

        let other = cache.open_session();
        assert!(!other.session().contains(&1));
        assert_eq!(*other.get(&1).await.unwrap(), "Name1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(snap(&cache).shared.hits, 1);

        // Ending one unit of work leaves the other's session alone
        other.end_unit_of_work();
        assert!(cache.session().contains(&1));
    }

    #[tokio::test]
    async fn load_failures_leave_both_tiers_empty() {
        let (cache, calls) = employees();

        let err = cache.get(&0).await.unwrap_err();
        assert!(err.is_load_failure());
        assert!(matches!(
            cache.get(&101).await,
            Err(CacheError::NotFound { .. })
        ));
        assert!(!cache.session().contains(&0));
        assert!(!cache.shared().contains(&0));

        cache.get(&0).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(snap(&cache).shared.puts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_tiered_gets_share_one_load() {
        let (cache, calls) = employees();
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get(&9).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(*handle.await.unwrap().unwrap(), "Name9");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(snap(&cache).shared.fetches, 1);
    }

    #[tokio::test]
    async fn per_call_loader_fills_both_tiers() {
        let (cache, calls) = employees();
        let value = cache
            .get_with(&42, |id| async move { Ok(Some(format!("Custom{id}"))) })
            .await
            .unwrap();
        assert_eq!(*value, "Custom42");
        assert!(cache.session().contains(&42));
        assert!(cache.shared().contains(&42));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn statistics_can_be_switched_off() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let loader = loader_fn(move |id: i64| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, BoxError>(Some(id.to_string())) }
        });
        let config = CacheConfig {
            statistics_enabled: false,
            ..Default::default()
        };
        let cache: Employees = TieredCache::new(config, loader);

        cache.get(&1).await.unwrap();
        cache.get(&1).await.unwrap();
        assert_eq!(snap(&cache), StatsSnapshot::default());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
