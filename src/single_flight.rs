//! Self-populating cache with single-flight loads
//!
//! A key is in one of three states:
//! - EMPTY: not in the store and no load in flight
//! - LOADING: a load is registered in the in-flight map
//! - PRESENT: the value is in the moka store
//!
//! Concurrent `get`s for the same missing key collapse into one load; every
//! caller receives that load's value or its failure. Loads run on their own
//! task, so a caller that is cancelled or times out only abandons its wait.
//!
//! `invalidate` and `put` never wait for loads. An invalidation that races
//! an in-flight load does not cancel it: when the load completes it stores
//! its value as PRESENT, which may re-materialize a value the invalidation
//! meant to drop. Callers needing a stronger guarantee must version their
//! values.

use async_trait::async_trait;
use dashmap::{DashMap, mapref::entry::Entry};
use moka::future::Cache;
use std::{future::Future, sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::{BoxError, CacheError, CacheStatistics, Key, Tier, TierConfig};

/// Trait for types that can be cached
pub trait Cacheable: Send + Sync + 'static {}
impl<T> Cacheable for T where T: Send + Sync + 'static {}

/// Fetches the authoritative value for a key from the system of record.
///
/// `Ok(None)` means the key does not exist; like an error it is not cached.
#[async_trait]
pub trait Loader<K, V>: Send + Sync {
    async fn load(&self, key: &K) -> Result<Option<V>, BoxError>;
}

/// [`Loader`] backed by an async closure, see [`loader_fn`]
pub struct FnLoader<F>(F);

/// Wrap an async closure taking the key by value as a [`Loader`].
pub fn loader_fn<F>(f: F) -> FnLoader<F> {
    FnLoader(f)
}

#[async_trait]
impl<K, V, F, Fut> Loader<K, V> for FnLoader<F>
where
    K: Key,
    V: Cacheable,
    F: Fn(K) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Option<V>, BoxError>> + Send + 'static,
{
    async fn load(&self, key: &K) -> Result<Option<V>, BoxError> {
        (self.0)(key.clone()).await
    }
}

type LoadResult<V> = Option<Result<Arc<V>, CacheError>>;
/// Represents an in-flight load that other callers can wait on
type InFlightLoad<V> = watch::Receiver<LoadResult<V>>;
type InFlightSender<V> = watch::Sender<LoadResult<V>>;

enum Slot<V> {
    Present(Arc<V>),
    Join(InFlightLoad<V>),
    Lead(InFlightSender<V>, InFlightLoad<V>),
}

/// Guard that ensures in-flight entries are cleaned up even on panic/abort.
///
/// The key is removed from the in-flight map before waiters are notified, so
/// a woken caller that retries never joins the finished load. When dropped
/// without a result, waiters receive `Cancelled`.
struct InFlightGuard<K: Key, V: Cacheable> {
    key: K,
    inner: Arc<SingleFlightInner<K, V>>,
    tx: Option<InFlightSender<V>>,
}

impl<K: Key, V: Cacheable> InFlightGuard<K, V> {
    fn new(key: K, inner: Arc<SingleFlightInner<K, V>>, tx: InFlightSender<V>) -> Self {
        Self {
            key,
            inner,
            tx: Some(tx),
        }
    }

    /// Complete the load with a result, consuming the guard.
    fn complete(mut self, result: Result<Arc<V>, CacheError>) {
        self.finish(result);
    }

    fn finish(&mut self, result: Result<Arc<V>, CacheError>) {
        if let Some(tx) = self.tx.take() {
            // Back to EMPTY unless the value was stored
            self.inner.in_flight.remove(&self.key);
            let _ = tx.send(Some(result));
        }
    }
}

impl<K: Key, V: Cacheable> Drop for InFlightGuard<K, V> {
    fn drop(&mut self) {
        if self.tx.is_some() {
            warn!(
                "Load for {} key {} was cancelled or panicked",
                self.inner.tier, self.key
            );
            let key = self.key.to_string();
            self.finish(Err(CacheError::Cancelled { key }));
        }
    }
}

struct SingleFlightInner<K, V>
where
    K: Key,
    V: Cacheable,
{
    tier: Tier,
    store: Cache<K, Arc<V>>,
    in_flight: DashMap<K, InFlightLoad<V>>,
    loader: Option<Arc<dyn Loader<K, V>>>,
    stats: Arc<CacheStatistics>,
    wait_timeout: Option<Duration>,
}

/// Self-populating cache for one tier
pub struct SingleFlightCache<K, V>
where
    K: Key,
    V: Cacheable,
{
    inner: Arc<SingleFlightInner<K, V>>,
}

impl<K, V> Clone for SingleFlightCache<K, V>
where
    K: Key,
    V: Cacheable,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> SingleFlightCache<K, V>
where
    K: Key,
    V: Cacheable,
{
    /// Create a cache without a bound loader; use [`Self::get_with`] to load.
    pub fn new(tier: Tier, config: &TierConfig, stats: Arc<CacheStatistics>) -> Self {
        Self::build(tier, config, stats, None)
    }

    /// Create a cache whose [`Self::get`] loads through `loader`.
    pub fn with_loader<L>(
        tier: Tier,
        config: &TierConfig,
        stats: Arc<CacheStatistics>,
        loader: L,
    ) -> Self
    where
        L: Loader<K, V> + 'static,
    {
        let loader: Arc<dyn Loader<K, V>> = Arc::new(loader);
        Self::build(tier, config, stats, Some(loader))
    }

    fn build(
        tier: Tier,
        config: &TierConfig,
        stats: Arc<CacheStatistics>,
        loader: Option<Arc<dyn Loader<K, V>>>,
    ) -> Self {
        let mut builder = Cache::builder();
        if let Some(capacity) = config.max_capacity {
            builder = builder.max_capacity(capacity);
        }
        if let Some(ttl) = config.time_to_live {
            builder = builder.time_to_live(ttl);
        }

        Self {
            inner: Arc::new(SingleFlightInner {
                tier,
                store: builder.build(),
                in_flight: DashMap::new(),
                loader,
                stats,
                wait_timeout: config.wait_timeout,
            }),
        }
    }

    pub fn tier(&self) -> Tier {
        self.inner.tier
    }

    pub fn statistics(&self) -> &Arc<CacheStatistics> {
        &self.inner.stats
    }

    /// Get value by key, loading it through the bound loader on a miss
    pub async fn get(&self, key: &K) -> Result<Arc<V>, CacheError> {
        let loader = self.inner.loader.clone().ok_or(CacheError::NoLoader)?;
        self.get_with(key, move |k| async move { loader.load(&k).await })
            .await
    }

    /// Get value by key, loading it with `load` on a miss.
    ///
    /// `load` is only invoked if this call ends up starting the load.
    pub async fn get_with<F, Fut>(&self, key: &K, load: F) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>, BoxError>> + Send + 'static,
    {
        let tier = self.inner.tier;

        match self.slot(key).await {
            Slot::Present(value) => {
                debug!("Cache hit {} for key: {}", tier, key);
                self.inner.stats.record_hit(tier);
                Ok(value)
            }
            Slot::Join(rx) => {
                debug!("Cache miss {} for key: {} (joining in-flight load)", tier, key);
                self.inner.stats.record_miss(tier);
                self.wait(key, rx).await
            }
            Slot::Lead(tx, rx) => {
                debug!("Cache miss {} for key: {}", tier, key);
                self.inner.stats.record_miss(tier);
                self.spawn_load(key.clone(), tx, load);
                self.wait(key, rx).await
            }
        }
    }

    /// Resolve the key's state, registering a new in-flight load if EMPTY.
    async fn slot(&self, key: &K) -> Slot<V> {
        loop {
            if let Some(value) = self.inner.store.get(key).await {
                return Slot::Present(value);
            }

            match self.inner.in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => return Slot::Join(entry.get().clone()),
                Entry::Vacant(entry) => {
                    // A load may have stored its value and deregistered
                    // between the store lookup and taking the shard lock.
                    if self.inner.store.contains_key(key) {
                        continue;
                    }
                    let (tx, rx) = watch::channel(None);
                    entry.insert(rx.clone());
                    return Slot::Lead(tx, rx);
                }
            }
        }
    }

    fn spawn_load<F, Fut>(&self, key: K, tx: InFlightSender<V>, load: F)
    where
        F: FnOnce(K) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Option<V>, BoxError>> + Send + 'static,
    {
        let tier = self.inner.tier;
        let inner = Arc::clone(&self.inner);
        inner.stats.record_fetch(tier);

        // Created outside the task so an unpolled task still cleans up when dropped
        let guard = InFlightGuard::new(key.clone(), Arc::clone(&inner), tx);

        tokio::spawn(async move {
            // The loader runs under the guard, including building its future
            let result = match load(key.clone()).await {
                Ok(Some(value)) => {
                    debug!("Loaded {} key from system of record: {}", tier, key);
                    let value = Arc::new(value);
                    // Store before deregistering so no new load can start in between
                    inner.store.insert(key.clone(), Arc::clone(&value)).await;
                    inner.stats.record_put(tier);
                    Ok(value)
                }
                Ok(None) => {
                    debug!("Value not found for key: {}", key);
                    Err(CacheError::NotFound {
                        key: key.to_string(),
                    })
                }
                Err(e) => {
                    error!("Load error for key {}: {}", key, e);
                    Err(CacheError::load(&key, e))
                }
            };

            guard.complete(result);
        });
    }

    async fn wait(&self, key: &K, mut rx: InFlightLoad<V>) -> Result<Arc<V>, CacheError> {
        let waiting = async {
            loop {
                if let Some(result) = rx.borrow().as_ref() {
                    return result.clone();
                }
                if rx.changed().await.is_err() {
                    // Sender dropped without sending
                    return Err(CacheError::Cancelled {
                        key: key.to_string(),
                    });
                }
            }
        };

        let Some(timeout) = self.inner.wait_timeout else {
            return waiting.await;
        };
        match tokio::time::timeout(timeout, waiting).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Gave up waiting {:?} for in-flight load of {} key {}",
                    timeout, self.inner.tier, key
                );
                Err(CacheError::Timeout {
                    key: key.to_string(),
                    waited: timeout,
                })
            }
        }
    }

    /// Look up a PRESENT value without loading. Counts as a hit or a miss.
    pub async fn peek(&self, key: &K) -> Option<Arc<V>> {
        let tier = self.inner.tier;
        match self.inner.store.get(key).await {
            Some(value) => {
                debug!("Cache hit {} for key: {}", tier, key);
                self.inner.stats.record_hit(tier);
                Some(value)
            }
            None => {
                debug!("Cache miss {} for key: {}", tier, key);
                self.inner.stats.record_miss(tier);
                None
            }
        }
    }

    /// Store a value known to be authoritative, bypassing the loader
    pub async fn put(&self, key: K, value: V) {
        self.put_arc(key, Arc::new(value)).await;
    }

    pub(crate) async fn put_arc(&self, key: K, value: Arc<V>) {
        debug!("Cache put {} for key: {}", self.inner.tier, key);
        self.inner.store.insert(key, value).await;
        self.inner.stats.record_put(self.inner.tier);
    }

    /// Invalidate the key. A no-op if nothing is cached; an in-flight load
    /// for the key is not cancelled.
    pub async fn invalidate(&self, key: &K) {
        debug!("Invalidating {} cache for key: {}", self.inner.tier, key);
        self.inner.store.invalidate(key).await;
    }

    /// Drop every PRESENT entry. In-flight loads are not cancelled.
    pub fn invalidate_all(&self) {
        debug!("Invalidating all {} cache entries", self.inner.tier);
        self.inner.store.invalidate_all();
    }

    /// Whether a value is PRESENT, without touching statistics
    pub fn contains(&self, key: &K) -> bool {
        self.inner.store.contains_key(key)
    }

    /// Whether a load for the key is in flight
    pub fn is_loading(&self, key: &K) -> bool {
        self.inner.in_flight.contains_key(key)
    }

    /// Number of PRESENT entries, after applying pending evictions
    pub async fn entry_count(&self) -> u64 {
        self.inner.store.run_pending_tasks().await;
        self.inner.store.entry_count()
    }
}
