//! Message cache
//!
//! Read-through cache of messages keyed by integer id. Reads go through the
//! tiered cache; writes go to the backend and then invalidate the cached
//! entry, so the next read loads the new message.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};
use tracing::debug;

use crate::{
    BoxError, CacheConfig, CacheError, CacheKey, CacheStatistics, KeyCodec, Loader, Params,
    TieredCache,
};

/// Key layout for messages: only `id` identifies a message
pub const MESSAGE_KEY: KeyCodec = KeyCodec::new("message", &["id"]);

/// System of record for messages
#[async_trait]
pub trait MessageBackend: Send + Sync + 'static {
    /// Fetch the message for the given id, or None if it doesn't exist.
    async fn fetch(&self, id: i64) -> Result<Option<String>, BoxError>;

    /// Store the message for the given id
    async fn store(&self, id: i64, message: String) -> Result<(), BoxError>;
}

/// Adapter from MessageBackend to the generic Loader trait.
struct MessageLoader<B: MessageBackend> {
    backend: Arc<B>,
}

#[async_trait]
impl<B: MessageBackend> Loader<CacheKey, String> for MessageLoader<B> {
    async fn load(&self, key: &CacheKey) -> Result<Option<String>, BoxError> {
        let id = key
            .field("id")
            .and_then(|v| v.as_int())
            .ok_or_else(|| format!("key {key} carries no integer id"))?;
        self.backend.fetch(id).await
    }
}

/// Tiered message cache over a [`MessageBackend`]
pub struct MessageCache<B: MessageBackend> {
    backend: Arc<B>,
    inner: TieredCache<CacheKey, String>,
}

impl<B: MessageBackend> Clone for MessageCache<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            inner: self.inner.clone(),
        }
    }
}

impl<B: MessageBackend> MessageCache<B> {
    pub fn new(backend: B, config: CacheConfig) -> Self {
        let backend = Arc::new(backend);
        let inner = TieredCache::new(
            config,
            MessageLoader {
                backend: Arc::clone(&backend),
            },
        );
        Self { backend, inner }
    }

    /// Get the message for the given id, using tiered caching.
    pub async fn get_message(&self, id: i64) -> Result<Arc<String>, CacheError> {
        let key = MESSAGE_KEY.derive(&Params::new().with("id", id))?;
        self.inner.get(&key).await
    }

    /// Store a message in the backend and invalidate its cached entry.
    ///
    /// The key is derived from the full call parameters; the message text is
    /// not part of it.
    pub async fn set_message(&self, id: i64, message: String) -> Result<(), CacheError> {
        let params = Params::new().with("id", id).with("message", message.as_str());
        // Fail on a bad key before touching the backend
        MESSAGE_KEY.derive(&params)?;

        self.backend
            .store(id, message)
            .await
            .map_err(CacheError::backend)?;
        self.invalidate(&params).await
    }

    /// Invalidate by partial key
    pub async fn invalidate(&self, params: &Params) -> Result<(), CacheError> {
        let key = MESSAGE_KEY.derive(params)?;
        debug!("Invalidating message cache for key: {}", key);
        self.inner.invalidate(&key).await;
        Ok(())
    }

    /// Another unit of work over the same shared tier
    pub fn open_session(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            inner: self.inner.open_session(),
        }
    }

    pub fn end_unit_of_work(&self) {
        self.inner.end_unit_of_work();
    }

    pub fn statistics(&self) -> &Arc<CacheStatistics> {
        self.inner.statistics()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

/// In-memory [`MessageBackend`] that counts fetches
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    messages: DashMap<i64, String>,
    fetches: AtomicU64,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of fetches served so far
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageBackend for InMemoryBackend {
    async fn fetch(&self, id: i64) -> Result<Option<String>, BoxError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        debug!("Getting message {} from system of record", id);
        Ok(self.messages.get(&id).map(|m| m.value().clone()))
    }

    async fn store(&self, id: i64, message: String) -> Result<(), BoxError> {
        self.messages.insert(id, message);
        Ok(())
    }
}
