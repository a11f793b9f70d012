//! flightcache - Self-populating two-tier caching library
//!
//! This library provides a read-through cache with two tiers:
//! - Session: in-memory, scoped to one unit of work (fastest)
//! - Shared: in-memory, shared across units of work
//! - Loader: pluggable system of record (database, HTTP, etc.)
//!
//! The cache supports:
//! - Single-flight loads: concurrent misses for one key trigger one load
//! - Invalidation by partial key, derived through a declared key layout
//! - Hit/miss/put/fetch statistics per tier
//! - Configurable capacity, TTL and wait timeouts
//! - Generic key and value types

mod config;
mod error;
mod key;
pub mod message_cache;
mod single_flight;
mod stats;
mod tiered;

pub use config::{CacheConfig, TierConfig};
pub use error::{BoxError, CacheError};
pub use key::{CacheKey, FieldValue, Key, KeyCodec, Params};
pub use message_cache::{InMemoryBackend, MessageBackend, MessageCache};
pub use single_flight::{Cacheable, FnLoader, Loader, SingleFlightCache, loader_fn};
pub use stats::{CacheStatistics, StatsSnapshot, Tier, TierSnapshot};
pub use tiered::TieredCache;

// Re-export async_trait for convenience
pub use async_trait::async_trait;
