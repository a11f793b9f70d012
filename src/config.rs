//! Cache configuration

use std::time::Duration;

/// Configuration for one cache tier
#[derive(Debug, Clone)]
pub struct TierConfig {
    /// Maximum number of entries, `None` for unbounded
    pub max_capacity: Option<u64>,
    /// Time-to-live for entries, `None` to keep them until invalidated or evicted
    pub time_to_live: Option<Duration>,
    /// How long a caller waits on an in-flight load before giving up
    pub wait_timeout: Option<Duration>,
}

impl TierConfig {
    /// Defaults for the session tier: small, no expiry.
    pub fn session() -> Self {
        Self {
            max_capacity: Some(1_000),
            time_to_live: None,
            wait_timeout: None,
        }
    }

    /// Defaults for the shared tier.
    pub fn shared() -> Self {
        Self {
            max_capacity: Some(10_000),
            time_to_live: Some(Duration::from_secs(900)), // 15 minutes
            wait_timeout: None,
        }
    }

    pub fn with_max_capacity(mut self, capacity: u64) -> Self {
        self.max_capacity = Some(capacity);
        self
    }

    pub fn with_time_to_live(mut self, ttl: Duration) -> Self {
        self.time_to_live = Some(ttl);
        self
    }

    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::shared()
    }
}

/// Configuration for the tiered cache
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Session (unit-of-work) tier
    pub session: TierConfig,
    /// Shared (cross unit-of-work) tier
    pub shared: TierConfig,
    /// Record hit/miss/put/fetch counters
    pub statistics_enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            session: TierConfig::session(),
            shared: TierConfig::shared(),
            statistics_enabled: true,
        }
    }
}
