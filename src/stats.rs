//! Per-tier cache statistics
//!
//! Counters are plain atomics with relaxed ordering: a snapshot is
//! best-effort consistent across counters and never blocks cache operations.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Cache tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Scoped to one unit of work
    Session,
    /// Lives across units of work
    Shared,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Session => f.write_str("session"),
            Tier::Shared => f.write_str("shared"),
        }
    }
}

/// Monotonic counters for one tier
#[derive(Debug, Default)]
pub struct TierCounters {
    fetches: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
}

impl TierCounters {
    fn snapshot(&self) -> TierSnapshot {
        TierSnapshot {
            fetches: self.fetches.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.fetches.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.puts.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of one tier's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TierSnapshot {
    /// Loads from the system of record
    pub fetches: u64,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
}

impl TierSnapshot {
    /// Hit ratio (0.0–1.0). Returns 0.0 if no lookups yet.
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub session: TierSnapshot,
    pub shared: TierSnapshot,
}

impl StatsSnapshot {
    pub fn tier(&self, tier: Tier) -> &TierSnapshot {
        match tier {
            Tier::Session => &self.session,
            Tier::Shared => &self.shared,
        }
    }

    pub fn total_fetches(&self) -> u64 {
        self.session.fetches + self.shared.fetches
    }
}

/// Statistics for a session tier and a shared tier
///
/// Only the cache tiers write to these counters; everyone else reads
/// through [`CacheStatistics::snapshot`].
#[derive(Debug)]
pub struct CacheStatistics {
    enabled: AtomicBool,
    session: TierCounters,
    shared: TierCounters,
}

impl Default for CacheStatistics {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CacheStatistics {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            session: TierCounters::default(),
            shared: TierCounters::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turn recording on or off. Counters keep their values either way.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            session: self.session.snapshot(),
            shared: self.shared.snapshot(),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        self.session.reset();
        self.shared.reset();
    }

    fn counters(&self, tier: Tier) -> Option<&TierCounters> {
        if !self.is_enabled() {
            return None;
        }
        Some(match tier {
            Tier::Session => &self.session,
            Tier::Shared => &self.shared,
        })
    }

    pub(crate) fn record_hit(&self, tier: Tier) {
        if let Some(c) = self.counters(tier) {
            c.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_miss(&self, tier: Tier) {
        if let Some(c) = self.counters(tier) {
            c.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_put(&self, tier: Tier) {
        if let Some(c) = self.counters(tier) {
            c.puts.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn record_fetch(&self, tier: Tier) {
        if let Some(c) = self.counters(tier) {
            c.fetches.fetch_add(1, Ordering::Relaxed);
        }
    }
}
