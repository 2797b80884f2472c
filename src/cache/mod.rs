//! Write-back cache layer
//!
//! Each cache owns the authoritative in-memory copy of one entity set and
//! a dirty set; entities themselves stay plain data. The public surface is
//! session-based: `lock()` (or `lock_after(&held)` when another level is
//! already held) returns a session guard whose methods are the cache
//! operations. Holding the session is holding the cache's lock.
//!
//! Persistence is write-back: a background timer flushes dirty entries
//! every `persistence_interval_ms`. With `enable_auto_persistence = false`
//! (test mode) no timer runs and every mutation flushes synchronously, so
//! changes stay inside any enclosing test transaction. Battle end and
//! shutdown always flush synchronously.

use parking_lot::RwLock;

pub mod battle_cache;
pub mod message_cache;
pub mod user_cache;
pub mod world_cache;

pub use battle_cache::{BattleCache, BattleCacheSession};
pub use message_cache::{MessageCache, MessageCacheSession};
pub use user_cache::{UserCache, UserCacheSession};
pub use world_cache::{WorldCache, WorldCacheSession};

/// Hit/miss/flush counters kept by every cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from memory
    pub hits: u64,
    /// Reads that had to hydrate from the store
    pub misses: u64,
    /// Flush passes executed
    pub flushes: u64,
    /// Entities written back across all flushes
    pub flushed_entities: u64,
}

/// Interior-mutable stats cell shared by the cache implementations.
#[derive(Debug, Default)]
pub(crate) struct StatsCell {
    inner: RwLock<CacheStats>,
}

impl StatsCell {
    pub(crate) fn record_hit(&self) {
        self.inner.write().hits += 1;
    }

    pub(crate) fn record_miss(&self) {
        self.inner.write().misses += 1;
    }

    pub(crate) fn record_flush(&self, entities: u64) {
        let mut stats = self.inner.write();
        stats.flushes += 1;
        stats.flushed_entities += entities;
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        *self.inner.read()
    }
}
