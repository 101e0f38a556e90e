//! TTL-bounded LRU cache for per-role grant sets.
//!
//! Reads follow a lookup → load → fill protocol. A miss hands out a
//! [`FillTicket`] stamped with the cache version; every invalidation bumps the
//! version, and [`GrantCache::fill`] drops values whose ticket predates it. A
//! load that raced a revoke therefore never reinstates the revoked grant.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

struct CacheEntry<V> {
    value: Arc<V>,
    expires_at: Instant,
}

struct Inner<V> {
    entries: LruCache<String, CacheEntry<V>>,
    version: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillTicket {
    key: String,
    version: u64,
}

pub enum Lookup<V> {
    Hit(Arc<V>),
    Miss(FillTicket),
}

pub struct GrantCache<V> {
    ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V> std::fmt::Debug for GrantCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("GrantCache")
            .field("ttl", &self.ttl)
            .field("entries", &inner.entries.len())
            .field("version", &inner.version)
            .finish()
    }
}

impl<V> GrantCache<V> {
    /// A zero `ttl` disables caching; every lookup misses.
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            ttl,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                version: 0,
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    pub fn lookup(&self, key: &str) -> Lookup<V> {
        let mut inner = self.inner.lock();
        if self.is_enabled() {
            let now = Instant::now();
            let cached = inner
                .entries
                .get(key)
                .map(|entry| (entry.expires_at > now, entry.value.clone()));
            match cached {
                Some((true, value)) => return Lookup::Hit(value),
                Some((false, _)) => {
                    inner.entries.pop(key);
                }
                None => {}
            }
        }
        Lookup::Miss(FillTicket {
            key: key.to_string(),
            version: inner.version,
        })
    }

    /// Store a freshly loaded value. Returns `false` when the value was
    /// discarded because an invalidation happened since the ticket was issued.
    pub fn fill(&self, ticket: FillTicket, value: Arc<V>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let mut inner = self.inner.lock();
        if inner.version != ticket.version {
            return false;
        }
        let expires_at = Instant::now() + self.ttl;
        inner
            .entries
            .put(ticket.key, CacheEntry { value, expires_at });
        true
    }

    pub fn invalidate(&self, key: &str) {
        let mut inner = self.inner.lock();
        inner.version += 1;
        inner.entries.pop(key);
        tracing::debug!(key = %key, "permission cache entry invalidated");
    }

    pub fn invalidate_all(&self) {
        let mut inner = self.inner.lock();
        inner.version += 1;
        inner.entries.clear();
        tracing::debug!("permission cache cleared");
    }
}
