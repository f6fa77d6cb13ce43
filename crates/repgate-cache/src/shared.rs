//! L2 shared cache
//!
//! The shared tier is reachable by every gateway instance. It is modelled as a
//! trait so a networked store can be substituted without touching the
//! orchestrator; [`InMemorySharedCache`] serves single-process deployments and
//! tests.

use crate::{CacheEntry, CacheResult, CacheValue};
use async_trait::async_trait;
use dashmap::DashMap;
use repgate_common::SharedClock;
use std::time::Duration;

/// Shared cache tier
#[async_trait]
pub trait SharedCache: Send + Sync {
    /// Get a live value
    async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>>;

    /// Store a value; `None` uses [`SharedCache::default_ttl`]
    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> CacheResult<()>;

    /// Remove a key
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Remove every key starting with `prefix`; returns how many were removed
    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64>;

    /// TTL applied when the caller gives none
    fn default_ttl(&self) -> Duration;
}

/// Shared tier kept in process memory
pub struct InMemorySharedCache {
    entries: DashMap<String, CacheEntry>,
    default_ttl: Duration,
    clock: SharedClock,
}

impl InMemorySharedCache {
    pub fn new(default_ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            default_ttl,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SharedCache for InMemorySharedCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>> {
        let now = self.clock.now();
        // lazy expiry; the read guard must be gone before removing
        match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
            Some(_) => {}
        }
        self.entries.remove_if(key, |_, entry| !entry.is_live(now));
        Ok(None)
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> CacheResult<()> {
        let entry = CacheEntry::new(value.clone(), self.clock.now(), ttl.unwrap_or(self.default_ttl));
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !key.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}
