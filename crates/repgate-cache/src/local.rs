//! L1 in-process cache
//!
//! Bounded map with per-entry TTL and strict LRU eviction by last access.
//! Recency is tracked in an ordered index keyed by a monotonically increasing
//! access tick, so eviction is O(log n) instead of a scan for the oldest entry.

use crate::CacheValue;
use parking_lot::Mutex;
use repgate_common::{AtomicCounter, SharedClock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// A cached value with its lifetime bounds (seconds since the epoch)
#[derive(Clone, Debug, PartialEq)]
pub struct CacheEntry {
    pub value: CacheValue,
    pub expires_at: f64,
    pub created_at: f64,
}

impl CacheEntry {
    pub fn new(value: CacheValue, now: f64, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: now + ttl.as_secs_f64(),
            created_at: now,
        }
    }

    /// Visible iff `now < expires_at`
    #[inline]
    pub fn is_live(&self, now: f64) -> bool {
        now < self.expires_at
    }
}

struct Slot {
    entry: CacheEntry,
    tick: u64,
    last_access: f64,
}

#[derive(Default)]
struct LruState {
    entries: HashMap<String, Slot>,
    // access tick -> key, oldest first
    recency: BTreeMap<u64, String>,
    next_tick: u64,
}

impl LruState {
    fn touch(&mut self, key: &str, now: f64) {
        let tick = self.next_tick;
        if let Some(slot) = self.entries.get_mut(key) {
            self.recency.remove(&slot.tick);
            slot.tick = tick;
            slot.last_access = now;
            self.recency.insert(tick, key.to_string());
            self.next_tick += 1;
        }
    }

    fn remove(&mut self, key: &str) -> Option<Slot> {
        let slot = self.entries.remove(key)?;
        self.recency.remove(&slot.tick);
        Some(slot)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Bounded local cache with LRU eviction
pub struct LocalCache {
    state: Mutex<LruState>,
    max_entries: usize,
    default_ttl: Duration,
    clock: SharedClock,
    evictions: AtomicCounter,
    expirations: AtomicCounter,
}

/// L1 occupancy snapshot
#[derive(Clone, Debug, Serialize)]
pub struct LocalCacheStats {
    pub size: usize,
    pub max_size: usize,
    /// Percent of capacity in use
    pub utilization: f64,
    pub default_ttl_secs: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl LocalCache {
    /// Create cache holding at most `max_entries` (at least one)
    pub fn new(max_entries: usize, default_ttl: Duration, clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(LruState::default()),
            max_entries: max_entries.max(1),
            default_ttl,
            clock,
            evictions: AtomicCounter::new(0),
            expirations: AtomicCounter::new(0),
        }
    }

    /// Get a live value, refreshing its recency.
    ///
    /// An expired entry is removed on the spot and reported as a miss.
    pub fn get(&self, key: &str) -> Option<CacheValue> {
        let now = self.clock.now();
        let mut state = self.state.lock();

        let live = state.entries.get(key)?.entry.is_live(now);
        if !live {
            state.remove(key);
            self.expirations.inc();
            return None;
        }

        state.touch(key, now);
        state.entries.get(key).map(|slot| slot.entry.value.clone())
    }

    /// Insert or replace a value.
    ///
    /// A new key arriving at capacity first evicts the least recently accessed
    /// entry. `ttl` falls back to the cache default.
    pub fn set(&self, key: &str, value: CacheValue, ttl: Option<Duration>) {
        let now = self.clock.now();
        let entry = CacheEntry::new(value, now, ttl.unwrap_or(self.default_ttl));
        let mut state = self.state.lock();

        if let Some(slot) = state.entries.get_mut(key) {
            slot.entry = entry;
            state.touch(key, now);
            return;
        }

        if state.entries.len() >= self.max_entries {
            if let Some(evicted) = state.evict_lru() {
                self.evictions.inc();
                tracing::trace!(key = %evicted, "L1 evicted least recently used entry");
            }
        }

        let tick = state.next_tick;
        state.next_tick += 1;
        state.recency.insert(tick, key.to_string());
        state.entries.insert(
            key.to_string(),
            Slot {
                entry,
                tick,
                last_access: now,
            },
        );
    }

    /// Remove a key; returns whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.recency.clear();
    }

    /// Entry including expiry metadata, without touching recency
    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.state.lock().entries.get(key).map(|slot| slot.entry.clone())
    }

    /// Last access time of a key (seconds since the epoch)
    pub fn last_access(&self, key: &str) -> Option<f64> {
        self.state.lock().entries.get(key).map(|slot| slot.last_access)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.max_entries
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn stats(&self) -> LocalCacheStats {
        let size = self.len();
        LocalCacheStats {
            size,
            max_size: self.max_entries,
            utilization: repgate_common::percentage(size as u64, self.max_entries as u64),
            default_ttl_secs: self.default_ttl.as_secs(),
            evictions: self.evictions.get(),
            expirations: self.expirations.get(),
        }
    }
}
