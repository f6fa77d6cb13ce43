//! Two-tier cache orchestrator
//!
//! Reads go L1 → L2 and back-fill L1 on an L2 hit. Writes go to both tiers.
//! Shared-tier failures and timeouts are logged and treated as misses; they
//! never reach the caller.

use crate::key::{cache_key, namespace_prefix, CacheParams};
use crate::{
    CacheConfig, CacheError, CacheResult, CacheValue, InMemorySharedCache, LocalCache, LocalCacheStats,
    SharedCache,
};
use repgate_common::{percentage, AtomicCounter, SharedClock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-tier TTLs for a write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheTtl {
    pub l1: Duration,
    pub l2: Duration,
}

impl CacheTtl {
    pub const fn new(l1: Duration, l2: Duration) -> Self {
        Self { l1, l2 }
    }

    pub const fn secs(l1: u64, l2: u64) -> Self {
        Self::new(Duration::from_secs(l1), Duration::from_secs(l2))
    }
}

impl Default for CacheTtl {
    fn default() -> Self {
        Self::secs(100, 3600)
    }
}

/// Hit/miss counters per tier
#[derive(Debug, Default)]
pub struct CacheStats {
    total_requests: AtomicCounter,
    l1_hits: AtomicCounter,
    l1_misses: AtomicCounter,
    l2_hits: AtomicCounter,
    l2_misses: AtomicCounter,
    l2_errors: AtomicCounter,
}

/// Point-in-time view of [`CacheStats`]
#[derive(Clone, Debug, Serialize)]
pub struct CacheStatsSnapshot {
    pub total_requests: u64,
    pub l1_hits: u64,
    pub l1_misses: u64,
    pub l1_hit_rate: f64,
    pub l2_hits: u64,
    pub l2_misses: u64,
    pub l2_hit_rate: f64,
    pub l2_errors: u64,
    pub overall_hit_rate: f64,
    pub l1: LocalCacheStats,
}

/// L1 + L2 cache with deterministic key derivation
pub struct CacheOrchestrator {
    l1: LocalCache,
    l2: Arc<dyn SharedCache>,
    l2_timeout: Duration,
    max_key_length: usize,
    stats: CacheStats,
}

impl CacheOrchestrator {
    pub fn new(config: &CacheConfig, l2: Arc<dyn SharedCache>, clock: SharedClock) -> Self {
        Self {
            l1: LocalCache::new(config.l1_max_entries, config.l1_default_ttl(), clock),
            l2,
            l2_timeout: config.l2_timeout(),
            max_key_length: config.max_key_length,
            stats: CacheStats::default(),
        }
    }

    /// Orchestrator whose shared tier lives in process memory
    pub fn in_memory(config: &CacheConfig, clock: SharedClock) -> Self {
        let l2 = Arc::new(InMemorySharedCache::new(config.l2_default_ttl(), clock.clone()));
        Self::new(config, l2, clock)
    }

    /// Orchestrator for `config`: Redis when a URL is set and the feature is
    /// enabled, in-memory otherwise
    pub async fn from_config(config: &CacheConfig, clock: SharedClock) -> Self {
        #[cfg(feature = "redis")]
        if let Some(url) = &config.redis_url {
            match crate::RedisSharedCache::connect(url, config.l2_default_ttl()).await {
                Ok(redis) => return Self::new(config, Arc::new(redis), clock),
                Err(e) => warn!(error = %e, "redis unavailable, falling back to in-memory shared cache"),
            }
        }

        #[cfg(not(feature = "redis"))]
        if config.redis_url.is_some() {
            warn!("redis_url set but the redis feature is disabled; using in-memory shared cache");
        }

        Self::in_memory(config, clock)
    }

    /// Storage key for a lookup
    pub fn key(&self, namespace: &str, identifier: &str, params: &CacheParams) -> String {
        cache_key(namespace, identifier, params, self.max_key_length)
    }

    /// Look up a value, L1 first.
    ///
    /// An L2 hit is copied into L1 with L1's default TTL.
    pub async fn get(&self, namespace: &str, identifier: &str, params: &CacheParams) -> Option<CacheValue> {
        self.stats.total_requests.inc();
        let key = self.key(namespace, identifier, params);

        if let Some(value) = self.l1.get(&key) {
            self.stats.l1_hits.inc();
            debug!(key = %key, "cache hit (L1)");
            return Some(value);
        }
        self.stats.l1_misses.inc();

        match self.l2_call("get", &key, self.l2.get(&key)).await.flatten() {
            Some(value) => {
                self.stats.l2_hits.inc();
                debug!(key = %key, "cache hit (L2)");
                self.l1.set(&key, value.clone(), None);
                Some(value)
            }
            None => {
                self.stats.l2_misses.inc();
                debug!(key = %key, "cache miss");
                None
            }
        }
    }

    /// Write-through to both tiers
    pub async fn set(
        &self,
        namespace: &str,
        identifier: &str,
        value: CacheValue,
        ttl: CacheTtl,
        params: &CacheParams,
    ) {
        let key = self.key(namespace, identifier, params);
        self.l2_call("set", &key, self.l2.set(&key, &value, Some(ttl.l2))).await;
        self.l1.set(&key, value, Some(ttl.l1));
    }

    /// Remove one entry from both tiers
    pub async fn delete(&self, namespace: &str, identifier: &str, params: &CacheParams) {
        let key = self.key(namespace, identifier, params);
        self.l1.delete(&key);
        self.l2_call("delete", &key, self.l2.delete(&key)).await;
    }

    /// Invalidate everything cached under `namespace`.
    ///
    /// L1 cannot enumerate by namespace and is cleared entirely; L2 drops the
    /// `namespace:` key range, which includes nested namespaces such as
    /// `namespace:child`.
    pub async fn invalidate_namespace(&self, namespace: &str) {
        let prefix = namespace_prefix(namespace);
        self.l1.clear();
        if let Some(removed) = self.l2_call("delete_by_prefix", &prefix, self.l2.delete_by_prefix(&prefix)).await {
            debug!(namespace = %namespace, removed, "namespace invalidated");
        }
    }

    /// Memoize an expensive computation.
    ///
    /// Returns the cached value when present; otherwise runs `compute`, caches
    /// a successful result in both tiers and returns it. Errors from `compute`
    /// are passed through and nothing is cached.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        namespace: &str,
        identifier: &str,
        params: &CacheParams,
        ttl: CacheTtl,
        compute: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get(namespace, identifier, params).await {
            match serde_json::from_value::<T>(cached) {
                Ok(value) => return Ok(value),
                Err(e) => warn!(namespace = %namespace, error = %e, "cached value has unexpected shape, recomputing"),
            }
        }

        let value = compute().await?;
        match serde_json::to_value(&value) {
            Ok(encoded) => self.set(namespace, identifier, encoded, ttl, params).await,
            Err(e) => warn!(namespace = %namespace, error = %CacheError::from(e), "result not cacheable"),
        }
        Ok(value)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        let s = &self.stats;
        let total = s.total_requests.get();
        let l1_hits = s.l1_hits.get();
        let l2_hits = s.l2_hits.get();
        CacheStatsSnapshot {
            total_requests: total,
            l1_hits,
            l1_misses: s.l1_misses.get(),
            l1_hit_rate: percentage(l1_hits, total),
            l2_hits,
            l2_misses: s.l2_misses.get(),
            l2_hit_rate: percentage(l2_hits, total),
            l2_errors: s.l2_errors.get(),
            overall_hit_rate: percentage(l1_hits + l2_hits, total),
            l1: self.l1.stats(),
        }
    }

    /// The local tier, for inspection
    pub fn local(&self) -> &LocalCache {
        &self.l1
    }

    /// Run a shared-tier call under the configured timeout.
    ///
    /// `None` means the call failed or timed out.
    async fn l2_call<T>(
        &self,
        op: &'static str,
        key: &str,
        fut: impl Future<Output = CacheResult<T>>,
    ) -> Option<T> {
        let result = match tokio::time::timeout(self.l2_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout),
        };

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.stats.l2_errors.inc();
                warn!(op, key = %key, error = %e, "shared cache degraded, treating as miss");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use repgate_common::ManualClock;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    fn config(l1_max: usize) -> CacheConfig {
        CacheConfig {
            l1_max_entries: l1_max,
            ..Default::default()
        }
    }

    fn orchestrator(l1_max: usize) -> (CacheOrchestrator, Arc<ManualClock>) {
        let clock = ManualClock::at(10_000.0);
        (CacheOrchestrator::in_memory(&config(l1_max), clock.clone()), clock)
    }

    /// Shared tier that can be switched into failing or hanging
    struct FlakySharedCache {
        inner: InMemorySharedCache,
        failing: AtomicBool,
        hanging: AtomicBool,
    }

    impl FlakySharedCache {
        fn new(clock: SharedClock) -> Self {
            Self {
                inner: InMemorySharedCache::new(Duration::from_secs(3600), clock),
                failing: AtomicBool::new(false),
                hanging: AtomicBool::new(false),
            }
        }

        async fn gate(&self) -> CacheResult<()> {
            if self.hanging.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(CacheError::Unavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl SharedCache for FlakySharedCache {
        async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>> {
            self.gate().await?;
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> CacheResult<()> {
            self.gate().await?;
            self.inner.set(key, value, ttl).await
        }

        async fn delete(&self, key: &str) -> CacheResult<()> {
            self.gate().await?;
            self.inner.delete(key).await
        }

        async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64> {
            self.gate().await?;
            self.inner.delete_by_prefix(prefix).await
        }

        fn default_ttl(&self) -> Duration {
            self.inner.default_ttl()
        }
    }

    #[tokio::test]
    async fn test_round_trip_via_l1_then_l2() {
        let (cache, _) = orchestrator(2);
        let none = CacheParams::new();

        cache.set("entity_profile", "1", json!({"name": "Acme"}), CacheTtl::default(), &none).await;
        assert_eq!(cache.get("entity_profile", "1", &none).await, Some(json!({"name": "Acme"})));
        assert_eq!(cache.stats().l1_hits, 1);

        // push the key out of L1
        cache.local().set("other:a", json!(1), None);
        cache.local().set("other:b", json!(2), None);
        assert!(cache.local().peek("entity_profile:1").is_none());

        assert_eq!(cache.get("entity_profile", "1", &none).await, Some(json!({"name": "Acme"})));
        let stats = cache.stats();
        assert_eq!(stats.l2_hits, 1);
        assert_eq!(stats.l1_misses, 1);

        // back-filled with L1's default TTL
        let entry = cache.local().peek("entity_profile:1").unwrap();
        assert_eq!(entry.expires_at - entry.created_at, 100.0);
        assert_eq!(cache.get("entity_profile", "1", &none).await, Some(json!({"name": "Acme"})));
        assert_eq!(cache.stats().l1_hits, 2);
    }

    #[tokio::test]
    async fn test_param_order_resolves_same_entry() {
        let (cache, _) = orchestrator(16);
        let ab = CacheParams::from([("a", 1), ("b", 2)]);
        let ba = CacheParams::from([("b", 2), ("a", 1)]);

        cache.set("ns", "id", json!("v"), CacheTtl::default(), &ab).await;
        assert_eq!(cache.key("ns", "id", &ab), cache.key("ns", "id", &ba));
        assert_eq!(cache.get("ns", "id", &ba).await, Some(json!("v")));
    }

    #[tokio::test]
    async fn test_total_miss_counts_both_tiers() {
        let (cache, _) = orchestrator(16);
        assert_eq!(cache.get("ns", "missing", &CacheParams::new()).await, None);

        let stats = cache.stats();
        assert_eq!(stats.total_requests, 1);
        assert_eq!(stats.l1_misses, 1);
        assert_eq!(stats.l2_misses, 1);
        assert_eq!(stats.overall_hit_rate, 0.0);
    }

    #[tokio::test]
    async fn test_tier_ttls_differ() {
        let (cache, clock) = orchestrator(16);
        let none = CacheParams::new();
        cache.set("score", "9", json!(71.5), CacheTtl::secs(60, 600), &none).await;

        clock.advance_secs(61.0);
        assert!(cache.local().peek("score:9").is_some());
        assert_eq!(cache.get("score", "9", &none).await, Some(json!(71.5)));
        assert_eq!(cache.stats().l2_hits, 1);

        clock.advance_secs(600.0);
        assert_eq!(cache.get("score", "9", &none).await, None);
    }

    #[tokio::test]
    async fn test_invalidate_namespace() {
        let (cache, _) = orchestrator(16);
        let none = CacheParams::new();
        let p = CacheParams::new().with("range", "7d");

        cache.set("dashboard", "1", json!(1), CacheTtl::default(), &none).await;
        cache.set("dashboard", "2", json!(2), CacheTtl::default(), &p).await;
        cache.set("other", "1", json!(3), CacheTtl::default(), &none).await;

        cache.invalidate_namespace("dashboard").await;

        assert_eq!(cache.get("dashboard", "1", &none).await, None);
        assert_eq!(cache.get("dashboard", "2", &p).await, None);
        // L1 was flushed but the other namespace survives in L2
        assert!(cache.local().peek("other:1").is_none());
        assert_eq!(cache.get("other", "1", &none).await, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_invalidate_namespace_includes_nested() {
        let (cache, _) = orchestrator(16);
        let none = CacheParams::new();

        cache.set("reports", "1", json!(1), CacheTtl::default(), &none).await;
        cache.set("reports:daily", "1", json!(2), CacheTtl::default(), &none).await;
        cache.set("reportsx", "1", json!(3), CacheTtl::default(), &none).await;

        cache.invalidate_namespace("reports:daily").await;
        assert_eq!(cache.get("reports", "1", &none).await, Some(json!(1)));
        assert_eq!(cache.get("reports:daily", "1", &none).await, None);

        cache.set("reports:daily", "1", json!(2), CacheTtl::default(), &none).await;
        cache.invalidate_namespace("reports").await;
        assert_eq!(cache.get("reports", "1", &none).await, None);
        assert_eq!(cache.get("reports:daily", "1", &none).await, None);
        assert_eq!(cache.get("reportsx", "1", &none).await, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_delete_removes_from_both_tiers() {
        let (cache, _) = orchestrator(16);
        let none = CacheParams::new();
        cache.set("entity_profile", "5", json!(5), CacheTtl::default(), &none).await;

        cache.delete("entity_profile", "5", &none).await;
        assert_eq!(cache.get("entity_profile", "5", &none).await, None);
    }

    #[tokio::test]
    async fn test_l2_failure_degrades_to_miss() {
        let clock = ManualClock::at(0.0);
        let l2 = Arc::new(FlakySharedCache::new(clock.clone()));
        let cache = CacheOrchestrator::new(&config(16), l2.clone(), clock);
        let none = CacheParams::new();

        l2.failing.store(true, Ordering::SeqCst);
        cache.set("ns", "a", json!("local only"), CacheTtl::default(), &none).await;
        assert_eq!(cache.get("ns", "a", &none).await, Some(json!("local only")));

        cache.local().clear();
        assert_eq!(cache.get("ns", "a", &none).await, None);
        cache.invalidate_namespace("ns").await;

        let stats = cache.stats();
        assert_eq!(stats.l2_errors, 3);
        assert_eq!(stats.l2_misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_l2_timeout_degrades_to_miss() {
        let clock = ManualClock::at(0.0);
        let l2 = Arc::new(FlakySharedCache::new(clock.clone()));
        let cache = CacheOrchestrator::new(&config(16), l2.clone(), clock);

        l2.hanging.store(true, Ordering::SeqCst);
        assert_eq!(cache.get("ns", "slow", &CacheParams::new()).await, None);
        assert_eq!(cache.stats().l2_errors, 1);
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Score {
        entity_id: u64,
        value: f64,
    }

    #[tokio::test]
    async fn test_get_or_compute_memoizes() {
        let (cache, _) = orchestrator(16);
        let calls = AtomicU32::new(0);
        let params = CacheParams::new().with("entity_id", 3);

        for _ in 0..3 {
            let score: Result<Score, std::convert::Infallible> = cache
                .get_or_compute("reputation_score", "calculate", &params, CacheTtl::secs(60, 600), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Score { entity_id: 3, value: 88.5 })
                })
                .await;
            assert_eq!(score.unwrap(), Score { entity_id: 3, value: 88.5 });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().l1_hits, 2);
    }

    #[tokio::test]
    async fn test_get_or_compute_does_not_cache_errors() {
        let (cache, _) = orchestrator(16);
        let none = CacheParams::new();

        let first: Result<u32, &str> = cache
            .get_or_compute("flaky", "op", &none, CacheTtl::default(), || async { Err("backend down") })
            .await;
        assert_eq!(first, Err("backend down"));

        let second: Result<u32, &str> = cache
            .get_or_compute("flaky", "op", &none, CacheTtl::default(), || async { Ok(7) })
            .await;
        assert_eq!(second, Ok(7));
    }
}
