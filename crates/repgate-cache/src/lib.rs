//! repgate cache - two-tier response cache
//!
//! Provides:
//! - [`LocalCache`]: bounded in-process L1 with per-entry TTL and strict LRU eviction
//! - [`SharedCache`]: pluggable L2 reachable by every gateway instance
//! - [`CacheOrchestrator`]: read-through / write-through composition of both tiers
//!
//! # Architecture
//!
//! ```text
//!             get(ns, id, params)
//!                     │
//!              ┌──────▼──────┐   hit
//!              │  L1 (local) ├────────► value
//!              └──────┬──────┘
//!                miss │
//!              ┌──────▼──────┐   hit    back-fill L1
//!              │ L2 (shared) ├────────► value
//!              └──────┬──────┘
//!        miss/timeout │
//!                     ▼
//!                   None
//! ```
//!
//! L1 absorbs most reads but can only be flushed as a whole. L2 holds entries
//! for longer and supports prefix invalidation per namespace.

use repgate_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod key;
pub mod local;
pub mod orchestrator;
pub mod shared;

#[cfg(feature = "redis")]
pub mod redis_backend;

pub use key::{cache_key, CacheParams, DEFAULT_MAX_KEY_LENGTH};
pub use local::{CacheEntry, LocalCache, LocalCacheStats};
pub use orchestrator::{CacheOrchestrator, CacheStats, CacheStatsSnapshot, CacheTtl};
pub use shared::{InMemorySharedCache, SharedCache};

#[cfg(feature = "redis")]
pub use redis_backend::RedisSharedCache;

/// Value stored in every cache tier
pub type CacheValue = serde_json::Value;

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache tier failures
///
/// These never cross the orchestrator boundary; a failed shared-tier call is
/// treated as a miss.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("shared cache unavailable: {0}")]
    Unavailable(String),

    #[error("shared cache operation timed out")]
    Timeout,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Cache sizing and TTL settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of entries held in L1
    pub l1_max_entries: usize,
    /// Default L1 TTL, also used when back-filling from L2
    pub l1_default_ttl_secs: u64,
    /// Default L2 TTL
    pub l2_default_ttl_secs: u64,
    /// Upper bound on any single L2 call
    pub l2_timeout_ms: u64,
    /// Derived keys longer than this are replaced by a hash
    pub max_key_length: usize,
    /// Redis URL for the shared tier (in-memory when unset)
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1_max_entries: 10_000,
            l1_default_ttl_secs: 100,
            l2_default_ttl_secs: 3600,
            l2_timeout_ms: 250,
            max_key_length: DEFAULT_MAX_KEY_LENGTH,
            redis_url: None,
        }
    }
}

impl CacheConfig {
    pub fn l1_default_ttl(&self) -> Duration {
        Duration::from_secs(self.l1_default_ttl_secs)
    }

    pub fn l2_default_ttl(&self) -> Duration {
        Duration::from_secs(self.l2_default_ttl_secs)
    }

    pub fn l2_timeout(&self) -> Duration {
        Duration::from_millis(self.l2_timeout_ms)
    }

    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> ConfigResult<()> {
        if self.l1_max_entries == 0 {
            return Err(ConfigError::InvalidCache("l1_max_entries must be positive".into()));
        }
        if self.l1_default_ttl_secs == 0 || self.l2_default_ttl_secs == 0 {
            return Err(ConfigError::InvalidCache("default TTLs must be positive".into()));
        }
        if self.l2_timeout_ms == 0 {
            return Err(ConfigError::InvalidCache("l2_timeout_ms must be positive".into()));
        }
        if self.max_key_length == 0 {
            return Err(ConfigError::InvalidCache("max_key_length must be positive".into()));
        }
        if self.l1_default_ttl_secs > self.l2_default_ttl_secs {
            tracing::warn!(
                l1_ttl = self.l1_default_ttl_secs,
                l2_ttl = self.l2_default_ttl_secs,
                "L1 default TTL exceeds L2 default TTL"
            );
        }
        Ok(())
    }
}
