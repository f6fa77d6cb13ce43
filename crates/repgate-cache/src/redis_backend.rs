//! Redis-backed shared tier
//!
//! Values are stored as JSON strings with `SETEX`. Prefix deletion walks the
//! keyspace with `SCAN MATCH` rather than `KEYS` so large keyspaces do not
//! block the server.

use crate::{CacheError, CacheResult, CacheValue, SharedCache};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;

const SCAN_BATCH: usize = 500;

/// Shared tier on a Redis server
#[derive(Clone)]
pub struct RedisSharedCache {
    conn: ConnectionManager,
    default_ttl: Duration,
}

impl RedisSharedCache {
    /// Connect to `url` (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str, default_ttl: Duration) -> CacheResult<Self> {
        let client = redis::Client::open(url).map_err(unavailable)?;
        let conn = client.get_connection_manager().await.map_err(unavailable)?;
        tracing::info!(url = %url, "connected shared cache to redis");
        Ok(Self { conn, default_ttl })
    }
}

fn unavailable(err: redis::RedisError) -> CacheError {
    CacheError::Unavailable(err.to_string())
}

/// Escape glob metacharacters so the prefix matches literally
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('*');
    out
}

#[async_trait]
impl SharedCache for RedisSharedCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheValue>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key).await.map_err(unavailable)?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(value)?;
        let secs = ttl.unwrap_or(self.default_ttl).as_secs().max(1);
        conn.set_ex::<_, _, ()>(key, payload, secs)
            .await
            .map_err(unavailable)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await.map_err(unavailable)
    }

    async fn delete_by_prefix(&self, prefix: &str) -> CacheResult<u64> {
        let mut conn = self.conn.clone();
        let pattern = glob_escape(prefix);
        let mut cursor: u64 = 0;
        let mut removed = 0u64;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            if !keys.is_empty() {
                let n: u64 = conn.del(keys).await.map_err(unavailable)?;
                removed += n;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_escape() {
        assert_eq!(glob_escape("entity:"), "entity:*");
        assert_eq!(glob_escape("a*b?[c]:"), "a\\*b\\?\\[c\\]:*");
    }
}
