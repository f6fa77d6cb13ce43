//! Cache key derivation
//!
//! Keys have the shape `namespace:identifier:k1=v1_k2=v2`. Parameters are kept
//! sorted by name so the derived key does not depend on call-site ordering.
//! Every key starts with `namespace:`, which is what namespace invalidation
//! relies on in the shared tier.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Derived keys longer than this are replaced by `namespace:<sha256>`
pub const DEFAULT_MAX_KEY_LENGTH: usize = 200;

/// Named parameters that qualify a cache entry
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheParams(BTreeMap<String, String>);

impl CacheParams {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Add a parameter, replacing any previous value under the same name
    pub fn with(mut self, name: impl Into<String>, value: impl fmt::Display) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl fmt::Display) {
        self.0.insert(name.into(), value.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `k1=v1_k2=v2` in name order
    fn encode(&self) -> String {
        self.0
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("_")
    }
}

impl<K: Into<String>, V: fmt::Display> FromIterator<(K, V)> for CacheParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (k, v) in iter {
            params.insert(k, v);
        }
        params
    }
}

impl<K: Into<String>, V: fmt::Display, const N: usize> From<[(K, V); N]> for CacheParams {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

/// Derive the storage key for `namespace` / `identifier` / `params`.
///
/// Empty identifier and parameter parts are skipped. When the result is longer
/// than `max_len` it is replaced by the namespace followed by the hex SHA-256
/// of the full key.
pub fn cache_key(namespace: &str, identifier: &str, params: &CacheParams, max_len: usize) -> String {
    let encoded = params.encode();
    let rest: Vec<&str> = [identifier, encoded.as_str()]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect();

    let key = format!("{}:{}", namespace, rest.join(":"));
    if key.len() <= max_len {
        return key;
    }

    let digest = Sha256::digest(key.as_bytes());
    format!("{}:{}", namespace, hex::encode(digest))
}

/// Prefix shared by every key in `namespace`.
///
/// Namespaces nest on `:`, so the prefix of `reports` also covers every key
/// of `reports:daily`. A namespace that merely starts with the same letters,
/// such as `reportsx`, is not covered.
pub fn namespace_prefix(namespace: &str) -> String {
    format!("{}:", namespace)
}
