//! API key issuance and validation
//!
//! Keys are opaque bearer tokens bound to an owner and a [`Tier`]. Records are
//! kept for audit after revocation; a revoked key validates exactly like an
//! unknown one. Timestamps come from the registry's [`SharedClock`].

use crate::tier::Tier;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use repgate_common::{AtomicCounter, SharedClock};
use serde::Serialize;

const TEST_PREFIX: &str = "sk_test_";
const LIVE_PREFIX: &str = "sk_live_";
const TOKEN_BYTES: usize = 32;
/// base64url without padding of [`TOKEN_BYTES`]
const ENCODED_LEN: usize = 43;

/// Stored state of an issued key
#[derive(Clone, Debug, Serialize)]
pub struct CredentialRecord {
    pub owner_id: String,
    pub tier: Tier,
    pub label: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub usage_count: u64,
    /// Issue order within the registry
    #[serde(skip)]
    seq: u64,
}

impl CredentialRecord {
    /// Key under which the owner is rate limited
    pub fn caller_id(&self) -> String {
        format!("user_{}", self.owner_id)
    }
}

/// Registry of issued API keys
pub struct CredentialRegistry {
    keys: DashMap<String, CredentialRecord>,
    clock: SharedClock,
    issued: AtomicCounter,
}

impl CredentialRegistry {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            keys: DashMap::new(),
            clock,
            issued: AtomicCounter::default(),
        }
    }

    fn timestamp(&self) -> DateTime<Utc> {
        let millis = (self.clock.now() * 1000.0) as i64;
        Utc.timestamp_millis_opt(millis).single().unwrap_or_else(Utc::now)
    }

    /// Issue a new key for `owner_id`
    pub fn issue(&self, owner_id: &str, tier: Tier, label: Option<&str>) -> String {
        let token = generate_token(tier);
        let record = CredentialRecord {
            owner_id: owner_id.to_string(),
            tier,
            label: label.map(str::to_string),
            active: true,
            created_at: self.timestamp(),
            last_used_at: None,
            usage_count: 0,
            seq: self.issued.inc(),
        };
        self.keys.insert(token.clone(), record);

        tracing::info!(owner = %owner_id, tier = %tier, label = ?label, "issued api key");
        token
    }

    /// Look up an active key and record its use
    pub fn validate(&self, token: &str) -> Option<CredentialRecord> {
        let mut record = self.keys.get_mut(token)?;
        if !record.active {
            return None;
        }
        record.last_used_at = Some(self.timestamp());
        record.usage_count += 1;
        Some(record.clone())
    }

    /// Deactivate a key. Returns whether the key was ever issued.
    pub fn revoke(&self, token: &str) -> bool {
        match self.keys.get_mut(token) {
            Some(mut record) => {
                if record.active {
                    record.active = false;
                    tracing::info!(owner = %record.owner_id, "revoked api key");
                }
                true
            }
            None => false,
        }
    }

    /// Record for a key, active or not, without touching usage
    pub fn get(&self, token: &str) -> Option<CredentialRecord> {
        self.keys.get(token).map(|r| r.clone())
    }

    /// All keys issued to `owner_id`, oldest first
    pub fn list_for_owner(&self, owner_id: &str) -> Vec<(String, CredentialRecord)> {
        let mut keys: Vec<_> = self
            .keys
            .iter()
            .filter(|entry| entry.owner_id == owner_id)
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        keys.sort_by_key(|(_, record)| record.seq);
        keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

fn generate_token(tier: Tier) -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    let prefix = if tier == Tier::Free { TEST_PREFIX } else { LIVE_PREFIX };
    format!("{}{}", prefix, URL_SAFE_NO_PAD.encode(bytes))
}

/// Whether `token` has the shape of an issued key
pub fn has_valid_format(token: &str) -> bool {
    let body = token
        .strip_prefix(LIVE_PREFIX)
        .or_else(|| token.strip_prefix(TEST_PREFIX));
    match body {
        Some(body) => {
            body.len() == ENCODED_LEN
                && body
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        }
        None => false,
    }
}
